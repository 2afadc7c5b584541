use std::time::Duration;
use thiserror::Error;

/// How the fetcher should treat an [`ApiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The provider asked us to slow down.
    RateLimited,
    /// Network hiccup or server-side failure; worth retrying.
    Transient,
    /// Retrying will not change the answer.
    Permanent,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network request failed for {0}")]
    NetworkRequest(String, #[source] reqwest::Error),

    #[error("HTTP request failed for {url} with status {status}")]
    HttpStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("Rate limited by provider for {url}")]
    RateLimited {
        url: String,
        retry_after: Option<Duration>,
    },

    #[error("Request to {0} timed out")]
    Timeout(String),

    #[error("Failed to decode response from {0}")]
    Decode(String, #[source] serde_json::Error),

    #[error("Unexpected response shape from {url}: {message}")]
    UnexpectedShape { url: String, message: String },
}

impl ApiError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ApiError::RateLimited { .. } => ErrorClass::RateLimited,
            ApiError::HttpStatus { status, .. } => classify_status(*status),
            ApiError::NetworkRequest(_, e) if e.is_builder() => ErrorClass::Permanent,
            ApiError::NetworkRequest(..) | ApiError::Timeout(_) => ErrorClass::Transient,
            // A truncated body is the usual cause of a decode failure.
            ApiError::Decode(..) => ErrorClass::Transient,
            ApiError::UnexpectedShape { .. } => ErrorClass::Permanent,
        }
    }

    /// Provider-suggested wait before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

pub fn classify_status(status: reqwest::StatusCode) -> ErrorClass {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ErrorClass::RateLimited
    } else if status.is_server_error() || status == reqwest::StatusCode::REQUEST_TIMEOUT {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}
