use crate::api::error::ApiError;
use crate::types::fetch_unit::FetchUnit;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    /// Transient or rate-limit failures outlasted the retry budget.
    #[error("Fetching {unit} failed after {attempts} attempts")]
    RetriesExhausted {
        unit: FetchUnit,
        attempts: u32,
        #[source]
        source: ApiError,
    },

    #[error("Fetching {unit} failed permanently")]
    Permanent {
        unit: FetchUnit,
        #[source]
        source: ApiError,
    },

    #[error("Fetching {unit} did not finish within {limit:?}")]
    UnitTimeout { unit: FetchUnit, limit: Duration },

    #[error("Request limiter was shut down")]
    LimiterClosed(#[from] tokio::sync::AcquireError),
}

impl FetchError {
    /// Whether a later run may succeed without intervention.
    pub fn is_permanent(&self) -> bool {
        matches!(self, FetchError::Permanent { .. })
    }
}
