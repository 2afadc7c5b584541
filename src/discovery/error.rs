use crate::api::error::ApiError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Search radius {0} km is outside (0, 25] km")]
    InvalidRadius(f64),

    #[error("Sensor discovery failed after {attempts} attempts")]
    Api {
        attempts: u32,
        #[source]
        source: ApiError,
    },

    #[error("Failed to read sensor snapshot '{0}'")]
    SnapshotRead(PathBuf, #[source] std::io::Error),

    #[error("Sensor snapshot '{0}' is not valid JSON")]
    SnapshotDecode(PathBuf, #[source] serde_json::Error),

    #[error("Failed to encode sensor snapshot")]
    SnapshotEncode(#[source] serde_json::Error),

    #[error("Failed to write sensor snapshot '{0}'")]
    SnapshotWrite(PathBuf, #[source] std::io::Error),

    #[error("No sensor snapshot at '{0}', run discovery first")]
    NoSnapshot(PathBuf),
}

impl DiscoveryError {
    /// Whether running discovery again may succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            DiscoveryError::Api { source, .. } => {
                source.class() != crate::api::error::ErrorClass::Permanent
            }
            DiscoveryError::SnapshotRead(..) | DiscoveryError::SnapshotWrite(..) => true,
            _ => false,
        }
    }
}
