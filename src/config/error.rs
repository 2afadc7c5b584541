use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file '{0}'")]
    Parse(PathBuf, #[source] serde_json::Error),

    #[error("Failed to determine default storage directory")]
    StorageRootResolution,

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("Canonical unit for {kind} parameters is ambiguous: '{first}' vs '{second}'")]
    InconsistentCanonicalUnits {
        kind: String,
        first: String,
        second: String,
    },

    #[error("Unit '{unit}' cannot be the canonical unit of parameter '{parameter}'")]
    UnitKindMismatch { parameter: String, unit: String },

    #[error("API key environment variable '{0}' is not set")]
    MissingApiKey(String),
}
