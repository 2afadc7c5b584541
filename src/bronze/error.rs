use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BronzeError {
    #[error("Failed to read raw artifact '{0}'")]
    Read(PathBuf, #[source] std::io::Error),

    /// The artifact cannot be decoded at all. It has to be re-fetched; the
    /// pipeline never retries this on its own.
    #[error("Raw artifact '{path}' is corrupt: {reason}")]
    CorruptArtifact { path: PathBuf, reason: String },
}
