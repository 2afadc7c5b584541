use crate::checkpoint::error::CheckpointError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to serialize raw payload")]
    Serialize(#[source] serde_json::Error),

    #[error("Failed to compress raw payload")]
    Compress(#[source] std::io::Error),

    #[error("Failed to write raw artifact '{0}'")]
    Write(PathBuf, #[source] std::io::Error),

    /// The artifact is on disk but the unit could not be recorded as complete.
    #[error("Failed to checkpoint archived unit")]
    Checkpoint(#[from] CheckpointError),

    #[error("Checkpoint task failed")]
    TaskJoin(#[from] tokio::task::JoinError),
}
