use polars::prelude::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SilverError {
    #[error("Failed to build silver frame")]
    Frame(#[source] PolarsError),

    #[error("Failed to encode silver partition '{0}' as parquet")]
    ParquetWritePolars(PathBuf, #[source] PolarsError),

    #[error("Failed to write silver partition '{0}'")]
    ParquetWriteIo(PathBuf, #[source] std::io::Error),

    #[error("Failed to open silver partition '{0}'")]
    ParquetReadIo(PathBuf, #[source] std::io::Error),

    #[error("Failed to read silver partition '{0}'")]
    ParquetReadPolars(PathBuf, #[source] PolarsError),

    #[error("Silver partition '{path}' has an unexpected schema: {reason}")]
    Schema { path: PathBuf, reason: String },

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}
