use crate::silver::error::SilverError;
use polars::prelude::PolarsError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GoldError {
    #[error(transparent)]
    Silver(#[from] SilverError),

    #[error("Failed to list silver partitions under '{0}'")]
    SilverListing(PathBuf, #[source] std::io::Error),

    #[error("Failed to build gold frame")]
    Frame(#[source] PolarsError),

    #[error("Failed to encode gold partition '{0}' as parquet")]
    ParquetWritePolars(PathBuf, #[source] PolarsError),

    #[error("Failed to write gold partition '{0}'")]
    ParquetWriteIo(PathBuf, #[source] std::io::Error),

    #[error("Failed to remove stale gold partition '{0}'")]
    StaleRemoval(PathBuf, #[source] std::io::Error),

    #[error("Failed to scan gold partitions at '{0}'")]
    ParquetScan(PathBuf, #[source] PolarsError),

    #[error("No gold partitions found under '{0}'")]
    Empty(PathBuf),

    #[error("Background task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),
}
