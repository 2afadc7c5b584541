use crate::api::error::ApiError;
use crate::archive::error::ArchiveError;
use crate::bronze::error::BronzeError;
use crate::checkpoint::error::CheckpointError;
use crate::config::error::ConfigError;
use crate::discovery::error::DiscoveryError;
use crate::gold::error::GoldError;
use crate::silver::error::SilverError;
use crate::types::fetch_unit::FetchUnit;
use crate::types::summary::RunSummary;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Bronze(#[from] BronzeError),

    #[error(transparent)]
    Silver(#[from] SilverError),

    #[error(transparent)]
    Gold(#[from] GoldError),

    /// A unit was archived but could not be recorded as complete. The run
    /// stops; the unit stays pending and is re-fetched next time.
    #[error("Failed to checkpoint {unit}, aborting run")]
    CheckpointWriteFailure {
        unit: FetchUnit,
        #[source]
        source: CheckpointError,
    },

    /// Too many units in a row failed transiently; the provider looks down.
    #[error("Measurement API unavailable: {consecutive_failures} consecutive unit failures")]
    ApiUnavailable {
        consecutive_failures: usize,
        summary: Box<RunSummary>,
    },

    #[error("Failed to create storage directory '{0}'")]
    StorageDirCreation(PathBuf, #[source] std::io::Error),
}
