pub mod api;
pub mod archive;
pub mod bronze;
pub mod checkpoint;
pub mod config;
pub mod discovery;
mod error;
pub mod fetcher;
pub mod gold;
mod pipeline;
pub mod silver;
mod types;
pub mod units;
mod utils;

#[cfg(test)]
mod test_support;

pub use error::PipelineError;
pub use pipeline::Pipeline;

pub use api::openaq::OpenAqClient;
pub use api::MeasurementApi;
pub use checkpoint::file_store::FileCheckpointStore;
pub use checkpoint::{CheckpointReceipt, CheckpointStore};
pub use config::{AggregateScope, PipelineConfig, StorageConfig, StorageLayout};

pub use types::fetch_unit::{FetchUnit, TimeWindow, UnitState, YearRange};
pub use types::records::{AggregateRecord, CleanedRecord, MeasurementRecord, TimeBucket};
pub use types::sensor::{LatLon, Sensor};
pub use types::summary::{RunSummary, Stage, UnitFailure};

pub use api::error::ApiError;
pub use archive::error::ArchiveError;
pub use bronze::error::BronzeError;
pub use checkpoint::error::CheckpointError;
pub use config::error::ConfigError;
pub use discovery::error::DiscoveryError;
pub use fetcher::error::FetchError;
pub use gold::error::GoldError;
pub use silver::error::SilverError;
