//! The bronze layer: typed, restartable reads over raw artifacts.

pub mod error;
pub mod loader;

pub use loader::{BronzeArtifact, BronzeRecords, ParseStats};
