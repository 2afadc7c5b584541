//! The gold layer: time-bucketed statistics per sensor or grid cell.

pub mod aggregator;
pub mod error;
pub mod partition;

pub use aggregator::GoldAggregator;
