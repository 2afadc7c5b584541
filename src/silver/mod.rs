//! The silver layer: deduplicated, unit-normalised, validated measurements,
//! one parquet partition per fetch unit.

pub mod error;
pub mod partition;
pub mod transformer;

pub use transformer::{Rejection, RejectionReport, SilverBatch, SilverTransformer};
