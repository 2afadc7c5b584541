//! Record shapes for the bronze, silver and gold layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A measurement as parsed from a raw artifact, before any cleansing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    pub sensor_id: u64,
    /// Start of the measurement period, UTC, whole seconds.
    pub timestamp: DateTime<Utc>,
    pub parameter: String,
    pub value: f64,
    pub unit: String,
    /// Raw quality flag reported by the API (`flagInfo.hasFlags`).
    pub has_flags: bool,
}

/// A measurement after deduplication, unit normalisation and validation.
///
/// Same shape as [`MeasurementRecord`]; the unit is always the canonical unit
/// of the parameter's kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedRecord {
    pub sensor_id: u64,
    pub timestamp: DateTime<Utc>,
    pub parameter: String,
    pub value: f64,
    pub unit: String,
    pub has_flags: bool,
}

/// Width of a gold time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeBucket {
    #[default]
    Day,
    Month,
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeBucket::Day => write!(f, "day"),
            TimeBucket::Month => write!(f, "month"),
        }
    }
}

/// Statistical summary of one (group, bucket, parameter) cell.
///
/// `group` is either `sensor-{id}` or a grid cell label such as
/// `cell_44.7500_20.4000`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub group: String,
    pub bucket: TimeBucket,
    pub bucket_start: DateTime<Utc>,
    pub parameter: String,
    pub unit: String,
    pub count: u32,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Observed count over the count expected for full coverage, clamped to 1.0.
    pub completeness: f64,
}
