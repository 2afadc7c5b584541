//! The raw layer: one gzip-compressed JSON artifact per fetch unit.

pub mod error;
pub mod raw_archiver;

use crate::types::fetch_unit::FetchUnit;
use crate::types::sensor::Sensor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const RAW_SCHEMA_VERSION: u32 = 1;
const SENSOR_SNAPSHOT_FILE: &str = "sensors.json.gz";

/// The decompressed content of a raw artifact. Pages are stored exactly as
/// the API returned them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEnvelope {
    pub schema_version: u32,
    pub sensor: Sensor,
    pub year: i32,
    pub pages: Vec<serde_json::Value>,
}

impl RawEnvelope {
    pub fn unit(&self) -> FetchUnit {
        FetchUnit::new(self.sensor.id, self.year)
    }
}

/// `{raw}/{sensor_id}/{year}.json.gz`
pub fn artifact_path(raw_root: &Path, unit: &FetchUnit) -> PathBuf {
    raw_root
        .join(unit.sensor_id.to_string())
        .join(format!("{}.json.gz", unit.year))
}

pub fn sensor_snapshot_path(raw_root: &Path) -> PathBuf {
    raw_root.join(SENSOR_SNAPSHOT_FILE)
}
