use crate::archive::{RawEnvelope, RAW_SCHEMA_VERSION};
use crate::bronze::error::BronzeError;
use crate::types::fetch_unit::FetchUnit;
use crate::types::records::MeasurementRecord;
use crate::types::sensor::Sensor;
use crate::utils::gunzip;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Deserialize;
use std::cell::Cell;
use std::path::{Path, PathBuf};

// --- Measurement payload shape (OpenAQ v3) ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMeasurement {
    value: f64,
    flag_info: Option<FlagInfo>,
    parameter: Option<MeasuredParameter>,
    period: Option<Period>,
    /// Older payloads carry the timestamp here instead of in `period`.
    date: Option<ApiDatetime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlagInfo {
    has_flags: bool,
}

#[derive(Debug, Deserialize)]
struct MeasuredParameter {
    name: Option<String>,
    units: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Period {
    datetime_from: Option<ApiDatetime>,
}

#[derive(Debug, Deserialize)]
struct ApiDatetime {
    utc: DateTime<Utc>,
}

/// Counts of input the loader had to skip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    pub malformed_pages: u64,
    pub malformed_records: u64,
}

impl ParseStats {
    /// Total parse warnings: one per skipped page plus one per skipped record.
    pub fn warnings(&self) -> u64 {
        self.malformed_pages + self.malformed_records
    }
}

/// A decompressed, envelope-validated raw artifact.
#[derive(Debug, Clone)]
pub struct BronzeArtifact {
    path: PathBuf,
    envelope: RawEnvelope,
}

impl BronzeArtifact {
    pub async fn load(path: &Path) -> Result<Self, BronzeError> {
        let compressed = tokio::fs::read(path)
            .await
            .map_err(|e| BronzeError::Read(path.to_path_buf(), e))?;
        Self::from_compressed(path, &compressed).await
    }

    pub async fn from_compressed(path: &Path, compressed: &[u8]) -> Result<Self, BronzeError> {
        let corrupt = |reason: String| BronzeError::CorruptArtifact {
            path: path.to_path_buf(),
            reason,
        };
        let json = gunzip(compressed)
            .await
            .map_err(|e| corrupt(format!("decompression failed: {e}")))?;
        let envelope: RawEnvelope = serde_json::from_slice(&json)
            .map_err(|e| corrupt(format!("invalid envelope: {e}")))?;
        if envelope.schema_version != RAW_SCHEMA_VERSION {
            return Err(corrupt(format!(
                "unsupported schema version {}",
                envelope.schema_version
            )));
        }
        debug!(
            "Loaded {} with {} pages from {}",
            envelope.unit(),
            envelope.pages.len(),
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            envelope,
        })
    }

    pub fn unit(&self) -> FetchUnit {
        self.envelope.unit()
    }

    pub fn sensor(&self) -> &Sensor {
        &self.envelope.sensor
    }

    pub fn page_count(&self) -> usize {
        self.envelope.pages.len()
    }

    /// A fresh pass over the artifact's records. Each call starts from the
    /// first page, so the sequence can be replayed.
    pub fn records(&self) -> BronzeRecords<'_> {
        BronzeRecords {
            artifact: self,
            next_page: 0,
            current: Vec::new().into_iter(),
            stats: Cell::new(ParseStats::default()),
        }
    }
}

/// Lazy iterator over the records of a [`BronzeArtifact`], page by page.
///
/// Malformed pages and records are skipped; [`BronzeRecords::stats`] reports
/// how many.
pub struct BronzeRecords<'a> {
    artifact: &'a BronzeArtifact,
    next_page: usize,
    current: std::vec::IntoIter<MeasurementRecord>,
    stats: Cell<ParseStats>,
}

impl BronzeRecords<'_> {
    pub fn stats(&self) -> ParseStats {
        self.stats.get()
    }

    fn bump(&self, page: bool) {
        let mut stats = self.stats.get();
        if page {
            stats.malformed_pages += 1;
        } else {
            stats.malformed_records += 1;
        }
        self.stats.set(stats);
    }

    fn parse_page(&self, index: usize, page: &serde_json::Value) -> Vec<MeasurementRecord> {
        let Some(results) = page.get("results").and_then(|r| r.as_array()) else {
            warn!(
                "Skipping malformed page {} of {}: no results list",
                index + 1,
                self.artifact.path.display()
            );
            self.bump(true);
            return Vec::new();
        };
        let sensor = &self.artifact.envelope.sensor;
        let mut records = Vec::with_capacity(results.len());
        for entry in results {
            match ApiMeasurement::deserialize(entry) {
                Ok(m) => match to_record(sensor, m) {
                    Some(record) => records.push(record),
                    None => self.bump(false),
                },
                Err(e) => {
                    debug!("Skipping malformed record in page {}: {}", index + 1, e);
                    self.bump(false);
                }
            }
        }
        records
    }
}

fn to_record(sensor: &Sensor, m: ApiMeasurement) -> Option<MeasurementRecord> {
    let stamp = m
        .period
        .and_then(|p| p.datetime_from)
        .or(m.date)
        .map(|d| d.utc)?;
    let timestamp = DateTime::from_timestamp(stamp.timestamp(), 0)?;
    let (parameter, unit) = match m.parameter {
        Some(p) => (
            p.name.unwrap_or_else(|| sensor.parameter.clone()),
            p.units.unwrap_or_else(|| sensor.unit.clone()),
        ),
        None => (sensor.parameter.clone(), sensor.unit.clone()),
    };
    Some(MeasurementRecord {
        sensor_id: sensor.id,
        timestamp,
        parameter,
        value: m.value,
        unit,
        has_flags: m.flag_info.map(|f| f.has_flags).unwrap_or(false),
    })
}

impl Iterator for BronzeRecords<'_> {
    type Item = MeasurementRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.current.next() {
                return Some(record);
            }
            let pages = &self.artifact.envelope.pages;
            if self.next_page >= pages.len() {
                return None;
            }
            let index = self.next_page;
            self.next_page += 1;
            self.current = self.parse_page(index, &pages[index]).into_iter();
        }
    }
}
