//! The (sensor, year) unit of ingestion work and the time windows derived from it.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The atomic unit of ingestion: every measurement of one sensor within one
/// calendar year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FetchUnit {
    pub sensor_id: u64,
    pub year: i32,
}

impl FetchUnit {
    pub fn new(sensor_id: u64, year: i32) -> Self {
        Self { sensor_id, year }
    }

    /// The half-open UTC window `[year-01-01, (year+1)-01-01)` covered by this unit.
    pub fn window(&self) -> TimeWindow {
        TimeWindow::year(self.year)
    }
}

impl fmt::Display for FetchUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sensor {} / {}", self.sensor_id, self.year)
    }
}

/// Lifecycle of a [`FetchUnit`] in the checkpoint store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    Pending,
    InProgress,
    Complete,
}

/// A half-open UTC time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn year(year: i32) -> Self {
        Self {
            start: year_start(year),
            end: year_start(year + 1),
        }
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        self.start <= *ts && *ts < self.end
    }
}

fn year_start(year: i32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// An inclusive range of calendar years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub start: i32,
    pub end: i32,
}

impl YearRange {
    pub fn new(start: i32, end: i32) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.start..=self.end
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        (self.start..=self.end).contains(&ts.year())
    }
}
