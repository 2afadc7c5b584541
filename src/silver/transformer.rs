use crate::config::CanonicalUnits;
use crate::types::fetch_unit::TimeWindow;
use crate::types::records::{CleanedRecord, MeasurementRecord};
use crate::units::{convert, ParameterKind, Unit};
use chrono::{DateTime, Datelike, Utc};
use log::debug;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Why a record did not make it into the silver layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NonFinite,
    OutsideWindow,
    UnconvertibleUnit,
    Negative,
    AboveMaximum,
}

/// Per-reason counts of records dropped by the transformer.
///
/// Duplicates are counted separately: they are superseded, not invalid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RejectionReport {
    pub duplicates: u64,
    pub non_finite: u64,
    pub outside_window: u64,
    pub unconvertible_unit: u64,
    pub negative: u64,
    pub above_maximum: u64,
}

impl RejectionReport {
    pub fn record(&mut self, rejection: Rejection) {
        match rejection {
            Rejection::NonFinite => self.non_finite += 1,
            Rejection::OutsideWindow => self.outside_window += 1,
            Rejection::UnconvertibleUnit => self.unconvertible_unit += 1,
            Rejection::Negative => self.negative += 1,
            Rejection::AboveMaximum => self.above_maximum += 1,
        }
    }

    /// Records dropped as invalid.
    pub fn rejected(&self) -> u64 {
        self.non_finite
            + self.outside_window
            + self.unconvertible_unit
            + self.negative
            + self.above_maximum
    }

    pub fn merge(&mut self, other: &RejectionReport) {
        self.duplicates += other.duplicates;
        self.non_finite += other.non_finite;
        self.outside_window += other.outside_window;
        self.unconvertible_unit += other.unconvertible_unit;
        self.negative += other.negative;
        self.above_maximum += other.above_maximum;
    }
}

impl fmt::Display for RejectionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rejected (non-finite {}, outside window {}, unit {}, negative {}, above max {}), {} duplicates",
            self.rejected(),
            self.non_finite,
            self.outside_window,
            self.unconvertible_unit,
            self.negative,
            self.above_maximum,
            self.duplicates
        )
    }
}

/// Cleaned records of one unit, sorted by (timestamp, parameter).
#[derive(Debug, Clone, PartialEq)]
pub struct SilverBatch {
    pub records: Vec<CleanedRecord>,
    pub report: RejectionReport,
}

type DedupKey = (DateTime<Utc>, String, u64);

#[derive(Debug, Clone)]
pub struct SilverTransformer {
    canonical: CanonicalUnits,
}

impl SilverTransformer {
    pub fn new(canonical: CanonicalUnits) -> Self {
        Self { canonical }
    }

    /// Deduplicates, normalises and validates the bronze records of one
    /// unit window.
    ///
    /// Deduplication runs on the raw records first, keeping the last record
    /// seen for each (timestamp, parameter, sensor) key. Validation then runs
    /// on the survivors, so a later invalid duplicate still replaces an
    /// earlier valid one and is counted as rejected.
    pub fn transform<I>(&self, window: &TimeWindow, records: I) -> SilverBatch
    where
        I: IntoIterator<Item = MeasurementRecord>,
    {
        let mut report = RejectionReport::default();
        let mut latest: BTreeMap<DedupKey, MeasurementRecord> = BTreeMap::new();
        for record in records {
            let key = (record.timestamp, record.parameter.clone(), record.sensor_id);
            if latest.insert(key, record).is_some() {
                report.duplicates += 1;
            }
        }

        let mut cleaned = Vec::with_capacity(latest.len());
        for record in latest.into_values() {
            match self.clean(window, record) {
                Ok(record) => cleaned.push(record),
                Err(rejection) => report.record(rejection),
            }
        }
        debug!(
            "Silver batch for {}: {} kept, {}",
            window.start.year(),
            cleaned.len(),
            report
        );
        SilverBatch {
            records: cleaned,
            report,
        }
    }

    pub fn clean(
        &self,
        window: &TimeWindow,
        record: MeasurementRecord,
    ) -> Result<CleanedRecord, Rejection> {
        if !record.value.is_finite() {
            return Err(Rejection::NonFinite);
        }
        if !window.contains(&record.timestamp) {
            return Err(Rejection::OutsideWindow);
        }
        let (value, unit) = match self.canonical.for_parameter(&record.parameter) {
            Some(target) => {
                let from = Unit::parse(&record.unit);
                let value = convert(&record.parameter, record.value, &from, &target)
                    .ok_or(Rejection::UnconvertibleUnit)?;
                (value, target.to_string())
            }
            None => (record.value, record.unit),
        };
        if !value.is_finite() {
            return Err(Rejection::NonFinite);
        }
        let kind = ParameterKind::of(&record.parameter);
        if kind.is_non_negative() && value < 0.0 {
            return Err(Rejection::Negative);
        }
        if kind == ParameterKind::Humidity && value > 100.0 {
            return Err(Rejection::AboveMaximum);
        }
        Ok(CleanedRecord {
            sensor_id: record.sensor_id,
            timestamp: record.timestamp,
            parameter: record.parameter,
            value,
            unit,
            has_flags: record.has_flags,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(hour: u32, parameter: &str, value: f64, unit: &str) -> MeasurementRecord {
        MeasurementRecord {
            sensor_id: 3,
            timestamp: Utc.with_ymd_and_hms(2020, 6, 1, hour, 0, 0).unwrap(),
            parameter: parameter.to_string(),
            value,
            unit: unit.to_string(),
            has_flags: false,
        }
    }

    fn transformer() -> SilverTransformer {
        SilverTransformer::new(CanonicalUnits::default())
    }

    #[test]
    fn latest_seen_duplicate_wins() {
        let batch = transformer().transform(
            &TimeWindow::year(2020),
            vec![
                record(1, "pm25", 10.0, "µg/m³"),
                record(2, "pm25", 11.0, "µg/m³"),
                record(1, "pm25", 12.0, "µg/m³"),
            ],
        );
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.records[0].value, 12.0);
        assert_eq!(batch.report.duplicates, 1);
        assert_eq!(batch.report.rejected(), 0);
    }

    #[test]
    fn output_sorted_by_timestamp_then_parameter() {
        let batch = transformer().transform(
            &TimeWindow::year(2020),
            vec![
                record(5, "pm25", 1.0, "µg/m³"),
                record(2, "pm10", 1.0, "µg/m³"),
                record(2, "pm1", 1.0, "µg/m³"),
            ],
        );
        let keys: Vec<_> = batch
            .records
            .iter()
            .map(|r| (r.timestamp, r.parameter.as_str()))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert_eq!(keys[0].1, "pm1");
    }

    #[test]
    fn negative_concentration_is_rejected_but_negative_temperature_is_kept() {
        let batch = transformer().transform(
            &TimeWindow::year(2020),
            vec![
                record(1, "pm25", -3.0, "µg/m³"),
                record(1, "temperature", -3.0, "c"),
            ],
        );
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.records[0].parameter, "temperature");
        assert_eq!(batch.report.negative, 1);
    }

    #[test]
    fn rejects_humidity_above_100_and_non_finite() {
        let batch = transformer().transform(
            &TimeWindow::year(2020),
            vec![
                record(1, "relativehumidity", 101.0, "%"),
                record(2, "relativehumidity", 99.0, "%"),
                record(3, "pm25", f64::NAN, "µg/m³"),
            ],
        );
        assert_eq!(batch.records.len(), 1);
        assert_eq!(batch.report.above_maximum, 1);
        assert_eq!(batch.report.non_finite, 1);
    }

    #[test]
    fn rejects_records_outside_the_unit_year() {
        let mut late = record(1, "pm25", 4.0, "µg/m³");
        late.timestamp = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let batch = transformer().transform(&TimeWindow::year(2020), vec![late]);
        assert!(batch.records.is_empty());
        assert_eq!(batch.report.outside_window, 1);
    }

    #[test]
    fn converts_to_canonical_units() {
        let batch = transformer().transform(
            &TimeWindow::year(2020),
            vec![
                record(1, "temperature", 68.0, "f"),
                record(1, "o3", 0.05, "ppm"),
                record(1, "pm25", 5.0, "ppm"),
            ],
        );
        assert_eq!(batch.records.len(), 2);
        let o3 = batch.records.iter().find(|r| r.parameter == "o3").unwrap();
        assert!((o3.value - 50.0).abs() < 1e-9);
        assert_eq!(o3.unit, "ppb");
        let t = batch.records.iter().find(|r| r.parameter == "temperature").unwrap();
        assert!((t.value - 20.0).abs() < 1e-9);
        assert_eq!(t.unit, "°C");
        assert_eq!(batch.report.unconvertible_unit, 1);
    }
}
