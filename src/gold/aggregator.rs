use crate::config::AggregateScope;
use crate::types::records::{AggregateRecord, CleanedRecord, TimeBucket};
use crate::types::sensor::Sensor;
use chrono::{DateTime, Datelike, Months, TimeZone, Utc};
use log::warn;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

/// Start of the bucket containing `ts`.
pub fn bucket_start(bucket: TimeBucket, ts: &DateTime<Utc>) -> DateTime<Utc> {
    let (month, day) = match bucket {
        TimeBucket::Day => (ts.month(), ts.day()),
        TimeBucket::Month => (ts.month(), 1),
    };
    Utc.with_ymd_and_hms(ts.year(), month, day, 0, 0, 0)
        .single()
        .unwrap_or(*ts)
}

/// Length of the bucket starting at `start`.
pub fn bucket_length(bucket: TimeBucket, start: &DateTime<Utc>) -> chrono::Duration {
    match bucket {
        TimeBucket::Day => chrono::Duration::days(1),
        TimeBucket::Month => start
            .checked_add_months(Months::new(1))
            .map(|next| next - *start)
            .unwrap_or_else(|| chrono::Duration::days(30)),
    }
}

/// Label of the grid cell containing `sensor`, e.g. `cell_44.8000_20.4500`.
/// The label is the cell's south-west corner.
pub fn grid_cell(sensor: &Sensor, cell_degrees: f64) -> String {
    let corner = |deg: f64| (deg / cell_degrees).floor() * cell_degrees;
    format!(
        "cell_{:.4}_{:.4}",
        corner(sensor.coordinates.latitude()),
        corner(sensor.coordinates.longitude())
    )
}

pub fn sensor_group(sensor_id: u64) -> String {
    format!("sensor-{sensor_id}")
}

#[derive(Debug)]
struct Accumulator {
    unit: String,
    count: u32,
    sum: f64,
    min: f64,
    max: f64,
    sensors: BTreeSet<u64>,
}

impl Accumulator {
    fn new(unit: &str) -> Self {
        Self {
            unit: unit.to_string(),
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            sensors: BTreeSet::new(),
        }
    }

    fn add(&mut self, record: &CleanedRecord) {
        self.count += 1;
        self.sum += record.value;
        self.min = self.min.min(record.value);
        self.max = self.max.max(record.value);
        self.sensors.insert(record.sensor_id);
    }
}

type GroupKey = (String, DateTime<Utc>, String);

/// Computes per-(group, bucket, parameter) statistics from silver records.
#[derive(Debug, Clone, Copy)]
pub struct GoldAggregator {
    bucket: TimeBucket,
    scope: AggregateScope,
    expected_interval: Duration,
}

impl GoldAggregator {
    pub fn new(bucket: TimeBucket, scope: AggregateScope, expected_interval: Duration) -> Self {
        Self {
            bucket,
            scope,
            expected_interval,
        }
    }

    pub fn group_of(&self, sensor_id: u64, sensors: &HashMap<u64, Sensor>) -> String {
        match self.scope {
            AggregateScope::Sensor => sensor_group(sensor_id),
            AggregateScope::Grid { cell_degrees } => match sensors.get(&sensor_id) {
                Some(sensor) => grid_cell(sensor, cell_degrees),
                None => {
                    warn!(
                        "Sensor {} missing from the sensor snapshot, aggregating it on its own",
                        sensor_id
                    );
                    sensor_group(sensor_id)
                }
            },
        }
    }

    /// Aggregates `records`. The output is sorted by (group, bucket start,
    /// parameter) and depends only on the multiset of input records in the
    /// order given, so identical silver input yields identical output.
    pub fn aggregate(
        &self,
        records: &[CleanedRecord],
        sensors: &HashMap<u64, Sensor>,
    ) -> Vec<AggregateRecord> {
        let mut groups: HashMap<u64, String> = HashMap::new();
        let mut cells: BTreeMap<GroupKey, Accumulator> = BTreeMap::new();
        for record in records {
            let group = groups
                .entry(record.sensor_id)
                .or_insert_with(|| self.group_of(record.sensor_id, sensors))
                .clone();
            let key = (
                group,
                bucket_start(self.bucket, &record.timestamp),
                record.parameter.clone(),
            );
            cells
                .entry(key)
                .or_insert_with(|| Accumulator::new(&record.unit))
                .add(record);
        }

        cells
            .into_iter()
            .map(|((group, start, parameter), acc)| AggregateRecord {
                completeness: self.completeness(&start, acc.count, acc.sensors.len()),
                group,
                bucket: self.bucket,
                bucket_start: start,
                parameter,
                unit: acc.unit,
                count: acc.count,
                mean: acc.sum / f64::from(acc.count),
                min: acc.min,
                max: acc.max,
            })
            .collect()
    }

    /// Observed over expected measurements, clamped to 1.0.
    pub fn completeness(&self, start: &DateTime<Utc>, count: u32, sensors: usize) -> f64 {
        let interval = self.expected_interval.as_secs().max(1) as f64;
        let length = bucket_length(self.bucket, start).num_seconds() as f64;
        let expected = (length / interval) * sensors.max(1) as f64;
        (f64::from(count) / expected).min(1.0)
    }
}
