//! In-memory doubles shared by the unit tests.

use crate::api::error::ApiError;
use crate::api::openaq::page_from_body;
use crate::api::{
    ApiCoordinates, ApiCountry, ApiLocation, ApiPage, ApiParameter, ApiSensor, LocationQuery,
    MeasurementApi, RateLimitHint,
};
use crate::checkpoint::error::CheckpointError;
use crate::checkpoint::file_store::FileCheckpointStore;
use crate::checkpoint::{CheckpointReceipt, CheckpointStore};
use crate::types::fetch_unit::{FetchUnit, TimeWindow, UnitState};
use crate::types::sensor::{LatLon, Sensor};
use chrono::{Datelike, Duration as ChronoDuration, SecondsFormat};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

type PageKey = (u64, i32, u32);

/// A scripted [`MeasurementApi`]. Pages not configured come back empty.
#[derive(Default)]
pub struct ScriptedApi {
    locations: Mutex<BTreeMap<u64, ApiLocation>>,
    pages: Mutex<HashMap<PageKey, Value>>,
    failures: Mutex<HashMap<PageKey, VecDeque<ApiError>>>,
    location_failures: Mutex<VecDeque<ApiError>>,
    calls: Mutex<Vec<PageKey>>,
    location_calls: Mutex<u32>,
    delay: Mutex<Duration>,
    rate_limit: Mutex<Option<RateLimitHint>>,
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_sensor(
        &self,
        location_id: u64,
        sensor_id: u64,
        coordinates: LatLon,
        parameter: &str,
        unit: &str,
    ) {
        let mut locations = self.locations.lock().unwrap();
        let location = locations.entry(location_id).or_insert_with(|| ApiLocation {
            id: location_id,
            name: Some(format!("Station {location_id}")),
            country: Some(ApiCountry {
                code: Some("RS".to_string()),
            }),
            coordinates: Some(ApiCoordinates {
                latitude: coordinates.0,
                longitude: coordinates.1,
            }),
            sensors: Vec::new(),
        });
        location.sensors.push(ApiSensor {
            id: sensor_id,
            name: Some(format!("{parameter} {unit}")),
            parameter: ApiParameter {
                name: parameter.to_string(),
                units: unit.to_string(),
                display_name: None,
            },
        });
    }

    pub fn set_page(&self, sensor_id: u64, year: i32, page: u32, body: Value) {
        self.pages
            .lock()
            .unwrap()
            .insert((sensor_id, year, page), body);
    }

    /// Queues an error for the next request of that page.
    pub fn fail_next(&self, sensor_id: u64, year: i32, page: u32, error: ApiError) {
        self.failures
            .lock()
            .unwrap()
            .entry((sensor_id, year, page))
            .or_default()
            .push_back(error);
    }

    pub fn fail_locations_next(&self, error: ApiError) {
        self.location_failures.lock().unwrap().push_back(error);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn set_rate_limit(&self, hint: Option<RateLimitHint>) {
        *self.rate_limit.lock().unwrap() = hint;
    }

    /// Pages requested for a unit, in request order.
    pub fn calls_for(&self, sensor_id: u64, year: i32) -> Vec<u32> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, y, _)| *s == sensor_id && *y == year)
            .map(|(_, _, p)| *p)
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn location_calls(&self) -> u32 {
        *self.location_calls.lock().unwrap()
    }
}

impl MeasurementApi for ScriptedApi {
    async fn locations(&self, query: &LocationQuery) -> Result<Vec<ApiLocation>, ApiError> {
        *self.location_calls.lock().unwrap() += 1;
        let failure = self.location_failures.lock().unwrap().pop_front();
        if let Some(error) = failure {
            return Err(error);
        }
        let locations = self.locations.lock().unwrap();
        Ok(locations
            .values()
            .take(query.limit as usize)
            .cloned()
            .collect())
    }

    async fn measurements_page(
        &self,
        sensor_id: u64,
        window: &TimeWindow,
        page: u32,
    ) -> Result<ApiPage, ApiError> {
        let key = (sensor_id, window.start.year(), page);
        self.calls.lock().unwrap().push(key);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        if let Some(error) = failure {
            return Err(error);
        }
        let body = self
            .pages
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .unwrap_or_else(|| json!({ "meta": {}, "results": [] }));
        let hint = *self.rate_limit.lock().unwrap();
        page_from_body("scripted", body, hint)
    }
}

/// A measurements page in the OpenAQ v3 shape. Each entry is
/// `(hours since the start of the year, value)`.
pub fn measurement_page(year: i32, parameter: &str, unit: &str, values: &[(u32, f64)]) -> Value {
    let start = TimeWindow::year(year).start;
    let results: Vec<Value> = values
        .iter()
        .map(|(hour, value)| {
            let from = start + ChronoDuration::hours(i64::from(*hour));
            let to = from + ChronoDuration::hours(1);
            json!({
                "value": value,
                "flagInfo": { "hasFlags": false },
                "parameter": { "id": 2, "name": parameter, "units": unit },
                "period": {
                    "label": "raw",
                    "interval": "01:00:00",
                    "datetimeFrom": {
                        "utc": from.to_rfc3339_opts(SecondsFormat::Secs, true),
                        "local": from.to_rfc3339_opts(SecondsFormat::Secs, true),
                    },
                    "datetimeTo": { "utc": to.to_rfc3339_opts(SecondsFormat::Secs, true) },
                },
            })
        })
        .collect();
    json!({ "meta": { "found": results.len() }, "results": results })
}

pub fn sensor(id: u64, location_id: u64) -> Sensor {
    Sensor {
        id,
        location_id,
        location_name: Some(format!("Station {location_id}")),
        country: Some("RS".to_string()),
        coordinates: LatLon(44.8125, 20.4612),
        parameter: "pm25".to_string(),
        unit: "µg/m³".to_string(),
    }
}

/// Delegates to a file store but refuses to complete any unit.
pub struct FailingCheckpoints {
    inner: FileCheckpointStore,
}

impl FailingCheckpoints {
    pub fn new(inner: FileCheckpointStore) -> Self {
        Self { inner }
    }
}

impl CheckpointStore for FailingCheckpoints {
    fn state(&self, unit: &FetchUnit) -> Result<UnitState, CheckpointError> {
        self.inner.state(unit)
    }

    fn try_begin(&self, unit: &FetchUnit) -> Result<bool, CheckpointError> {
        self.inner.try_begin(unit)
    }

    fn release(&self, unit: &FetchUnit) {
        self.inner.release(unit)
    }

    fn invalidate(&self, unit: &FetchUnit) -> Result<(), CheckpointError> {
        self.inner.invalidate(unit)
    }

    fn mark_complete(
        &self,
        unit: &FetchUnit,
        _receipt: &CheckpointReceipt,
    ) -> Result<(), CheckpointError> {
        Err(CheckpointError::Write(
            std::path::PathBuf::from(format!("{}_{}.finished", unit.sensor_id, unit.year)),
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        ))
    }

    fn receipt(&self, unit: &FetchUnit) -> Result<Option<CheckpointReceipt>, CheckpointError> {
        self.inner.receipt(unit)
    }

    fn list_complete(&self) -> Result<Vec<FetchUnit>, CheckpointError> {
        self.inner.list_complete()
    }
}
