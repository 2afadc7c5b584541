//! The capability interface to the measurement provider.
//!
//! Everything above this module talks to a [`MeasurementApi`]; only
//! [`openaq::OpenAqClient`] knows about HTTP. Tests substitute a scripted
//! in-memory implementation.

pub mod error;
pub mod openaq;

use crate::types::fetch_unit::TimeWindow;
use crate::types::sensor::LatLon;
use error::ApiError;
use serde::Deserialize;
use std::future::Future;
use std::time::Duration;

/// A radius search around a coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationQuery {
    pub center: LatLon,
    pub radius_m: u32,
    pub limit: u32,
}

/// One page of measurements, kept verbatim for the raw layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiPage {
    pub body: serde_json::Value,
    /// Length of the page's `results` array.
    pub result_count: usize,
    pub rate_limit: Option<RateLimitHint>,
}

/// Rate limit budget reported alongside a successful response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHint {
    pub remaining: u32,
    pub reset: Duration,
}

pub trait MeasurementApi: Send + Sync {
    /// Locations (stations) within the query radius, with their sensors.
    fn locations(
        &self,
        query: &LocationQuery,
    ) -> impl Future<Output = Result<Vec<ApiLocation>, ApiError>> + Send;

    /// Page `page` (1-based) of a sensor's measurements inside `window`.
    fn measurements_page(
        &self,
        sensor_id: u64,
        window: &TimeWindow,
        page: u32,
    ) -> impl Future<Output = Result<ApiPage, ApiError>> + Send;
}

// --- OpenAQ v3 location payload ---

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LocationsResponse {
    #[serde(default)]
    pub results: Vec<ApiLocation>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiLocation {
    pub id: u64,
    pub name: Option<String>,
    pub country: Option<ApiCountry>,
    pub coordinates: Option<ApiCoordinates>,
    #[serde(default)]
    pub sensors: Vec<ApiSensor>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiCountry {
    pub code: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct ApiCoordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApiSensor {
    pub id: u64,
    pub name: Option<String>,
    pub parameter: ApiParameter,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiParameter {
    pub name: String,
    pub units: String,
    pub display_name: Option<String>,
}
