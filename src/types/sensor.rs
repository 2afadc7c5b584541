//! Sensor metadata as discovered from the OpenAQ locations endpoint, plus the
//! coordinate type used to describe search centers.

use serde::{Deserialize, Serialize};

/// Represents a geographical coordinate using latitude and longitude.
///
/// Latitude is the first element (index 0), and longitude is the second (index 1).
///
/// # Examples
///
/// ```
/// use openaq_medallion::LatLon;
///
/// let belgrade = LatLon(44.8125, 20.4612);
/// assert_eq!(belgrade.0, 44.8125); // Latitude
/// assert_eq!(belgrade.1, 20.4612); // Longitude
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon(pub f64, pub f64);

impl LatLon {
    pub fn latitude(&self) -> f64 {
        self.0
    }

    pub fn longitude(&self) -> f64 {
        self.1
    }

    /// Great-circle distance to `other` in kilometers.
    pub fn distance_km(&self, other: &LatLon) -> f64 {
        haversine::distance(
            haversine::Location {
                latitude: self.0,
                longitude: self.1,
            },
            haversine::Location {
                latitude: other.0,
                longitude: other.1,
            },
            haversine::Units::Kilometers,
        )
    }
}

/// A single OpenAQ sensor: one monitored parameter at one location.
///
/// Sensors are immutable once discovered. Re-running discovery may add new
/// sensors to the snapshot but never rewrites an existing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    /// The OpenAQ sensor identifier, used in measurement queries.
    pub id: u64,
    /// The OpenAQ location (station) the sensor belongs to.
    pub location_id: u64,
    /// Human readable station name, if the API reported one.
    pub location_name: Option<String>,
    /// ISO country code of the station, if known.
    pub country: Option<String>,
    /// Station coordinates.
    pub coordinates: LatLon,
    /// Parameter name as used by OpenAQ (e.g. "pm25", "temperature").
    pub parameter: String,
    /// Unit the sensor reports in (e.g. "µg/m³").
    pub unit: String,
}

impl Sensor {
    /// Short label used in logs, in the style of the original chunk names:
    /// `{location}_{sensor}_{country}_{name}`.
    pub fn label(&self) -> String {
        let name = self
            .location_name
            .as_deref()
            .unwrap_or("unnamed")
            .replace(' ', "-");
        format!(
            "{}_{}_{}_{}",
            self.location_id,
            self.id,
            self.country.as_deref().unwrap_or("XX"),
            name
        )
    }
}
