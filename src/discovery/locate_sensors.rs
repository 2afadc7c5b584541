use crate::api::error::ApiError;
use crate::api::{ApiLocation, LocationQuery, MeasurementApi};
use crate::config::MAX_RADIUS_KM;
use crate::discovery::error::DiscoveryError;
use crate::fetcher::retry::{RetryDecision, RetryPolicy};
use crate::types::sensor::{LatLon, Sensor};
use log::{debug, info, warn};
use ordered_float::OrderedFloat;
use std::collections::HashSet;
use std::time::Duration;

/// Largest page the locations endpoint serves.
const LOCATIONS_LIMIT: u32 = 1000;

/// Finds the sensors of every location within a radius of a point.
pub struct SensorLocator<'a, A> {
    api: &'a A,
    policy: RetryPolicy,
    request_timeout: Duration,
}

impl<'a, A: MeasurementApi> SensorLocator<'a, A> {
    pub fn new(api: &'a A, policy: RetryPolicy, request_timeout: Duration) -> Self {
        Self {
            api,
            policy,
            request_timeout,
        }
    }

    /// Sensors within `radius_km` of `center`, nearest first (ties by id).
    ///
    /// An empty `parameters` list keeps every parameter. An empty result is
    /// not an error.
    pub async fn locate(
        &self,
        center: LatLon,
        radius_km: f64,
        parameters: &[String],
    ) -> Result<Vec<Sensor>, DiscoveryError> {
        if !(radius_km > 0.0 && radius_km <= MAX_RADIUS_KM) {
            return Err(DiscoveryError::InvalidRadius(radius_km));
        }
        let query = LocationQuery {
            center,
            radius_m: (radius_km * 1000.0).round() as u32,
            limit: LOCATIONS_LIMIT,
        };
        let locations = self.locations_with_retry(&query).await?;
        let sensors = select_sensors(&locations, center, radius_km, parameters);
        info!(
            "Discovered {} sensors at {} locations within {} km of ({}, {})",
            sensors.len(),
            locations.len(),
            radius_km,
            center.latitude(),
            center.longitude()
        );
        Ok(sensors)
    }

    async fn locations_with_retry(
        &self,
        query: &LocationQuery,
    ) -> Result<Vec<ApiLocation>, DiscoveryError> {
        let mut attempt = 0u32;
        loop {
            let error = match tokio::time::timeout(self.request_timeout, self.api.locations(query))
                .await
            {
                Ok(Ok(locations)) => return Ok(locations),
                Ok(Err(e)) => e,
                Err(_) => ApiError::Timeout("locations".to_string()),
            };
            match self.policy.decide(&error, attempt, rand::random::<f64>()) {
                RetryDecision::RetryAfter(delay) => {
                    warn!("Location search failed ({}), retrying in {:?}", error, delay);
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    return Err(DiscoveryError::Api {
                        attempts: attempt + 1,
                        source: error,
                    });
                }
            }
        }
    }
}

/// Flattens locations into sensors, keeping those inside the radius that
/// monitor a wanted parameter. Sensor ids are unique in the result.
pub fn select_sensors(
    locations: &[ApiLocation],
    center: LatLon,
    radius_km: f64,
    parameters: &[String],
) -> Vec<Sensor> {
    let wanted: HashSet<String> = parameters.iter().map(|p| p.to_ascii_lowercase()).collect();
    let mut seen = HashSet::new();
    let mut found: Vec<(OrderedFloat<f64>, Sensor)> = Vec::new();
    for location in locations {
        let Some(coords) = location.coordinates else {
            debug!("Location {} has no coordinates, skipping", location.id);
            continue;
        };
        let coordinates = LatLon(coords.latitude, coords.longitude);
        let distance = center.distance_km(&coordinates);
        if distance > radius_km {
            debug!(
                "Location {} is {:.2} km away, outside {} km",
                location.id, distance, radius_km
            );
            continue;
        }
        for api_sensor in &location.sensors {
            let parameter = api_sensor.parameter.name.to_ascii_lowercase();
            if !wanted.is_empty() && !wanted.contains(&parameter) {
                continue;
            }
            if !seen.insert(api_sensor.id) {
                continue;
            }
            found.push((
                OrderedFloat(distance),
                Sensor {
                    id: api_sensor.id,
                    location_id: location.id,
                    location_name: location.name.clone(),
                    country: location.country.as_ref().and_then(|c| c.code.clone()),
                    coordinates,
                    parameter,
                    unit: api_sensor.parameter.units.clone(),
                },
            ));
        }
    }
    found.sort_by_key(|(distance, sensor)| (*distance, sensor.id));
    found.into_iter().map(|(_, sensor)| sensor).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedApi;

    const CENTER: LatLon = LatLon(44.8125, 20.4612);

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(2))
    }

    fn api() -> ScriptedApi {
        let api = ScriptedApi::new();
        // ~1.1 km north.
        api.add_sensor(10, 101, LatLon(44.8225, 20.4612), "pm25", "µg/m³");
        api.add_sensor(10, 102, LatLon(44.8225, 20.4612), "o3", "ppm");
        // At the center.
        api.add_sensor(11, 111, CENTER, "pm10", "µg/m³");
        // Novi Sad, far outside any allowed radius.
        api.add_sensor(12, 121, LatLon(45.2671, 19.8335), "pm25", "µg/m³");
        api
    }

    fn params(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test]
    async fn filters_by_distance_and_parameter() {
        let api = api();
        let locator = SensorLocator::new(&api, policy(0), Duration::from_secs(5));
        let sensors = locator
            .locate(CENTER, 5.0, &params(&["pm25", "pm10"]))
            .await
            .unwrap();
        let ids: Vec<u64> = sensors.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![111, 101]);
        assert_eq!(sensors[1].country.as_deref(), Some("RS"));
    }

    #[tokio::test]
    async fn empty_parameter_filter_keeps_everything_in_range() {
        let api = api();
        let locator = SensorLocator::new(&api, policy(0), Duration::from_secs(5));
        let sensors = locator.locate(CENTER, 5.0, &[]).await.unwrap();
        assert_eq!(sensors.len(), 3);
    }

    #[tokio::test]
    async fn no_sensors_is_a_valid_result() {
        let api = ScriptedApi::new();
        let locator = SensorLocator::new(&api, policy(0), Duration::from_secs(5));
        assert!(locator.locate(CENTER, 5.0, &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_radius_beyond_provider_limit() {
        let api = api();
        let locator = SensorLocator::new(&api, policy(0), Duration::from_secs(5));
        let err = locator.locate(CENTER, 30.0, &[]).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidRadius(_)));
        assert_eq!(api.location_calls(), 0);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_then_surface_as_retryable() {
        let api = api();
        api.fail_locations_next(ApiError::Timeout("locations".into()));
        let locator = SensorLocator::new(&api, policy(2), Duration::from_secs(5));
        assert_eq!(locator.locate(CENTER, 5.0, &[]).await.unwrap().len(), 3);
        assert_eq!(api.location_calls(), 2);

        for _ in 0..3 {
            api.fail_locations_next(ApiError::Timeout("locations".into()));
        }
        let err = locator.locate(CENTER, 5.0, &[]).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(err, DiscoveryError::Api { attempts: 3, .. }));
    }
}
