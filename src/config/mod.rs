//! Pipeline configuration.
//!
//! Every option has a default, so a config file only needs the fields it
//! changes. Configs can also be built in code:
//!
//! ```
//! use openaq_medallion::{PipelineConfig, YearRange};
//!
//! let config = PipelineConfig::builder()
//!     .radius_km(5.0)
//!     .years(YearRange::new(2019, 2020))
//!     .build();
//! assert_eq!(config.page_limit, 1000);
//! ```

pub mod error;

use crate::types::fetch_unit::YearRange;
use crate::types::records::TimeBucket;
use crate::types::sensor::LatLon;
use crate::units::{convert, ParameterKind, Unit};
use bon::Builder;
use error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://api.openaq.org";
const STORAGE_DIR_NAME: &str = "openaq_medallion";
/// OpenAQ rejects location searches with a larger radius.
pub const MAX_RADIUS_KM: f64 = 25.0;
/// Largest page the measurements endpoint serves.
pub const MAX_PAGE_LIMIT: u32 = 1000;

fn default_parameters() -> Vec<String> {
    ["pm1", "pm10", "pm25", "temperature"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

/// How gold aggregates are grouped in space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AggregateScope {
    /// One aggregate series per sensor.
    #[default]
    Sensor,
    /// Sensors are pooled into square lat/lon cells of `cell_degrees`.
    Grid { cell_degrees: f64 },
}

/// Storage locations of each layer. Unset paths are derived from `root`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub root: Option<PathBuf>,
    pub raw: Option<PathBuf>,
    pub checkpoints: Option<PathBuf>,
    pub silver: Option<PathBuf>,
    pub gold: Option<PathBuf>,
}

impl StorageConfig {
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    pub fn resolve(&self) -> Result<StorageLayout, ConfigError> {
        let root = match &self.root {
            Some(root) => root.clone(),
            None => dirs::data_local_dir()
                .map(|p| p.join(STORAGE_DIR_NAME))
                .ok_or(ConfigError::StorageRootResolution)?,
        };
        let pick = |explicit: &Option<PathBuf>, name: &str| {
            explicit.clone().unwrap_or_else(|| root.join(name))
        };
        Ok(StorageLayout {
            raw: pick(&self.raw, "raw"),
            checkpoints: pick(&self.checkpoints, "checkpoints"),
            silver: pick(&self.silver, "silver"),
            gold: pick(&self.gold, "gold"),
        })
    }
}

/// Resolved per-layer directories.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageLayout {
    pub raw: PathBuf,
    pub checkpoints: PathBuf,
    pub silver: PathBuf,
    pub gold: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct PipelineConfig {
    #[builder(default = DEFAULT_API_BASE_URL.to_string(), into)]
    pub api_base_url: String,
    /// Name of the environment variable holding the OpenAQ API key.
    #[builder(default = "OPENAQ_API_KEY".to_string(), into)]
    pub api_key_env: String,
    /// Results requested per measurements page.
    #[builder(default = 1000)]
    pub page_limit: u32,
    #[builder(default = 1000)]
    pub min_request_interval_ms: u64,
    #[builder(default = 2)]
    pub max_in_flight: usize,
    /// Fetch units (or partitions) processed concurrently.
    #[builder(default = 4)]
    pub workers: usize,
    #[builder(default = 5)]
    pub max_retries: u32,
    #[builder(default = 1_000)]
    pub backoff_base_ms: u64,
    #[builder(default = 60_000)]
    pub backoff_cap_ms: u64,
    #[builder(default = 60)]
    pub request_timeout_secs: u64,
    #[builder(default = 1_800)]
    pub unit_timeout_secs: u64,
    /// Pause requests once `x-ratelimit-remaining` drops below this.
    #[builder(default = 5)]
    pub rate_limit_floor: u32,
    /// Abort ingestion after this many units in a row fail transiently.
    #[builder(default = 5)]
    pub max_consecutive_unit_failures: usize,
    #[builder(default = LatLon(44.8125, 20.4612))]
    pub center: LatLon,
    #[builder(default = 8.0)]
    pub radius_km: f64,
    #[builder(default = default_parameters())]
    pub parameters: Vec<String>,
    #[builder(default = YearRange::new(2021, 2025))]
    pub years: YearRange,
    #[builder(default)]
    pub storage: StorageConfig,
    /// Canonical unit overrides keyed by parameter name. An override applies
    /// to every parameter of the same kind.
    #[builder(default)]
    pub canonical_units: BTreeMap<String, String>,
    /// Nominal spacing between measurements, used for completeness ratios.
    #[builder(default = 3_600)]
    pub expected_interval_secs: u64,
    #[builder(default)]
    pub time_bucket: TimeBucket,
    #[builder(default)]
    pub aggregate_scope: AggregateScope,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        let config: PipelineConfig = serde_json::from_str(&text)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| ConfigError::InvalidValue {
            field,
            reason: reason.to_string(),
        };
        if self.years.is_empty() {
            return Err(invalid("years", "start year is after end year"));
        }
        if !(self.radius_km > 0.0 && self.radius_km <= MAX_RADIUS_KM) {
            return Err(invalid("radius_km", "must be in (0, 25] km"));
        }
        if self.workers == 0 {
            return Err(invalid("workers", "must be at least 1"));
        }
        if self.max_in_flight == 0 {
            return Err(invalid("max_in_flight", "must be at least 1"));
        }
        if self.page_limit == 0 || self.page_limit > MAX_PAGE_LIMIT {
            return Err(invalid("page_limit", "must be in [1, 1000]"));
        }
        if self.expected_interval_secs == 0 {
            return Err(invalid("expected_interval_secs", "must be at least 1"));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(invalid("backoff_cap_ms", "must not be below backoff_base_ms"));
        }
        if let AggregateScope::Grid { cell_degrees } = self.aggregate_scope {
            if !(cell_degrees > 0.0) {
                return Err(invalid("aggregate_scope", "cell_degrees must be positive"));
            }
        }
        self.canonical_units()?;
        Ok(())
    }

    pub fn api_key(&self) -> Result<String, ConfigError> {
        std::env::var(&self.api_key_env).map_err(|_| ConfigError::MissingApiKey(self.api_key_env.clone()))
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn unit_timeout(&self) -> Duration {
        Duration::from_secs(self.unit_timeout_secs)
    }

    /// Resolves the canonical unit table, checking that overrides agree
    /// within each parameter kind.
    pub fn canonical_units(&self) -> Result<CanonicalUnits, ConfigError> {
        let mut by_kind: BTreeMap<ParameterKind, Unit> = BTreeMap::new();
        let mut other: BTreeMap<String, Unit> = BTreeMap::new();
        for (parameter, raw_unit) in &self.canonical_units {
            let kind = ParameterKind::of(parameter);
            let unit = Unit::parse(raw_unit);
            if kind == ParameterKind::Other {
                other.insert(parameter.to_ascii_lowercase(), unit);
                continue;
            }
            let reachable = kind
                .default_unit()
                .and_then(|default| convert(parameter, 1.0, &default, &unit))
                .is_some();
            if !reachable {
                return Err(ConfigError::UnitKindMismatch {
                    parameter: parameter.clone(),
                    unit: raw_unit.clone(),
                });
            }
            if let Some(existing) = by_kind.get(&kind) {
                if *existing != unit {
                    return Err(ConfigError::InconsistentCanonicalUnits {
                        kind: kind.to_string(),
                        first: existing.to_string(),
                        second: unit.to_string(),
                    });
                }
            }
            by_kind.insert(kind, unit);
        }
        Ok(CanonicalUnits { by_kind, other })
    }
}

/// Canonical unit per parameter kind, with per-parameter entries for
/// parameters of unknown kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalUnits {
    by_kind: BTreeMap<ParameterKind, Unit>,
    other: BTreeMap<String, Unit>,
}

impl CanonicalUnits {
    /// `None` means the parameter has no canonical unit and values keep their
    /// reported unit.
    pub fn for_parameter(&self, parameter: &str) -> Option<Unit> {
        let kind = ParameterKind::of(parameter);
        if kind == ParameterKind::Other {
            return self.other.get(&parameter.to_ascii_lowercase()).cloned();
        }
        self.by_kind.get(&kind).cloned().or_else(|| kind.default_unit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_downloader() {
        let config = PipelineConfig::default();
        assert_eq!(config.center, LatLon(44.8125, 20.4612));
        assert_eq!(config.radius_km, 8.0);
        assert_eq!(config.years, YearRange::new(2021, 2025));
        assert_eq!(config.parameters, vec!["pm1", "pm10", "pm25", "temperature"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "radius_km": 5.0, "years": { "start": 2019, "end": 2020 },
                 "storage": { "root": "/tmp/aq" },
                 "aggregate_scope": { "kind": "grid", "cell_degrees": 0.05 } }"#,
        )
        .unwrap();
        let config = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.radius_km, 5.0);
        assert_eq!(config.years, YearRange::new(2019, 2020));
        assert_eq!(config.max_retries, 5);
        assert_eq!(
            config.aggregate_scope,
            AggregateScope::Grid { cell_degrees: 0.05 }
        );
        let layout = config.storage.resolve().unwrap();
        assert_eq!(layout.raw, PathBuf::from("/tmp/aq/raw"));
        assert_eq!(layout.gold, PathBuf::from("/tmp/aq/gold"));
    }

    #[test]
    fn rejects_radius_beyond_api_limit() {
        let config = PipelineConfig::builder().radius_km(30.0).build();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "radius_km", .. })
        ));
    }

    #[test]
    fn rejects_empty_year_range() {
        let config = PipelineConfig::builder().years(YearRange::new(2021, 2020)).build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn canonical_override_applies_to_whole_kind() {
        let mut overrides = BTreeMap::new();
        overrides.insert("no2".to_string(), "µg/m³".to_string());
        let config = PipelineConfig::builder().canonical_units(overrides).build();
        let units = config.canonical_units().unwrap();
        assert_eq!(units.for_parameter("o3"), Some(Unit::MicrogramsPerCubicMeter));
        assert_eq!(units.for_parameter("pm25"), Some(Unit::MicrogramsPerCubicMeter));
        assert_eq!(units.for_parameter("temperature"), Some(Unit::Celsius));
        assert_eq!(units.for_parameter("wind_speed"), None);
    }

    #[test]
    fn gas_override_to_mass_concentration_is_accepted() {
        let mut overrides = BTreeMap::new();
        overrides.insert("o3".to_string(), "µg/m³".to_string());
        let config = PipelineConfig::builder().canonical_units(overrides).build();
        assert!(config.validate().is_ok());
        let units = config.canonical_units().unwrap();
        assert_eq!(units.for_parameter("o3"), Some(Unit::MicrogramsPerCubicMeter));
        assert_eq!(units.for_parameter("no2"), Some(Unit::MicrogramsPerCubicMeter));
        assert_eq!(units.for_parameter("pm25"), Some(Unit::MicrogramsPerCubicMeter));
    }

    #[test]
    fn temperature_override_accepts_fahrenheit() {
        let mut overrides = BTreeMap::new();
        overrides.insert("temperature".to_string(), "°F".to_string());
        let config = PipelineConfig::builder().canonical_units(overrides).build();
        assert_eq!(
            config.canonical_units().unwrap().for_parameter("temperature"),
            Some(Unit::Fahrenheit)
        );
    }

    #[test]
    fn page_limit_is_capped_at_provider_maximum() {
        assert!(PipelineConfig::builder().page_limit(1000).build().validate().is_ok());
        assert!(matches!(
            PipelineConfig::builder().page_limit(1001).build().validate(),
            Err(ConfigError::InvalidValue { field: "page_limit", .. })
        ));
        assert!(PipelineConfig::builder().page_limit(0).build().validate().is_err());
    }

    #[test]
    fn conflicting_overrides_within_kind_are_rejected() {
        let mut overrides = BTreeMap::new();
        overrides.insert("no2".to_string(), "ppb".to_string());
        overrides.insert("o3".to_string(), "ppm".to_string());
        let config = PipelineConfig::builder().canonical_units(overrides).build();
        assert!(matches!(
            config.canonical_units(),
            Err(ConfigError::InconsistentCanonicalUnits { .. })
        ));
    }

    #[test]
    fn override_must_match_parameter_kind() {
        let mut overrides = BTreeMap::new();
        overrides.insert("pm25".to_string(), "°C".to_string());
        let config = PipelineConfig::builder().canonical_units(overrides).build();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnitKindMismatch { .. })
        ));
    }
}
