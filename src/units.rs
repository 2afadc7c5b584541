//! Parameter kinds, unit parsing and conversion to canonical units.
//!
//! Every parameter belongs to a [`ParameterKind`]. All parameters of one kind
//! share a single canonical [`Unit`], so values of e.g. `pm10` and `pm25` are
//! always comparable after the silver stage.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Molar volume of an ideal gas at 25 °C and 1 atm, in litres.
const MOLAR_VOLUME_L: f64 = 24.45;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    ParticulateMass,
    Gas,
    ParticleCount,
    Temperature,
    Humidity,
    Pressure,
    Other,
}

impl ParameterKind {
    pub fn of(parameter: &str) -> Self {
        match parameter.to_ascii_lowercase().as_str() {
            "pm1" | "pm10" | "pm25" | "pm4" | "bc" => ParameterKind::ParticulateMass,
            "o3" | "no2" | "so2" | "co" | "no" | "nox" | "ch4" | "co2" => ParameterKind::Gas,
            "um003" | "um005" | "um010" | "um025" | "um050" | "um100" => {
                ParameterKind::ParticleCount
            }
            "temperature" => ParameterKind::Temperature,
            "relativehumidity" | "humidity" => ParameterKind::Humidity,
            "pressure" => ParameterKind::Pressure,
            _ => ParameterKind::Other,
        }
    }

    /// Canonical unit used when the configuration does not override it.
    pub fn default_unit(&self) -> Option<Unit> {
        match self {
            ParameterKind::ParticulateMass => Some(Unit::MicrogramsPerCubicMeter),
            ParameterKind::Gas => Some(Unit::Ppb),
            ParameterKind::ParticleCount => Some(Unit::ParticlesPerCubicCentimeter),
            ParameterKind::Temperature => Some(Unit::Celsius),
            ParameterKind::Humidity => Some(Unit::Percent),
            ParameterKind::Pressure => Some(Unit::Hectopascal),
            ParameterKind::Other => None,
        }
    }

    /// Whether a negative value is physically meaningless for this kind.
    pub fn is_non_negative(&self) -> bool {
        !matches!(self, ParameterKind::Temperature | ParameterKind::Other)
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParameterKind::ParticulateMass => "particulate_mass",
            ParameterKind::Gas => "gas",
            ParameterKind::ParticleCount => "particle_count",
            ParameterKind::Temperature => "temperature",
            ParameterKind::Humidity => "humidity",
            ParameterKind::Pressure => "pressure",
            ParameterKind::Other => "other",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Unit {
    MicrogramsPerCubicMeter,
    Ppm,
    Ppb,
    ParticlesPerCubicCentimeter,
    Celsius,
    Fahrenheit,
    Kelvin,
    Percent,
    Hectopascal,
    Other(String),
}

impl Unit {
    /// Parses the unit spellings seen in OpenAQ payloads. Both the micro sign
    /// (U+00B5) and the Greek mu (U+03BC) are accepted.
    pub fn parse(raw: &str) -> Unit {
        let normalized: String = raw
            .trim()
            .to_lowercase()
            .replace(['µ', 'μ'], "u")
            .replace('³', "3")
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect();
        match normalized.as_str() {
            "ug/m3" => Unit::MicrogramsPerCubicMeter,
            "ppm" => Unit::Ppm,
            "ppb" => Unit::Ppb,
            "particles/cm3" | "#/cm3" => Unit::ParticlesPerCubicCentimeter,
            "c" | "°c" | "degc" | "celsius" => Unit::Celsius,
            "f" | "°f" | "degf" | "fahrenheit" => Unit::Fahrenheit,
            "k" | "kelvin" => Unit::Kelvin,
            "%" | "percent" => Unit::Percent,
            "hpa" | "mb" | "mbar" => Unit::Hectopascal,
            _ => Unit::Other(raw.trim().to_string()),
        }
    }

    pub fn kind(&self) -> Option<ParameterKind> {
        match self {
            Unit::MicrogramsPerCubicMeter => Some(ParameterKind::ParticulateMass),
            Unit::Ppm | Unit::Ppb => Some(ParameterKind::Gas),
            Unit::ParticlesPerCubicCentimeter => Some(ParameterKind::ParticleCount),
            Unit::Celsius | Unit::Fahrenheit | Unit::Kelvin => Some(ParameterKind::Temperature),
            Unit::Percent => Some(ParameterKind::Humidity),
            Unit::Hectopascal => Some(ParameterKind::Pressure),
            Unit::Other(_) => None,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unit::MicrogramsPerCubicMeter => write!(f, "µg/m³"),
            Unit::Ppm => write!(f, "ppm"),
            Unit::Ppb => write!(f, "ppb"),
            Unit::ParticlesPerCubicCentimeter => write!(f, "particles/cm³"),
            Unit::Celsius => write!(f, "°C"),
            Unit::Fahrenheit => write!(f, "°F"),
            Unit::Kelvin => write!(f, "K"),
            Unit::Percent => write!(f, "%"),
            Unit::Hectopascal => write!(f, "hPa"),
            Unit::Other(s) => write!(f, "{s}"),
        }
    }
}

/// Molecular weight in g/mol, needed for mixing ratio ↔ mass concentration.
fn molecular_weight(parameter: &str) -> Option<f64> {
    match parameter.to_ascii_lowercase().as_str() {
        "o3" => Some(48.00),
        "no2" | "nox" => Some(46.01),
        "so2" => Some(64.07),
        "co" => Some(28.01),
        "no" => Some(30.01),
        "ch4" => Some(16.04),
        "co2" => Some(44.01),
        _ => None,
    }
}

/// Converts `value` of `parameter` from `from` to `to`.
///
/// Returns `None` when no conversion is known, e.g. between kinds or for a gas
/// without a tabulated molecular weight.
pub fn convert(parameter: &str, value: f64, from: &Unit, to: &Unit) -> Option<f64> {
    if from == to {
        return Some(value);
    }
    let ppb_factor = |p: &str| molecular_weight(p).map(|mw| mw / MOLAR_VOLUME_L);
    match (from, to) {
        (Unit::Ppm, Unit::Ppb) => Some(value * 1000.0),
        (Unit::Ppb, Unit::Ppm) => Some(value / 1000.0),
        (Unit::Ppb, Unit::MicrogramsPerCubicMeter) => ppb_factor(parameter).map(|k| value * k),
        (Unit::Ppm, Unit::MicrogramsPerCubicMeter) => {
            ppb_factor(parameter).map(|k| value * 1000.0 * k)
        }
        (Unit::MicrogramsPerCubicMeter, Unit::Ppb) => ppb_factor(parameter).map(|k| value / k),
        (Unit::MicrogramsPerCubicMeter, Unit::Ppm) => {
            ppb_factor(parameter).map(|k| value / k / 1000.0)
        }
        (Unit::Fahrenheit, Unit::Celsius) => Some((value - 32.0) * 5.0 / 9.0),
        (Unit::Kelvin, Unit::Celsius) => Some(value - 273.15),
        (Unit::Celsius, Unit::Fahrenheit) => Some(value * 9.0 / 5.0 + 32.0),
        (Unit::Celsius, Unit::Kelvin) => Some(value + 273.15),
        (Unit::Fahrenheit, Unit::Kelvin) => Some((value - 32.0) * 5.0 / 9.0 + 273.15),
        (Unit::Kelvin, Unit::Fahrenheit) => Some((value - 273.15) * 9.0 / 5.0 + 32.0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn parses_both_micro_spellings() {
        assert_eq!(Unit::parse("µg/m³"), Unit::MicrogramsPerCubicMeter);
        assert_eq!(Unit::parse("μg/m³"), Unit::MicrogramsPerCubicMeter);
        assert_eq!(Unit::parse("ug/m3"), Unit::MicrogramsPerCubicMeter);
        assert_eq!(Unit::parse(" ppm "), Unit::Ppm);
        assert_eq!(Unit::parse("°C"), Unit::Celsius);
        assert_eq!(Unit::parse("widgets"), Unit::Other("widgets".to_string()));
    }

    #[test]
    fn classifies_parameters() {
        assert_eq!(ParameterKind::of("pm25"), ParameterKind::ParticulateMass);
        assert_eq!(ParameterKind::of("PM10"), ParameterKind::ParticulateMass);
        assert_eq!(ParameterKind::of("no2"), ParameterKind::Gas);
        assert_eq!(ParameterKind::of("temperature"), ParameterKind::Temperature);
        assert_eq!(ParameterKind::of("um003"), ParameterKind::ParticleCount);
        assert_eq!(ParameterKind::of("wind_speed"), ParameterKind::Other);
    }

    #[test]
    fn temperature_may_be_negative() {
        assert!(!ParameterKind::Temperature.is_non_negative());
        assert!(ParameterKind::ParticulateMass.is_non_negative());
        assert!(ParameterKind::Gas.is_non_negative());
    }

    #[test]
    fn converts_mixing_ratios() {
        assert_eq!(convert("o3", 0.04, &Unit::Ppm, &Unit::Ppb), Some(40.0));
        assert_eq!(convert("o3", 40.0, &Unit::Ppb, &Unit::Ppm), Some(0.04));
    }

    #[test]
    fn converts_gas_to_mass_concentration() {
        let ug = convert("no2", 10.0, &Unit::Ppb, &Unit::MicrogramsPerCubicMeter).unwrap();
        assert!(close(ug, 10.0 * 46.01 / 24.45));
        let back = convert("no2", ug, &Unit::MicrogramsPerCubicMeter, &Unit::Ppb).unwrap();
        assert!(close(back, 10.0));
        assert_eq!(
            convert("pm25", 1.0, &Unit::Ppb, &Unit::MicrogramsPerCubicMeter),
            None
        );
    }

    #[test]
    fn converts_temperatures() {
        assert!(close(
            convert("temperature", 212.0, &Unit::Fahrenheit, &Unit::Celsius).unwrap(),
            100.0
        ));
        assert!(close(
            convert("temperature", 273.15, &Unit::Kelvin, &Unit::Celsius).unwrap(),
            0.0
        ));
    }

    #[test]
    fn refuses_cross_kind_conversion() {
        assert_eq!(
            convert("pm25", 1.0, &Unit::Celsius, &Unit::MicrogramsPerCubicMeter),
            None
        );
    }
}
