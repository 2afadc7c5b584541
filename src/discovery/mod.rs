//! Sensor discovery: which sensors exist around a point, and the snapshot
//! that records them for the later stages.

pub mod error;
pub mod locate_sensors;
pub mod snapshot;

pub use locate_sensors::SensorLocator;
