pub mod fetch_unit;
pub mod records;
pub mod sensor;
pub mod summary;
