use crate::silver::error::SilverError;
use crate::types::fetch_unit::FetchUnit;
use crate::types::records::CleanedRecord;
use crate::utils::write_atomic;
use chrono::DateTime;
use polars::prelude::*;
use std::path::{Path, PathBuf};
use tokio::task;

/// Layout version of silver partitions.
pub const SILVER_SCHEMA_DIR: &str = "v1";

/// `{silver}/v1/{year}/sensor-{id}.parquet`
pub fn partition_path(silver_root: &Path, unit: &FetchUnit) -> PathBuf {
    silver_root
        .join(SILVER_SCHEMA_DIR)
        .join(unit.year.to_string())
        .join(format!("sensor-{}.parquet", unit.sensor_id))
}

/// Recovers the unit from a partition path written by [`partition_path`].
pub fn unit_from_path(path: &Path) -> Option<FetchUnit> {
    let year = path.parent()?.file_name()?.to_str()?.parse().ok()?;
    let sensor_id = path
        .file_stem()?
        .to_str()?
        .strip_prefix("sensor-")?
        .parse()
        .ok()?;
    Some(FetchUnit::new(sensor_id, year))
}

/// Every silver partition on disk, sorted by year then sensor.
pub fn list_partitions(silver_root: &Path) -> std::io::Result<Vec<(FetchUnit, PathBuf)>> {
    let base = silver_root.join(SILVER_SCHEMA_DIR);
    let mut found = Vec::new();
    let years = match std::fs::read_dir(&base) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
        Err(e) => return Err(e),
    };
    for year_dir in years {
        let year_dir = year_dir?.path();
        if !year_dir.is_dir() {
            continue;
        }
        for file in std::fs::read_dir(&year_dir)? {
            let path = file?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            if let Some(unit) = unit_from_path(&path) {
                found.push((unit, path));
            }
        }
    }
    found.sort_by_key(|(unit, _)| (unit.year, unit.sensor_id));
    Ok(found)
}

pub fn to_dataframe(records: &[CleanedRecord]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Column::new(
            "sensor_id".into(),
            records.iter().map(|r| r.sensor_id).collect::<Vec<u64>>(),
        ),
        Column::new(
            "timestamp".into(),
            records.iter().map(|r| r.timestamp.timestamp()).collect::<Vec<i64>>(),
        ),
        Column::new(
            "parameter".into(),
            records.iter().map(|r| r.parameter.as_str()).collect::<Vec<&str>>(),
        ),
        Column::new(
            "value".into(),
            records.iter().map(|r| r.value).collect::<Vec<f64>>(),
        ),
        Column::new(
            "unit".into(),
            records.iter().map(|r| r.unit.as_str()).collect::<Vec<&str>>(),
        ),
        Column::new(
            "has_flags".into(),
            records.iter().map(|r| r.has_flags).collect::<Vec<bool>>(),
        ),
    ])
}

pub fn from_dataframe(path: &Path, df: &DataFrame) -> Result<Vec<CleanedRecord>, SilverError> {
    let read = |e: PolarsError| SilverError::ParquetReadPolars(path.to_path_buf(), e);
    let column = |name: &str| {
        df.column(name)
            .map(Column::as_materialized_series)
            .map_err(read)
    };
    let sensor_ids = column("sensor_id")?.u64().map_err(read)?;
    let timestamps = column("timestamp")?.i64().map_err(read)?;
    let parameters = column("parameter")?.str().map_err(read)?;
    let values = column("value")?.f64().map_err(read)?;
    let units = column("unit")?.str().map_err(read)?;
    let flags = column("has_flags")?.bool().map_err(read)?;

    let schema = |reason: String| SilverError::Schema {
        path: path.to_path_buf(),
        reason,
    };
    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(sensor_id), Some(ts), Some(parameter), Some(value), Some(unit)) = (
            sensor_ids.get(i),
            timestamps.get(i),
            parameters.get(i),
            values.get(i),
            units.get(i),
        ) else {
            return Err(schema(format!("null field in row {i}")));
        };
        let timestamp = DateTime::from_timestamp(ts, 0)
            .ok_or_else(|| schema(format!("timestamp {ts} out of range in row {i}")))?;
        records.push(CleanedRecord {
            sensor_id,
            timestamp,
            parameter: parameter.to_string(),
            value,
            unit: unit.to_string(),
            has_flags: flags.get(i).unwrap_or(false),
        });
    }
    Ok(records)
}

/// Encodes `records` as a Snappy parquet file and atomically replaces `path`.
pub async fn write_partition(path: &Path, records: Vec<CleanedRecord>) -> Result<(), SilverError> {
    let path_buf = path.to_path_buf();
    let bytes = task::spawn_blocking(move || {
        let mut df = to_dataframe(&records).map_err(SilverError::Frame)?;
        let mut buffer = Vec::new();
        ParquetWriter::new(&mut buffer)
            .with_compression(ParquetCompression::Snappy)
            .finish(&mut df)
            .map_err(|e| SilverError::ParquetWritePolars(path_buf, e))?;
        Ok::<Vec<u8>, SilverError>(buffer)
    })
    .await??;
    write_atomic(path, bytes)
        .await
        .map_err(|e| SilverError::ParquetWriteIo(path.to_path_buf(), e))
}

pub async fn read_partition(path: &Path) -> Result<Vec<CleanedRecord>, SilverError> {
    let path_buf = path.to_path_buf();
    task::spawn_blocking(move || {
        let file = std::fs::File::open(&path_buf)
            .map_err(|e| SilverError::ParquetReadIo(path_buf.clone(), e))?;
        let df = ParquetReader::new(file)
            .finish()
            .map_err(|e| SilverError::ParquetReadPolars(path_buf.clone(), e))?;
        from_dataframe(&path_buf, &df)
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn cleaned(hour: u32, value: f64) -> CleanedRecord {
        CleanedRecord {
            sensor_id: 9,
            timestamp: Utc.with_ymd_and_hms(2021, 2, 3, hour, 0, 0).unwrap(),
            parameter: "pm10".to_string(),
            value,
            unit: "µg/m³".to_string(),
            has_flags: hour % 2 == 0,
        }
    }

    #[test]
    fn path_is_versioned_and_partitioned() {
        let unit = FetchUnit::new(9, 2021);
        let path = partition_path(Path::new("/data/silver"), &unit);
        assert_eq!(path, Path::new("/data/silver/v1/2021/sensor-9.parquet"));
        assert_eq!(unit_from_path(&path), Some(unit));
    }

    #[tokio::test]
    async fn parquet_partition_reads_back_the_same_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = partition_path(dir.path(), &FetchUnit::new(9, 2021));
        let records = vec![cleaned(0, 1.5), cleaned(1, 2.5), cleaned(2, 0.0)];

        write_partition(&path, records.clone()).await.unwrap();
        assert_eq!(read_partition(&path).await.unwrap(), records);

        let listed = list_partitions(dir.path()).unwrap();
        assert_eq!(listed, vec![(FetchUnit::new(9, 2021), path)]);
    }

    #[tokio::test]
    async fn rewriting_replaces_the_partition() {
        let dir = tempfile::tempdir().unwrap();
        let path = partition_path(dir.path(), &FetchUnit::new(9, 2021));
        write_partition(&path, vec![cleaned(0, 1.0), cleaned(1, 2.0)]).await.unwrap();
        write_partition(&path, vec![cleaned(5, 3.0)]).await.unwrap();
        assert_eq!(read_partition(&path).await.unwrap(), vec![cleaned(5, 3.0)]);
    }

    #[test]
    fn missing_silver_root_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_partitions(&dir.path().join("absent")).unwrap().is_empty());
    }
}
