use crate::gold::error::GoldError;
use crate::types::records::AggregateRecord;
use crate::utils::write_atomic;
use chrono::Datelike;
use log::info;
use polars::prelude::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::task;

/// Layout version of gold partitions.
pub const GOLD_SCHEMA_DIR: &str = "v1";

/// `{gold}/v1/{year}/{group}.parquet`
pub fn partition_path(gold_root: &Path, year: i32, group: &str) -> PathBuf {
    gold_root
        .join(GOLD_SCHEMA_DIR)
        .join(year.to_string())
        .join(format!("{group}.parquet"))
}

/// Splits aggregates into their (year, group) partitions. Input order is
/// kept within each partition.
pub fn partition(records: Vec<AggregateRecord>) -> BTreeMap<(i32, String), Vec<AggregateRecord>> {
    let mut partitions: BTreeMap<(i32, String), Vec<AggregateRecord>> = BTreeMap::new();
    for record in records {
        partitions
            .entry((record.bucket_start.year(), record.group.clone()))
            .or_default()
            .push(record);
    }
    partitions
}

pub fn to_dataframe(records: &[AggregateRecord]) -> PolarsResult<DataFrame> {
    DataFrame::new(vec![
        Column::new(
            "group".into(),
            records.iter().map(|r| r.group.as_str()).collect::<Vec<&str>>(),
        ),
        Column::new(
            "bucket".into(),
            records.iter().map(|r| r.bucket.to_string()).collect::<Vec<String>>(),
        ),
        Column::new(
            "bucket_start".into(),
            records
                .iter()
                .map(|r| r.bucket_start.timestamp())
                .collect::<Vec<i64>>(),
        ),
        Column::new(
            "parameter".into(),
            records.iter().map(|r| r.parameter.as_str()).collect::<Vec<&str>>(),
        ),
        Column::new(
            "unit".into(),
            records.iter().map(|r| r.unit.as_str()).collect::<Vec<&str>>(),
        ),
        Column::new(
            "count".into(),
            records.iter().map(|r| r.count).collect::<Vec<u32>>(),
        ),
        Column::new("mean".into(), records.iter().map(|r| r.mean).collect::<Vec<f64>>()),
        Column::new("min".into(), records.iter().map(|r| r.min).collect::<Vec<f64>>()),
        Column::new("max".into(), records.iter().map(|r| r.max).collect::<Vec<f64>>()),
        Column::new(
            "completeness".into(),
            records.iter().map(|r| r.completeness).collect::<Vec<f64>>(),
        ),
    ])
}

pub async fn write_partition(path: &Path, records: Vec<AggregateRecord>) -> Result<(), GoldError> {
    let path_buf = path.to_path_buf();
    let bytes = task::spawn_blocking(move || {
        let mut df = to_dataframe(&records).map_err(GoldError::Frame)?;
        let mut buffer = Vec::new();
        ParquetWriter::new(&mut buffer)
            .with_compression(ParquetCompression::Snappy)
            .finish(&mut df)
            .map_err(|e| GoldError::ParquetWritePolars(path_buf, e))?;
        Ok::<Vec<u8>, GoldError>(buffer)
    })
    .await??;
    write_atomic(path, bytes)
        .await
        .map_err(|e| GoldError::ParquetWriteIo(path.to_path_buf(), e))
}

/// Deletes parquet files in `{gold}/v1/{year}` that are not in `keep`.
pub async fn remove_stale(gold_root: &Path, year: i32, keep: &[PathBuf]) -> Result<usize, GoldError> {
    let dir = gold_root.join(GOLD_SCHEMA_DIR).join(year.to_string());
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(GoldError::StaleRemoval(dir, e)),
    };
    let mut removed = 0;
    loop {
        let entry = entries
            .next_entry()
            .await
            .map_err(|e| GoldError::StaleRemoval(dir.clone(), e))?;
        let Some(entry) = entry else { break };
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("parquet") || keep.contains(&path) {
            continue;
        }
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| GoldError::StaleRemoval(path.clone(), e))?;
        info!("Removed stale gold partition {}", path.display());
        removed += 1;
    }
    Ok(removed)
}

/// Lazily scans every gold partition.
///
/// `bucket_start` is exposed as a UTC datetime column.
pub fn scan(gold_root: &Path) -> Result<LazyFrame, GoldError> {
    let base = gold_root.join(GOLD_SCHEMA_DIR);
    let mut files = Vec::new();
    if let Ok(years) = std::fs::read_dir(&base) {
        for year in years.flatten() {
            if let Ok(entries) = std::fs::read_dir(year.path()) {
                files.extend(
                    entries
                        .flatten()
                        .map(|e| e.path())
                        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("parquet")),
                );
            }
        }
    }
    if files.is_empty() {
        return Err(GoldError::Empty(base));
    }
    files.sort();
    let frames = files
        .iter()
        .map(|path| {
            LazyFrame::scan_parquet(path, Default::default())
                .map_err(|e| GoldError::ParquetScan(path.clone(), e))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let lf = concat(frames, UnionArgs::default()).map_err(|e| GoldError::ParquetScan(base, e))?;
    Ok(lf.with_column(
        (col("bucket_start") * lit(1000i64))
            .cast(DataType::Datetime(TimeUnit::Milliseconds, Some("UTC".into())))
            .alias("bucket_start"),
    ))
}
