use crate::archive::error::ArchiveError;
use crate::archive::{artifact_path, RawEnvelope, RAW_SCHEMA_VERSION};
use crate::checkpoint::{CheckpointReceipt, CheckpointStore};
use crate::fetcher::unit_fetcher::FetchedUnit;
use crate::types::sensor::Sensor;
use crate::utils::{gzip, write_atomic};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Persists fetched units and records them in the checkpoint store, in that
/// order.
pub struct RawArchiver {
    raw_root: PathBuf,
    checkpoints: Arc<dyn CheckpointStore>,
}

impl RawArchiver {
    pub fn new(raw_root: &Path, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            raw_root: raw_root.to_path_buf(),
            checkpoints,
        }
    }

    /// Writes the artifact, then marks the unit complete. If the checkpoint
    /// fails the artifact stays on disk but the unit remains pending, so the
    /// next run re-fetches and overwrites it.
    pub async fn archive(
        &self,
        sensor: &Sensor,
        fetched: FetchedUnit,
    ) -> Result<CheckpointReceipt, ArchiveError> {
        let unit = fetched.unit;
        let (_, receipt) = self.write_artifact(sensor, fetched).await?;
        let checkpoints = Arc::clone(&self.checkpoints);
        let marked = receipt.clone();
        tokio::task::spawn_blocking(move || checkpoints.mark_complete(&unit, &marked)).await??;
        Ok(receipt)
    }

    /// Serializes, compresses and atomically writes the artifact without
    /// touching the checkpoint store.
    pub async fn write_artifact(
        &self,
        sensor: &Sensor,
        fetched: FetchedUnit,
    ) -> Result<(PathBuf, CheckpointReceipt), ArchiveError> {
        debug_assert_eq!(sensor.id, fetched.unit.sensor_id);
        let unit = fetched.unit;
        let page_count = fetched.pages.len() as u32;
        let envelope = RawEnvelope {
            schema_version: RAW_SCHEMA_VERSION,
            sensor: sensor.clone(),
            year: unit.year,
            pages: fetched.pages,
        };
        let json = serde_json::to_vec(&envelope).map_err(ArchiveError::Serialize)?;
        let compressed = gzip(&json).await.map_err(ArchiveError::Compress)?;
        let path = artifact_path(&self.raw_root, &unit);
        let artifact_bytes = compressed.len() as u64;
        write_atomic(&path, compressed)
            .await
            .map_err(|e| ArchiveError::Write(path.clone(), e))?;
        info!(
            "Archived {} ({} pages, {} bytes compressed from {}) to {}",
            unit,
            page_count,
            artifact_bytes,
            json.len(),
            path.display()
        );
        Ok((
            path,
            CheckpointReceipt {
                sensor_id: unit.sensor_id,
                year: unit.year,
                pages: page_count,
                records: fetched.records,
                artifact_bytes,
            },
        ))
    }
}
