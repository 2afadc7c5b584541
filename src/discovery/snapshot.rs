//! The gzip JSON sensor snapshot shared by later stages.

use crate::discovery::error::DiscoveryError;
use crate::types::sensor::Sensor;
use crate::utils::{gunzip, gzip, write_atomic};
use log::info;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

pub async fn load(path: &Path) -> Result<Vec<Sensor>, DiscoveryError> {
    let compressed = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DiscoveryError::NoSnapshot(path.to_path_buf()))
        }
        Err(e) => return Err(DiscoveryError::SnapshotRead(path.to_path_buf(), e)),
    };
    let json = gunzip(&compressed)
        .await
        .map_err(|e| DiscoveryError::SnapshotRead(path.to_path_buf(), e))?;
    serde_json::from_slice(&json).map_err(|e| DiscoveryError::SnapshotDecode(path.to_path_buf(), e))
}

/// Snapshot keyed by sensor id; empty when no snapshot exists yet.
pub async fn load_map(path: &Path) -> Result<HashMap<u64, Sensor>, DiscoveryError> {
    match load(path).await {
        Ok(sensors) => Ok(sensors.into_iter().map(|s| (s.id, s)).collect()),
        Err(DiscoveryError::NoSnapshot(_)) => Ok(HashMap::new()),
        Err(e) => Err(e),
    }
}

/// Adds `discovered` sensors that are not yet in the snapshot. Existing
/// entries are kept as they are, even if the API now reports them
/// differently. Returns the merged snapshot (sorted by id) and the number of
/// sensors added.
pub async fn merge(path: &Path, discovered: &[Sensor]) -> Result<(Vec<Sensor>, usize), DiscoveryError> {
    let mut by_id: BTreeMap<u64, Sensor> = match load(path).await {
        Ok(existing) => existing.into_iter().map(|s| (s.id, s)).collect(),
        Err(DiscoveryError::NoSnapshot(_)) => BTreeMap::new(),
        Err(e) => return Err(e),
    };
    let mut added = 0;
    for sensor in discovered {
        if !by_id.contains_key(&sensor.id) {
            by_id.insert(sensor.id, sensor.clone());
            added += 1;
        }
    }
    let merged: Vec<Sensor> = by_id.into_values().collect();
    if added > 0 || !path.exists() {
        let json = serde_json::to_vec(&merged).map_err(DiscoveryError::SnapshotEncode)?;
        let compressed = gzip(&json)
            .await
            .map_err(|e| DiscoveryError::SnapshotWrite(path.to_path_buf(), e))?;
        write_atomic(path, compressed)
            .await
            .map_err(|e| DiscoveryError::SnapshotWrite(path.to_path_buf(), e))?;
        info!(
            "Sensor snapshot {} now holds {} sensors ({} new)",
            path.display(),
            merged.len(),
            added
        );
    }
    Ok((merged, added))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sensor;

    #[tokio::test]
    async fn merge_adds_new_sensors_without_touching_existing_ones() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensors.json.gz");

        let original = sensor(1, 1);
        let (merged, added) = merge(&path, &[original.clone()]).await.unwrap();
        assert_eq!((merged.len(), added), (1, 1));

        let mut renamed = sensor(1, 1);
        renamed.location_name = Some("Renamed".to_string());
        let (merged, added) = merge(&path, &[renamed, sensor(2, 1)]).await.unwrap();
        assert_eq!(added, 1);
        assert_eq!(merged[0], original);

        let reloaded = load(&path).await.unwrap();
        assert_eq!(reloaded, merged);
    }

    #[tokio::test]
    async fn missing_snapshot_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sensors.json.gz");
        assert!(matches!(load(&path).await, Err(DiscoveryError::NoSnapshot(_))));
        assert!(load_map(&path).await.unwrap().is_empty());
    }
}
