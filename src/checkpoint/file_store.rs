use crate::checkpoint::error::CheckpointError;
use crate::checkpoint::{CheckpointReceipt, CheckpointStore};
use crate::types::fetch_unit::{FetchUnit, UnitState};
use bincode::config::{Configuration, Fixint, LittleEndian};
use log::{debug, info};
use std::collections::HashSet;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const MARKER_EXTENSION: &str = "finished";
const BINCODE_CONFIG: Configuration<LittleEndian, Fixint> =
    bincode::config::standard().with_fixed_int_encoding();

/// One marker file per complete unit: `{dir}/{sensor_id}_{year}.finished`.
///
/// Markers are written to a temp file, fsynced and renamed without clobbering,
/// so a crash mid-write leaves the unit pending and two racing writers cannot
/// both create it. The in-progress state lives in memory and only guards
/// workers of the same process.
#[derive(Debug)]
pub struct FileCheckpointStore {
    dir: PathBuf,
    in_progress: Mutex<HashSet<FetchUnit>>,
    write_lock: Mutex<()>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FileCheckpointStore {
    pub fn new(dir: &Path) -> Result<Self, CheckpointError> {
        std::fs::create_dir_all(dir).map_err(|e| CheckpointError::DirCreation(dir.to_path_buf(), e))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            in_progress: Mutex::new(HashSet::new()),
            write_lock: Mutex::new(()),
        })
    }

    pub fn marker_path(&self, unit: &FetchUnit) -> PathBuf {
        self.dir
            .join(format!("{}_{}.{}", unit.sensor_id, unit.year, MARKER_EXTENSION))
    }

    fn marker_exists(&self, path: &Path) -> Result<bool, CheckpointError> {
        match std::fs::metadata(path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CheckpointError::Read(path.to_path_buf(), e)),
        }
    }

    fn parse_marker_name(name: &str) -> Option<FetchUnit> {
        let stem = name.strip_suffix(MARKER_EXTENSION)?.strip_suffix('.')?;
        let (sensor, year) = stem.split_once('_')?;
        Some(FetchUnit::new(sensor.parse().ok()?, year.parse().ok()?))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn state(&self, unit: &FetchUnit) -> Result<UnitState, CheckpointError> {
        if self.marker_exists(&self.marker_path(unit))? {
            return Ok(UnitState::Complete);
        }
        if lock(&self.in_progress).contains(unit) {
            return Ok(UnitState::InProgress);
        }
        Ok(UnitState::Pending)
    }

    fn try_begin(&self, unit: &FetchUnit) -> Result<bool, CheckpointError> {
        let mut in_progress = lock(&self.in_progress);
        if self.marker_exists(&self.marker_path(unit))? {
            return Ok(false);
        }
        Ok(in_progress.insert(*unit))
    }

    fn release(&self, unit: &FetchUnit) {
        lock(&self.in_progress).remove(unit);
    }

    fn mark_complete(
        &self,
        unit: &FetchUnit,
        receipt: &CheckpointReceipt,
    ) -> Result<(), CheckpointError> {
        let _guard = lock(&self.write_lock);
        let path = self.marker_path(unit);
        if self.marker_exists(&path)? {
            debug!("{} already checkpointed", unit);
            self.release(unit);
            return Ok(());
        }

        let bytes = bincode::serde::encode_to_vec(receipt, BINCODE_CONFIG)
            .map_err(|e| CheckpointError::Encode(Box::new(e)))?;
        let write_err = |e| CheckpointError::Write(path.clone(), e);
        let mut temp = tempfile::NamedTempFile::new_in(&self.dir).map_err(write_err)?;
        temp.write_all(&bytes).map_err(write_err)?;
        temp.as_file().sync_all().map_err(write_err)?;
        match temp.persist_noclobber(&path) {
            Ok(_) => {}
            // Another writer got there first; the unit is complete either way.
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(write_err(e.error)),
        }
        // Make the rename itself durable. Directories cannot be opened for
        // syncing on every platform, so this is best effort.
        if let Ok(dir) = std::fs::File::open(&self.dir) {
            let _ = dir.sync_all();
        }
        self.release(unit);
        info!("Checkpointed {}", unit);
        Ok(())
    }

    fn invalidate(&self, unit: &FetchUnit) -> Result<(), CheckpointError> {
        let _guard = lock(&self.write_lock);
        let path = self.marker_path(unit);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("Invalidated checkpoint of {}", unit);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::Remove(path, e)),
        }
    }

    fn receipt(&self, unit: &FetchUnit) -> Result<Option<CheckpointReceipt>, CheckpointError> {
        let path = self.marker_path(unit);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::Read(path, e)),
        };
        let (receipt, _) = bincode::serde::decode_from_slice::<CheckpointReceipt, _>(&bytes, BINCODE_CONFIG)
            .map_err(|e| CheckpointError::Decode(path.clone(), Box::new(e)))?;
        Ok(Some(receipt))
    }

    fn list_complete(&self) -> Result<Vec<FetchUnit>, CheckpointError> {
        let entries =
            std::fs::read_dir(&self.dir).map_err(|e| CheckpointError::Read(self.dir.clone(), e))?;
        let mut units = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CheckpointError::Read(self.dir.clone(), e))?;
            if let Some(unit) = entry.file_name().to_str().and_then(Self::parse_marker_name) {
                units.push(unit);
            }
        }
        units.sort();
        Ok(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receipt(unit: &FetchUnit) -> CheckpointReceipt {
        CheckpointReceipt {
            sensor_id: unit.sensor_id,
            year: unit.year,
            pages: 2,
            records: 1500,
            artifact_bytes: 4096,
        }
    }

    #[test]
    fn marks_and_reports_complete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let unit = FetchUnit::new(42, 2021);
        assert!(!store.is_complete(&unit).unwrap());
        store.mark_complete(&unit, &receipt(&unit)).unwrap();
        assert!(store.is_complete(&unit).unwrap());
        assert_eq!(store.receipt(&unit).unwrap(), Some(receipt(&unit)));
        assert!(dir.path().join("42_2021.finished").exists());
    }

    #[test]
    fn mark_complete_is_idempotent_and_keeps_first_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let unit = FetchUnit::new(1, 2020);
        store.mark_complete(&unit, &receipt(&unit)).unwrap();
        let before = std::fs::read(store.marker_path(&unit)).unwrap();

        let mut other = receipt(&unit);
        other.records = 1;
        store.mark_complete(&unit, &other).unwrap();
        assert_eq!(std::fs::read(store.marker_path(&unit)).unwrap(), before);
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let unit = FetchUnit::new(5, 2019);
        FileCheckpointStore::new(dir.path())
            .unwrap()
            .mark_complete(&unit, &receipt(&unit))
            .unwrap();
        let reopened = FileCheckpointStore::new(dir.path()).unwrap();
        assert!(reopened.is_complete(&unit).unwrap());
        assert_eq!(reopened.list_complete().unwrap(), vec![unit]);
    }

    #[test]
    fn list_pending_excludes_complete_and_claimed_units() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let done = FetchUnit::new(1, 2020);
        let claimed = FetchUnit::new(1, 2021);
        let open = FetchUnit::new(2, 2020);
        store.mark_complete(&done, &receipt(&done)).unwrap();
        assert!(store.try_begin(&claimed).unwrap());

        let pending = store.list_pending(&[done, claimed, open]).unwrap();
        assert_eq!(pending.into_iter().collect::<Vec<_>>(), vec![open]);
        assert_eq!(store.state(&claimed).unwrap(), UnitState::InProgress);
    }

    #[test]
    fn claims_are_exclusive_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let unit = FetchUnit::new(9, 2022);
        assert!(store.try_begin(&unit).unwrap());
        assert!(!store.try_begin(&unit).unwrap());
        store.release(&unit);
        assert_eq!(store.state(&unit).unwrap(), UnitState::Pending);
        assert!(store.try_begin(&unit).unwrap());
        store.mark_complete(&unit, &receipt(&unit)).unwrap();
        assert!(!store.try_begin(&unit).unwrap());
    }

    #[test]
    fn concurrent_mark_complete_has_a_single_winner() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(FileCheckpointStore::new(dir.path()).unwrap());
        let unit = FetchUnit::new(3, 2023);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || store.mark_complete(&unit, &receipt(&unit)))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(store.list_complete().unwrap(), vec![unit]);
    }

    #[test]
    fn invalidated_unit_is_pending_again() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        let unit = FetchUnit::new(7, 2020);
        store.mark_complete(&unit, &receipt(&unit)).unwrap();
        store.invalidate(&unit).unwrap();
        assert_eq!(store.state(&unit).unwrap(), UnitState::Pending);
        assert!(!store.marker_path(&unit).exists());
        assert_eq!(store.receipt(&unit).unwrap(), None);
        // A second invalidation finds nothing to remove.
        store.invalidate(&unit).unwrap();
        assert!(store.try_begin(&unit).unwrap());
    }

    #[test]
    fn ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hi").unwrap();
        std::fs::write(dir.path().join("x_y.finished"), b"").unwrap();
        let store = FileCheckpointStore::new(dir.path()).unwrap();
        assert!(store.list_complete().unwrap().is_empty());
    }
}
