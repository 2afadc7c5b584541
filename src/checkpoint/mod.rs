//! Durable record of which fetch units have been archived.
//!
//! The store is the only state shared between ingestion workers. It is passed
//! around as `Arc<dyn CheckpointStore>` so that tests and alternative backends
//! can stand in for the file implementation.

pub mod error;
pub mod file_store;

use crate::types::fetch_unit::{FetchUnit, UnitState};
use error::CheckpointError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// What a checkpoint marker records about the archived artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointReceipt {
    pub sensor_id: u64,
    pub year: i32,
    pub pages: u32,
    pub records: u64,
    pub artifact_bytes: u64,
}

pub trait CheckpointStore: Send + Sync {
    fn state(&self, unit: &FetchUnit) -> Result<UnitState, CheckpointError>;

    fn is_complete(&self, unit: &FetchUnit) -> Result<bool, CheckpointError> {
        Ok(self.state(unit)? == UnitState::Complete)
    }

    /// Claims `unit` for this process. Returns `false` if the unit is already
    /// complete or claimed by another worker.
    fn try_begin(&self, unit: &FetchUnit) -> Result<bool, CheckpointError>;

    /// Drops a claim without completing the unit; it becomes pending again.
    fn release(&self, unit: &FetchUnit);

    /// Durably records `unit` as complete. Idempotent: completing an already
    /// complete unit succeeds and leaves the existing record untouched.
    fn mark_complete(
        &self,
        unit: &FetchUnit,
        receipt: &CheckpointReceipt,
    ) -> Result<(), CheckpointError>;

    /// Forgets that `unit` was completed so the next ingestion fetches it
    /// again. Invalidating a pending unit is a no-op.
    fn invalidate(&self, unit: &FetchUnit) -> Result<(), CheckpointError>;

    fn receipt(&self, unit: &FetchUnit) -> Result<Option<CheckpointReceipt>, CheckpointError>;

    /// All complete units, sorted.
    fn list_complete(&self) -> Result<Vec<FetchUnit>, CheckpointError>;

    /// The subset of `all` that still needs fetching.
    fn list_pending(&self, all: &[FetchUnit]) -> Result<BTreeSet<FetchUnit>, CheckpointError> {
        let mut pending = BTreeSet::new();
        for unit in all {
            if self.state(unit)? == UnitState::Pending {
                pending.insert(*unit);
            }
        }
        Ok(pending)
    }
}
