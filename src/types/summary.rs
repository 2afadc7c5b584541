//! The report every pipeline entry point returns to its caller.

use crate::types::fetch_unit::FetchUnit;
use serde::Serialize;
use std::fmt;

/// Which entry point produced a [`RunSummary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Discovery,
    Ingestion,
    Transform,
    Aggregate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Discovery => "discovery",
            Stage::Ingestion => "ingestion",
            Stage::Transform => "transform",
            Stage::Aggregate => "aggregate",
        };
        write!(f, "{name}")
    }
}

/// A unit (or partition) that could not be processed in a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitFailure {
    pub unit: FetchUnit,
    pub reason: String,
    /// `true` when re-running will not help without intervention
    /// (permanent API errors, corrupt artifacts).
    pub permanent: bool,
}

/// Outcome of one pipeline run.
///
/// Per-unit and per-record problems never abort a run; they are collected here
/// so that nothing is dropped silently.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub stage: Stage,
    pub units_total: usize,
    pub units_processed: usize,
    /// Units that needed no work (already checkpointed) or were not started
    /// because the run was cancelled.
    pub units_skipped: usize,
    pub failures: Vec<UnitFailure>,
    pub records_written: u64,
    pub records_rejected: u64,
    pub parse_warnings: u64,
    pub requests: u64,
    pub retries: u64,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            units_total: 0,
            units_processed: 0,
            units_skipped: 0,
            failures: Vec::new(),
            records_written: 0,
            records_rejected: 0,
            parse_warnings: 0,
            requests: 0,
            retries: 0,
            cancelled: false,
        }
    }

    pub fn units_failed(&self) -> usize {
        self.failures.len()
    }

    pub fn permanent_failures(&self) -> usize {
        self.failures.iter().filter(|f| f.permanent).count()
    }

    pub(crate) fn record_failure(&mut self, unit: FetchUnit, reason: String, permanent: bool) {
        self.failures.push(UnitFailure {
            unit,
            reason,
            permanent,
        });
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} run: {} units, {} processed, {} skipped, {} failed ({} permanent)",
            self.stage,
            self.units_total,
            self.units_processed,
            self.units_skipped,
            self.units_failed(),
            self.permanent_failures()
        )?;
        write!(
            f,
            "  records written {}, rejected {}, parse warnings {}, requests {}, retries {}",
            self.records_written, self.records_rejected, self.parse_warnings, self.requests, self.retries
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        for failure in &self.failures {
            write!(f, "\n  - {}: {}", failure.unit, failure.reason)?;
        }
        Ok(())
    }
}
