//! Types for the worker runtime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::stage::StageKind;
use crate::status::RecoveryReport;

/// Errors that abort a whole cycle. Per-row problems never surface here.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("package store error: {0}")]
    Store(#[from] crate::status::StoreError),

    #[error("license policy error: {0}")]
    Policy(#[from] crate::license::PolicyError),

    #[error("stage not ready: {0}")]
    NotReady(String),
}

/// Counts from one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub claimed: usize,
    pub advanced: usize,
    pub failed: usize,
    pub retried: usize,
    pub held: usize,
    /// Rows that moved on before their result could be committed.
    pub lost: usize,
    /// Rows whose result could not be committed.
    pub errors: usize,
    pub recovered_reset: usize,
    pub recovered_exhausted: usize,
}

impl CycleReport {
    pub fn add_recovery(&mut self, report: &RecoveryReport) {
        self.recovered_reset += report.reset;
        self.recovered_exhausted += report.exhausted;
    }

    /// Rows claimed this cycle that were not given a result.
    pub fn unresolved(&self) -> usize {
        self.claimed
            .saturating_sub(self.advanced + self.failed + self.retried + self.held + self.lost)
    }
}

/// Current status of a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub stage: StageKind,
    pub running: bool,
    pub cycles: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cycle_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_report: Option<CycleReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
