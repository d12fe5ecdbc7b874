//! The contract every pipeline stage implements.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::WorkerError;
use crate::status::{Package, PackageStatus, PackageUpdate};

/// The four worker types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    License,
    Package,
    Approval,
    Publish,
}

impl StageKind {
    pub const ALL: [StageKind; 4] = [
        StageKind::License,
        StageKind::Package,
        StageKind::Approval,
        StageKind::Publish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::License => "license",
            StageKind::Package => "package",
            StageKind::Approval => "approval",
            StageKind::Publish => "publish",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageKind::ALL
            .iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| format!("unknown stage: {}", s))
    }
}

/// One input status a stage consumes and the status it claims rows into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub from: PackageStatus,
    pub marker: PackageStatus,
}

impl Claim {
    pub const fn new(from: PackageStatus, marker: PackageStatus) -> Self {
        Self { from, marker }
    }
}

/// What to do with a claimed row.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Move forward to `to`.
    Advance {
        to: PackageStatus,
        update: PackageUpdate,
    },
    /// Move to the marker's terminal failure status.
    Fail {
        error: String,
        update: PackageUpdate,
    },
    /// Transient problem: send the row back for another attempt, or fail it
    /// once the retry budget is used up.
    Retry { error: String },
    /// Leave the row where it is.
    Hold,
}

impl StageOutcome {
    pub fn advance(to: PackageStatus, update: PackageUpdate) -> Self {
        StageOutcome::Advance { to, update }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        StageOutcome::Fail {
            error: error.into(),
            update: PackageUpdate::default(),
        }
    }

    pub fn retry(error: impl Into<String>) -> Self {
        StageOutcome::Retry {
            error: error.into(),
        }
    }

    /// Label used for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            StageOutcome::Advance { .. } => "advanced",
            StageOutcome::Fail { .. } => "failed",
            StageOutcome::Retry { .. } => "retried",
            StageOutcome::Hold => "held",
        }
    }
}

/// A pipeline stage driven by [`Worker`](super::Worker).
///
/// `process` must not panic or return early on bad input; every problem is
/// expressed as an outcome. The worker still isolates panics per row.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    /// State shared by every row of one cycle (e.g. a policy snapshot).
    type Cycle: Send + Sync;

    fn kind(&self) -> StageKind;

    /// Claims made each cycle, in order.
    fn claims(&self) -> &[Claim];

    /// Called once per cycle before anything is claimed.
    async fn prepare_cycle(&self) -> Result<Self::Cycle, WorkerError>;

    /// Process one claimed row. `marker` is the status the row was claimed into.
    async fn process(
        &self,
        cycle: &Self::Cycle,
        package: &Package,
        marker: PackageStatus,
    ) -> StageOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_kind_parse() {
        assert_eq!("license".parse::<StageKind>().unwrap(), StageKind::License);
        assert_eq!(" Publish ".parse::<StageKind>().unwrap(), StageKind::Publish);
        assert!("scan".parse::<StageKind>().is_err());
    }
}
