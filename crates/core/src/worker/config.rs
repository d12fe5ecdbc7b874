//! Worker configuration.

use serde::{Deserialize, Serialize};

use super::stage::StageKind;

/// Resolved runtime parameters for one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum rows claimed per claim per cycle.
    pub batch_size: usize,
    /// Sleep between cycles (seconds).
    pub poll_interval_secs: u64,
    /// Age after which an in-progress row is considered abandoned (seconds).
    /// Also bounds the processing time of a single row.
    pub stuck_timeout_secs: u64,
    /// Attempts allowed before a retried or stuck row fails for good.
    pub max_retries: u32,
}

impl WorkerConfig {
    /// Built-in defaults for a stage.
    pub fn for_stage(kind: StageKind) -> Self {
        match kind {
            StageKind::License => Self {
                batch_size: 10,
                poll_interval_secs: 15,
                stuck_timeout_secs: 600,
                max_retries: 3,
            },
            StageKind::Package => Self {
                batch_size: 5,
                poll_interval_secs: 10,
                stuck_timeout_secs: 1800, // 30 minutes
                max_retries: 3,
            },
            StageKind::Approval => Self {
                batch_size: 20,
                poll_interval_secs: 30,
                stuck_timeout_secs: 600,
                max_retries: 0,
            },
            StageKind::Publish => Self {
                batch_size: 3,
                poll_interval_secs: 30,
                stuck_timeout_secs: 7200, // 2 hours
                max_retries: 3,
            },
        }
    }
}

/// Per-stage settings as written in the config file. Unset fields fall back
/// to the stage defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stuck_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl WorkerSettings {
    /// Overlay these settings on the stage defaults.
    pub fn resolve(&self, kind: StageKind) -> WorkerConfig {
        let defaults = WorkerConfig::for_stage(kind);
        WorkerConfig {
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            poll_interval_secs: self.poll_interval_secs.unwrap_or(defaults.poll_interval_secs),
            stuck_timeout_secs: self.stuck_timeout_secs.unwrap_or(defaults.stuck_timeout_secs),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
        }
    }
}

/// `[workers.*]` tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkersConfig {
    #[serde(default)]
    pub license: WorkerSettings,
    #[serde(default)]
    pub package: WorkerSettings,
    #[serde(default)]
    pub approval: WorkerSettings,
    #[serde(default)]
    pub publish: WorkerSettings,
}

impl WorkersConfig {
    pub fn settings(&self, kind: StageKind) -> &WorkerSettings {
        match kind {
            StageKind::License => &self.license,
            StageKind::Package => &self.package,
            StageKind::Approval => &self.approval,
            StageKind::Publish => &self.publish,
        }
    }

    pub fn settings_mut(&mut self, kind: StageKind) -> &mut WorkerSettings {
        match kind {
            StageKind::License => &mut self.license,
            StageKind::Package => &mut self.package,
            StageKind::Approval => &mut self.approval,
            StageKind::Publish => &mut self.publish,
        }
    }

    pub fn resolve(&self, kind: StageKind) -> WorkerConfig {
        self.settings(kind).resolve(kind)
    }
}
