//! Generic polling worker.
//!
//! Each worker claims a bounded batch of packages in its input status,
//! processes them one by one through a [`Stage`] and commits the result.
//! The package store's conditional transitions are the only coordination
//! between worker processes.

mod config;
mod runner;
mod stage;
mod types;

pub use config::{WorkerConfig, WorkerSettings, WorkersConfig};
pub use runner::Worker;
pub use stage::{Claim, Stage, StageKind, StageOutcome};
pub use types::{CycleReport, WorkerError, WorkerStatus};
