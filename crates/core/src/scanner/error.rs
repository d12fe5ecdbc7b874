//! Error types for the scanner module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while scanning an artifact.
#[derive(Debug, Error)]
pub enum ScannerError {
    /// Scanner binary not found.
    #[error("Scanner not found at path: {path}")]
    ScannerNotFound { path: PathBuf },

    /// Artifact to scan does not exist.
    #[error("Artifact not found: {path}")]
    ArtifactNotFound { path: PathBuf },

    /// Artifact could not be unpacked.
    #[error("Failed to unpack artifact: {reason}")]
    UnpackFailed { reason: String },

    /// Scanner exited unsuccessfully.
    #[error("Scan failed: {reason}")]
    ScanFailed { reason: String },

    /// Scan did not finish in time.
    #[error("Scan timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Scanner output could not be parsed.
    #[error("Failed to parse scan report: {reason}")]
    InvalidReport { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
