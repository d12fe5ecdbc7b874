//! Configuration for the scanner module.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the Trivy-based scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Path to the trivy binary.
    #[serde(default = "default_trivy_path")]
    pub trivy_path: PathBuf,

    /// Path to the tar binary used to unpack artifacts before scanning.
    #[serde(default = "default_tar_path")]
    pub tar_path: PathBuf,

    /// Timeout for a single scan in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Additional arguments passed to `trivy fs`.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_trivy_path() -> PathBuf {
    PathBuf::from("trivy")
}

fn default_tar_path() -> PathBuf {
    PathBuf::from("tar")
}

fn default_timeout() -> u64 {
    300
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            trivy_path: default_trivy_path(),
            tar_path: default_tar_path(),
            timeout_secs: default_timeout(),
            extra_args: Vec::new(),
        }
    }
}
