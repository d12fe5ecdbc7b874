//! Mock vulnerability scanner for testing.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::scanner::{ScanReport, ScannerError, VulnerabilityCounts, VulnerabilityScanner};
use crate::storage::StoredArtifact;

/// Mock implementation of [`VulnerabilityScanner`].
///
/// Rules are matched against the artifact file name (which starts with the
/// package name); the first matching rule wins. Unmatched artifacts are clean.
#[derive(Debug, Default)]
pub struct MockScanner {
    scans: Arc<RwLock<Vec<PathBuf>>>,
    counts: Arc<RwLock<Vec<(String, VulnerabilityCounts)>>>,
    failures: Arc<RwLock<Vec<String>>>,
}

impl MockScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `counts` for artifacts whose file name starts with `prefix`.
    pub async fn set_counts(&self, prefix: impl Into<String>, counts: VulnerabilityCounts) {
        self.counts.write().await.push((prefix.into(), counts));
    }

    /// Fail scans of artifacts whose file name starts with `prefix`.
    pub async fn fail_artifact(&self, prefix: impl Into<String>) {
        self.failures.write().await.push(prefix.into());
    }

    pub async fn recorded_scans(&self) -> Vec<PathBuf> {
        self.scans.read().await.clone()
    }

    pub async fn scan_count(&self) -> usize {
        self.scans.read().await.len()
    }
}

#[async_trait]
impl VulnerabilityScanner for MockScanner {
    fn name(&self) -> &str {
        "mock"
    }

    async fn scan(&self, artifact: &StoredArtifact) -> Result<ScanReport, ScannerError> {
        self.scans.write().await.push(artifact.path.clone());

        let file_name = artifact
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if self
            .failures
            .read()
            .await
            .iter()
            .any(|prefix| file_name.starts_with(prefix.as_str()))
        {
            return Err(ScannerError::ScanFailed {
                reason: format!("mock scan failure for {}", file_name),
            });
        }

        let counts = self
            .counts
            .read()
            .await
            .iter()
            .find(|(prefix, _)| file_name.starts_with(prefix.as_str()))
            .map(|(_, counts)| *counts)
            .unwrap_or_default();

        Ok(ScanReport {
            counts,
            duration_ms: 5,
            scanner: "mock".to_string(),
        })
    }
}
