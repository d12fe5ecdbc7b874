//! Trait definitions for the scanner module.

use async_trait::async_trait;

use super::error::ScannerError;
use super::types::ScanReport;
use crate::storage::StoredArtifact;

/// A scanner that reports known vulnerabilities in an artifact.
#[async_trait]
pub trait VulnerabilityScanner: Send + Sync {
    /// Returns the name of this scanner implementation.
    fn name(&self) -> &str;

    /// Scans an artifact. Implementations enforce their own timeout.
    async fn scan(&self, artifact: &StoredArtifact) -> Result<ScanReport, ScannerError>;
}
