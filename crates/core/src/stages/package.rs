//! Download and security scan stage.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info};

use super::observe_external;
use crate::metrics;
use crate::registry::{PackageRegistry, RegistryError};
use crate::scanner::{ScannerError, VulnerabilityScanner};
use crate::status::{Package, PackageStatus, PackageUpdate};
use crate::storage::ArtifactStore;
use crate::worker::{Claim, Stage, StageKind, StageOutcome, WorkerError};

const CLAIMS: [Claim; 2] = [
    Claim::new(PackageStatus::LicenseChecked, PackageStatus::Downloading),
    Claim::new(PackageStatus::Downloaded, PackageStatus::SecurityScanning),
];

/// Downloads license-checked packages and scans downloaded ones.
pub struct PackageStage {
    registry: Arc<dyn PackageRegistry>,
    scanner: Arc<dyn VulnerabilityScanner>,
    artifacts: ArtifactStore,
}

impl PackageStage {
    pub fn new(
        registry: Arc<dyn PackageRegistry>,
        scanner: Arc<dyn VulnerabilityScanner>,
        artifacts: ArtifactStore,
    ) -> Self {
        Self {
            registry,
            scanner,
            artifacts,
        }
    }

    async fn download(&self, package: &Package) -> StageOutcome {
        let started = Instant::now();
        let result = self.registry.download(&package.name, &package.version).await;
        observe_external(
            self.registry.name(),
            "download",
            started,
            &result,
            matches!(result, Err(RegistryError::Timeout)),
        );

        let downloaded = match result {
            Ok(downloaded) => downloaded,
            Err(e) if e.is_transient() => {
                return StageOutcome::retry(format!("download failed: {}", e));
            }
            Err(e) => return StageOutcome::fail(format!("download failed: {}", e)),
        };

        let artifact = match self
            .artifacts
            .save(
                &package.request_id,
                &package.id,
                &downloaded.file_name,
                &downloaded.data,
            )
            .await
        {
            Ok(artifact) => artifact,
            Err(e) => return StageOutcome::fail(format!("failed to store artifact: {}", e)),
        };

        debug!(
            package = %package.name,
            version = %package.version,
            sha256 = %artifact.sha256,
            size = artifact.size_bytes,
            "Downloaded"
        );

        StageOutcome::advance(
            PackageStatus::Downloaded,
            PackageUpdate {
                artifact: Some(artifact),
                ..PackageUpdate::default()
            },
        )
    }

    async fn scan(&self, package: &Package) -> StageOutcome {
        let Some(artifact) = package.artifact.as_ref() else {
            return StageOutcome::fail("no downloaded artifact to scan");
        };
        if let Err(e) = self.artifacts.verify(artifact).await {
            return StageOutcome::fail(format!("artifact unusable: {}", e));
        }

        let started = Instant::now();
        let result = self.scanner.scan(artifact).await;
        observe_external(
            self.scanner.name(),
            "scan",
            started,
            &result,
            matches!(result, Err(ScannerError::Timeout { .. })),
        );

        let report = match result {
            Ok(report) => report,
            Err(e) => return StageOutcome::fail(format!("security scan failed: {}", e)),
        };

        let score = report.security_score();
        metrics::SECURITY_SCORES
            .with_label_values(&[])
            .observe(score as f64);
        info!(
            package = %package.name,
            version = %package.version,
            critical = report.counts.critical,
            high = report.counts.high,
            score,
            "Scanned"
        );

        StageOutcome::advance(
            PackageStatus::SecurityScanned,
            PackageUpdate {
                security_score: Some(score),
                vulnerabilities: Some(report.counts),
                scan_duration_ms: Some(report.duration_ms),
                ..PackageUpdate::default()
            },
        )
    }
}

#[async_trait]
impl Stage for PackageStage {
    type Cycle = ();

    fn kind(&self) -> StageKind {
        StageKind::Package
    }

    fn claims(&self) -> &[Claim] {
        &CLAIMS
    }

    async fn prepare_cycle(&self) -> Result<(), WorkerError> {
        Ok(())
    }

    async fn process(&self, _cycle: &(), package: &Package, marker: PackageStatus) -> StageOutcome {
        match marker {
            PackageStatus::Downloading => self.download(package).await,
            PackageStatus::SecurityScanning => self.scan(package).await,
            other => StageOutcome::fail(format!("package stage cannot process {}", other)),
        }
    }
}
