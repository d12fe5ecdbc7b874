//! Publish stage.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::info;

use super::observe_external;
use crate::publisher::{PublishError, PublishRequest, TargetRegistry};
use crate::status::{Package, PackageStatus, PackageUpdate};
use crate::storage::ArtifactStore;
use crate::worker::{Claim, Stage, StageKind, StageOutcome, WorkerError};

const CLAIMS: [Claim; 1] = [Claim::new(PackageStatus::Approved, PackageStatus::Publishing)];

/// Publishes approved artifacts to the target registry. Publish errors are
/// retried up to the worker's retry limit.
pub struct PublishStage {
    target: Arc<dyn TargetRegistry>,
    artifacts: ArtifactStore,
}

impl PublishStage {
    pub fn new(target: Arc<dyn TargetRegistry>, artifacts: ArtifactStore) -> Self {
        Self { target, artifacts }
    }
}

#[async_trait]
impl Stage for PublishStage {
    type Cycle = ();

    fn kind(&self) -> StageKind {
        StageKind::Publish
    }

    fn claims(&self) -> &[Claim] {
        &CLAIMS
    }

    async fn prepare_cycle(&self) -> Result<(), WorkerError> {
        Ok(())
    }

    async fn process(&self, _cycle: &(), package: &Package, _marker: PackageStatus) -> StageOutcome {
        let Some(artifact) = package.artifact.as_ref() else {
            return StageOutcome::fail("no artifact to publish");
        };

        // A missing or altered artifact will not fix itself.
        let data = match self.artifacts.read(artifact).await {
            Ok(data) => data,
            Err(e) => return StageOutcome::fail(format!("artifact unusable: {}", e)),
        };

        let file_name = artifact
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}-{}.tgz", package.name, package.version));

        let request = PublishRequest {
            name: package.name.clone(),
            version: package.version.clone(),
            file_name,
            sha256: artifact.sha256.clone(),
            data,
        };

        let started = Instant::now();
        let result = self.target.publish(&request).await;
        observe_external(
            self.target.name(),
            "publish",
            started,
            &result,
            matches!(result, Err(PublishError::Timeout)),
        );

        match result {
            Ok(receipt) => {
                info!(
                    package = %package.name,
                    version = %package.version,
                    location = %receipt.location,
                    already_present = receipt.already_present,
                    "Published"
                );
                StageOutcome::advance(
                    PackageStatus::Published,
                    PackageUpdate {
                        published_location: Some(receipt.location),
                        ..PackageUpdate::default()
                    },
                )
            }
            Err(e) => StageOutcome::retry(format!("publish failed: {}", e)),
        }
    }
}
