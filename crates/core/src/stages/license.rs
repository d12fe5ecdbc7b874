//! License check stage.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::license::{evaluate, LicenseCache, LicenseTier, PolicySnapshot};
use crate::status::{Package, PackageStatus, PackageUpdate};
use crate::worker::{Claim, Stage, StageKind, StageOutcome, WorkerError};

const CLAIMS: [Claim; 1] = [Claim::new(
    PackageStatus::Parsed,
    PackageStatus::CheckingLicense,
)];

/// Evaluates each package's license expression against one policy snapshot
/// per cycle.
pub struct LicenseStage {
    cache: Arc<LicenseCache>,
}

impl LicenseStage {
    pub fn new(cache: Arc<LicenseCache>) -> Self {
        Self { cache }
    }

    /// Outcome for a package under a given policy.
    pub fn check(policy: &PolicySnapshot, package: &Package) -> StageOutcome {
        let expression = package.license_expression.as_deref().unwrap_or("");
        let verdict = evaluate(expression, policy);

        debug!(
            package = %package.name,
            version = %package.version,
            expression,
            tier = %verdict.tier,
            score = ?verdict.score,
            "License evaluated"
        );

        let update = PackageUpdate {
            license_identifier: verdict.identifier.clone(),
            license_tier: Some(verdict.tier),
            license_score: verdict.score,
            ..PackageUpdate::default()
        };

        if verdict.tier == LicenseTier::Blocked {
            let identifier = verdict.identifier.as_deref().unwrap_or(expression);
            return StageOutcome::Fail {
                error: format!("license {} is blocked by policy", identifier),
                update,
            };
        }

        StageOutcome::advance(PackageStatus::LicenseChecked, update)
    }
}

#[async_trait]
impl Stage for LicenseStage {
    type Cycle = Arc<PolicySnapshot>;

    fn kind(&self) -> StageKind {
        StageKind::License
    }

    fn claims(&self) -> &[Claim] {
        &CLAIMS
    }

    async fn prepare_cycle(&self) -> Result<Arc<PolicySnapshot>, WorkerError> {
        Ok(self.cache.snapshot_for_cycle())
    }

    async fn process(
        &self,
        policy: &Arc<PolicySnapshot>,
        package: &Package,
        _marker: PackageStatus,
    ) -> StageOutcome {
        Self::check(policy, package)
    }
}
