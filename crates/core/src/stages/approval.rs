//! Approval stage.
//!
//! Scanned packages are moved to `PendingApproval`. Clear cases are decided
//! automatically; everything else waits for a human decision.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::license::LicenseTier;
use crate::metrics;
use crate::status::{Decision, Package, PackageStatus, PackageStore, PackageUpdate, StoreError};
use crate::worker::{Claim, Stage, StageKind, StageOutcome, WorkerError};

/// Recorded as `decided_by` for automatic decisions.
pub const AUTO_DECIDER: &str = "pkgvet";

const CLAIMS: [Claim; 1] = [Claim::new(
    PackageStatus::SecurityScanned,
    PackageStatus::PendingApproval,
)];

/// `[approval]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Approve packages meeting both thresholds without a human.
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default = "default_min_license_score")]
    pub min_license_score: u8,
    #[serde(default = "default_min_security_score")]
    pub min_security_score: u8,
    /// Reject outright above this many critical vulnerabilities.
    #[serde(default)]
    pub max_critical: u32,
}

fn default_min_license_score() -> u8 {
    80
}

fn default_min_security_score() -> u8 {
    90
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            auto_approve: false,
            min_license_score: default_min_license_score(),
            min_security_score: default_min_security_score(),
            max_critical: 0,
        }
    }
}

pub struct ApprovalStage {
    config: ApprovalConfig,
}

impl ApprovalStage {
    pub fn new(config: ApprovalConfig) -> Self {
        Self { config }
    }

    /// Automatic decision for a package, if one applies.
    pub fn decide(&self, package: &Package) -> StageOutcome {
        let critical = package.vulnerabilities.critical;
        if critical > self.config.max_critical {
            metrics::APPROVAL_DECISIONS
                .with_label_values(&["auto_rejected"])
                .inc();
            return StageOutcome::advance(
                PackageStatus::Rejected,
                PackageUpdate {
                    decided_by: Some(AUTO_DECIDER.to_string()),
                    decision_reason: Some(format!(
                        "{} critical vulnerabilities (limit {})",
                        critical, self.config.max_critical
                    )),
                    ..PackageUpdate::default()
                },
            );
        }

        if !self.config.auto_approve {
            return StageOutcome::Hold;
        }

        let license_ok = package.license_tier != Some(LicenseTier::Unknown)
            && package
                .license_score
                .is_some_and(|score| score >= self.config.min_license_score);
        let security_ok = package
            .security_score
            .is_some_and(|score| score >= self.config.min_security_score);

        if license_ok && security_ok {
            metrics::APPROVAL_DECISIONS
                .with_label_values(&["auto_approved"])
                .inc();
            return StageOutcome::advance(
                PackageStatus::Approved,
                PackageUpdate {
                    decided_by: Some(AUTO_DECIDER.to_string()),
                    decision_reason: Some(format!(
                        "license score {} and security score {} meet thresholds",
                        package.license_score.unwrap_or_default(),
                        package.security_score.unwrap_or_default()
                    )),
                    ..PackageUpdate::default()
                },
            );
        }

        StageOutcome::Hold
    }
}

#[async_trait]
impl Stage for ApprovalStage {
    type Cycle = ();

    fn kind(&self) -> StageKind {
        StageKind::Approval
    }

    fn claims(&self) -> &[Claim] {
        &CLAIMS
    }

    async fn prepare_cycle(&self) -> Result<(), WorkerError> {
        Ok(())
    }

    async fn process(&self, _cycle: &(), package: &Package, _marker: PackageStatus) -> StageOutcome {
        self.decide(package)
    }
}

/// Record a human decision on a package waiting for approval.
pub fn record_decision(
    store: &dyn PackageStore,
    package_id: &str,
    decision: &Decision,
) -> Result<Package, StoreError> {
    let package = store.decide(package_id, decision)?;
    metrics::APPROVAL_DECISIONS
        .with_label_values(&["manual"])
        .inc();
    info!(
        package = %package.name,
        version = %package.version,
        decided_by = %decision.decided_by,
        status = %package.status,
        "Manual decision recorded"
    );
    Ok(package)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::VulnerabilityCounts;
    use crate::testing::fixtures;

    fn scanned(license_score: u8, security_score: u8, critical: u32) -> Package {
        let mut package = fixtures::package("pkg", PackageStatus::PendingApproval);
        package.license_tier = Some(LicenseTier::Allowed);
        package.license_score = Some(license_score);
        package.security_score = Some(security_score);
        package.vulnerabilities = VulnerabilityCounts {
            critical,
            ..Default::default()
        };
        package
    }

    fn auto() -> ApprovalStage {
        ApprovalStage::new(ApprovalConfig {
            auto_approve: true,
            ..ApprovalConfig::default()
        })
    }

    #[test]
    fn test_critical_vulnerabilities_reject() {
        let outcome = auto().decide(&scanned(100, 75, 1));
        match outcome {
            StageOutcome::Advance { to, update } => {
                assert_eq!(to, PackageStatus::Rejected);
                assert_eq!(update.decided_by.as_deref(), Some(AUTO_DECIDER));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_good_scores_auto_approve() {
        let outcome = auto().decide(&scanned(85, 95, 0));
        assert!(matches!(
            outcome,
            StageOutcome::Advance {
                to: PackageStatus::Approved,
                ..
            }
        ));
    }

    #[test]
    fn test_low_scores_wait_for_human() {
        assert_eq!(auto().decide(&scanned(60, 95, 0)), StageOutcome::Hold);
        assert_eq!(auto().decide(&scanned(85, 80, 0)), StageOutcome::Hold);
    }

    #[test]
    fn test_unknown_license_waits_for_human() {
        let mut package = scanned(85, 100, 0);
        package.license_tier = Some(LicenseTier::Unknown);
        assert_eq!(auto().decide(&package), StageOutcome::Hold);
    }

    #[test]
    fn test_auto_approve_disabled_holds() {
        let stage = ApprovalStage::new(ApprovalConfig::default());
        assert_eq!(stage.decide(&scanned(100, 100, 0)), StageOutcome::Hold);
    }
}
