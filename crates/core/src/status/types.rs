//! Package status model and records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::license::LicenseTier;
use crate::scanner::VulnerabilityCounts;
use crate::storage::StoredArtifact;

// ============================================================================
// Status
// ============================================================================

/// Pipeline status of a package. Each package is in exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    Submitted,
    Parsed,
    CheckingLicense,
    LicenseChecked,
    LicenseCheckFailed,
    Downloading,
    Downloaded,
    DownloadFailed,
    SecurityScanning,
    SecurityScanned,
    SecurityScanFailed,
    PendingApproval,
    Approved,
    Rejected,
    Publishing,
    Published,
    PublishFailed,
}

impl PackageStatus {
    /// Every status, in pipeline order.
    pub const ALL: [PackageStatus; 17] = [
        PackageStatus::Submitted,
        PackageStatus::Parsed,
        PackageStatus::CheckingLicense,
        PackageStatus::LicenseChecked,
        PackageStatus::LicenseCheckFailed,
        PackageStatus::Downloading,
        PackageStatus::Downloaded,
        PackageStatus::DownloadFailed,
        PackageStatus::SecurityScanning,
        PackageStatus::SecurityScanned,
        PackageStatus::SecurityScanFailed,
        PackageStatus::PendingApproval,
        PackageStatus::Approved,
        PackageStatus::Rejected,
        PackageStatus::Publishing,
        PackageStatus::Published,
        PackageStatus::PublishFailed,
    ];

    /// Returns the string form stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageStatus::Submitted => "submitted",
            PackageStatus::Parsed => "parsed",
            PackageStatus::CheckingLicense => "checking_license",
            PackageStatus::LicenseChecked => "license_checked",
            PackageStatus::LicenseCheckFailed => "license_check_failed",
            PackageStatus::Downloading => "downloading",
            PackageStatus::Downloaded => "downloaded",
            PackageStatus::DownloadFailed => "download_failed",
            PackageStatus::SecurityScanning => "security_scanning",
            PackageStatus::SecurityScanned => "security_scanned",
            PackageStatus::SecurityScanFailed => "security_scan_failed",
            PackageStatus::PendingApproval => "pending_approval",
            PackageStatus::Approved => "approved",
            PackageStatus::Rejected => "rejected",
            PackageStatus::Publishing => "publishing",
            PackageStatus::Published => "published",
            PackageStatus::PublishFailed => "publish_failed",
        }
    }

    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PackageStatus::LicenseCheckFailed
                | PackageStatus::DownloadFailed
                | PackageStatus::SecurityScanFailed
                | PackageStatus::Rejected
                | PackageStatus::Published
                | PackageStatus::PublishFailed
        )
    }

    /// Returns true for the markers a worker sets while it owns a row.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            PackageStatus::CheckingLicense
                | PackageStatus::Downloading
                | PackageStatus::SecurityScanning
                | PackageStatus::Publishing
        )
    }

    /// Returns true for terminal states that are failures.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            PackageStatus::LicenseCheckFailed
                | PackageStatus::DownloadFailed
                | PackageStatus::SecurityScanFailed
                | PackageStatus::PublishFailed
        )
    }

    /// The terminal failure reachable from an in-progress marker.
    pub fn failure_sibling(&self) -> Option<PackageStatus> {
        match self {
            PackageStatus::CheckingLicense => Some(PackageStatus::LicenseCheckFailed),
            PackageStatus::Downloading => Some(PackageStatus::DownloadFailed),
            PackageStatus::SecurityScanning => Some(PackageStatus::SecurityScanFailed),
            PackageStatus::Publishing => Some(PackageStatus::PublishFailed),
            _ => None,
        }
    }

    /// The completed state an in-progress marker is reset to on retry.
    pub fn recovery_target(&self) -> Option<PackageStatus> {
        match self {
            PackageStatus::CheckingLicense => Some(PackageStatus::Parsed),
            PackageStatus::Downloading => Some(PackageStatus::LicenseChecked),
            PackageStatus::SecurityScanning => Some(PackageStatus::Downloaded),
            PackageStatus::Publishing => Some(PackageStatus::Approved),
            _ => None,
        }
    }

    /// Forward transitions allowed from this status.
    pub fn successors(&self) -> &'static [PackageStatus] {
        use PackageStatus::*;
        match self {
            Submitted => &[Parsed],
            Parsed => &[CheckingLicense],
            CheckingLicense => &[LicenseChecked, LicenseCheckFailed],
            LicenseChecked => &[Downloading],
            Downloading => &[Downloaded, DownloadFailed],
            Downloaded => &[SecurityScanning],
            SecurityScanning => &[SecurityScanned, SecurityScanFailed],
            SecurityScanned => &[PendingApproval],
            PendingApproval => &[Approved, Rejected],
            Approved => &[Publishing],
            Publishing => &[Published, PublishFailed],
            LicenseCheckFailed | DownloadFailed | SecurityScanFailed | Rejected | Published
            | PublishFailed => &[],
        }
    }

    /// Returns true if `to` is a legal forward transition from this status.
    pub fn can_transition_to(&self, to: PackageStatus) -> bool {
        self.successors().contains(&to)
    }
}

impl fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PackageStatus::ALL
            .iter()
            .find(|status| status.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown package status: {}", s))
    }
}

/// Final outcome of a package, when it has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Approved,
    Rejected,
    Published,
}

// ============================================================================
// Records
// ============================================================================

/// A package row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    /// Unique identifier (UUID).
    pub id: String,
    /// Request this package was submitted with.
    pub request_id: String,
    pub name: String,
    pub version: String,

    /// Raw license expression as found in the lockfile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_expression: Option<String>,
    /// Governing license after evaluation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_tier: Option<LicenseTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_score: Option<u8>,

    /// Derived from the vulnerability scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_score: Option<u8>,
    #[serde(default)]
    pub vulnerabilities: VulnerabilityCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_duration_ms: Option<u64>,

    /// Downloaded artifact, once fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<StoredArtifact>,

    pub status: PackageStatus,
    /// Number of times the package was sent back to retry a stage.
    #[serde(default)]
    pub retry_count: u32,
    /// Detail of the last failure or retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_reason: Option<String>,

    /// Where the target registry stored the published artifact.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_location: Option<String>,
    /// Token of the claim that owns the row while it sits in an in-progress
    /// status. Commits for that row must present it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_token: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Package {
    /// Final outcome derived from the current status.
    pub fn disposition(&self) -> Option<Disposition> {
        match self.status {
            PackageStatus::Approved | PackageStatus::Publishing | PackageStatus::PublishFailed => {
                Some(Disposition::Approved)
            }
            PackageStatus::Rejected => Some(Disposition::Rejected),
            PackageStatus::Published => Some(Disposition::Published),
            _ => None,
        }
    }
}

/// Fields a transition may write alongside the status.
///
/// Unset fields keep their stored value; `error` is always written so a
/// successful transition clears the previous failure detail.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageUpdate {
    pub license_identifier: Option<String>,
    pub license_tier: Option<LicenseTier>,
    pub license_score: Option<u8>,
    pub security_score: Option<u8>,
    pub vulnerabilities: Option<VulnerabilityCounts>,
    pub scan_duration_ms: Option<u64>,
    pub artifact: Option<StoredArtifact>,
    pub error: Option<String>,
    pub decided_by: Option<String>,
    pub decision_reason: Option<String>,
    pub published_location: Option<String>,
}

impl PackageUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update carrying only failure detail.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A package in a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license_expression: Option<String>,
}

impl PackageSpec {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            license_expression: None,
        }
    }

    pub fn with_license(mut self, expression: impl Into<String>) -> Self {
        self.license_expression = Some(expression.into());
        self
    }
}

/// A group of packages submitted together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub id: String,
    pub requested_by: String,
    /// Where the packages came from (e.g. lockfile name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request status, always computed from the statuses of its packages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// No packages.
    Empty,
    /// At least one package is still moving through the pipeline.
    Processing,
    /// Nothing is moving; at least one package waits for a decision.
    AwaitingApproval,
    /// Every package was published.
    Completed,
    /// Every package is terminal, some published and some not.
    PartiallyCompleted,
    /// Every package is terminal and none was published.
    Failed,
}

impl RequestStatus {
    /// Derive the request status from package statuses.
    pub fn derive(statuses: &[PackageStatus]) -> Self {
        if statuses.is_empty() {
            return RequestStatus::Empty;
        }

        let waiting = statuses
            .iter()
            .filter(|s| **s == PackageStatus::PendingApproval)
            .count();
        let active = statuses
            .iter()
            .filter(|s| !s.is_terminal() && **s != PackageStatus::PendingApproval)
            .count();

        if active > 0 {
            return RequestStatus::Processing;
        }
        if waiting > 0 {
            return RequestStatus::AwaitingApproval;
        }

        let published = statuses
            .iter()
            .filter(|s| **s == PackageStatus::Published)
            .count();
        if published == statuses.len() {
            RequestStatus::Completed
        } else if published > 0 {
            RequestStatus::PartiallyCompleted
        } else {
            RequestStatus::Failed
        }
    }
}

/// A request with its derived status and per-status package counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub request: RequestRecord,
    pub status: RequestStatus,
    pub total_packages: usize,
    pub counts: Vec<(PackageStatus, usize)>,
}

/// One entry of a package's status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub package_id: String,
    pub from: Option<PackageStatus>,
    pub to: PackageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub at: DateTime<Utc>,
}

/// Human approval decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub approve: bool,
    pub decided_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Decision {
    pub fn approve(by: impl Into<String>) -> Self {
        Self {
            approve: true,
            decided_by: by.into(),
            reason: None,
        }
    }

    pub fn reject(by: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            approve: false,
            decided_by: by.into(),
            reason: Some(reason.into()),
        }
    }
}
