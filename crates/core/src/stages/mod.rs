//! The four pipeline stages.
//!
//! - License: `Parsed -> CheckingLicense -> LicenseChecked | LicenseCheckFailed`
//! - Package: `LicenseChecked -> Downloading -> Downloaded | DownloadFailed`
//!   and `Downloaded -> SecurityScanning -> SecurityScanned | SecurityScanFailed`
//! - Approval: `SecurityScanned -> PendingApproval -> Approved | Rejected`
//! - Publish: `Approved -> Publishing -> Published | PublishFailed`

mod approval;
mod license;
mod package;
mod publish;

pub use approval::{record_decision, ApprovalConfig, ApprovalStage, AUTO_DECIDER};
pub use license::LicenseStage;
pub use package::PackageStage;
pub use publish::PublishStage;

use std::time::Instant;

use crate::metrics;

/// Record duration and result of an external call.
pub(crate) fn observe_external<T, E>(
    service: &str,
    operation: &str,
    started: Instant,
    result: &Result<T, E>,
    timed_out: bool,
) {
    metrics::EXTERNAL_SERVICE_DURATION
        .with_label_values(&[service, operation])
        .observe(started.elapsed().as_secs_f64());
    let outcome = match result {
        Ok(_) => "success",
        Err(_) if timed_out => "timeout",
        Err(_) => "error",
    };
    metrics::EXTERNAL_SERVICE_REQUESTS
        .with_label_values(&[service, outcome])
        .inc();
}
