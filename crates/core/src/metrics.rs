//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Workers (claims, outcomes, stuck recovery, cycle timing)
//! - License evaluation and security scoring
//! - External services (source registry, scanner, target registry)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts};

// =============================================================================
// Workers
// =============================================================================

/// Packages claimed by a worker.
pub static PACKAGES_CLAIMED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pkgvet_packages_claimed_total", "Packages claimed by workers"),
        &["stage", "status"], // status: in-progress marker
    )
    .unwrap()
});

/// Packages leaving a stage, by resulting status.
pub static PACKAGES_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "pkgvet_packages_processed_total",
            "Packages processed by workers",
        ),
        &["stage", "outcome"], // "advanced", "failed", "retried", "held", "lost", "error"
    )
    .unwrap()
});

/// Packages recovered from an in-progress status.
pub static STUCK_RECOVERED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "pkgvet_stuck_recovered_total",
            "Packages recovered after being stuck in progress",
        ),
        &["status", "result"], // result: "reset", "exhausted"
    )
    .unwrap()
});

/// Duration of one worker cycle.
pub static CYCLE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("pkgvet_cycle_duration_seconds", "Duration of a worker cycle")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        &["stage"],
    )
    .unwrap()
});

/// Cycles that ended with an error.
pub static CYCLE_ERRORS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pkgvet_cycle_errors_total", "Worker cycles that failed"),
        &["stage"],
    )
    .unwrap()
});

/// Whether a worker loop is running (1) or not (0).
pub static WORKER_RUNNING: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("pkgvet_worker_running", "Worker loop running"),
        &["stage"],
    )
    .unwrap()
});

// =============================================================================
// Evaluation
// =============================================================================

/// License evaluations by resulting tier.
pub static LICENSE_EVALUATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "pkgvet_license_evaluations_total",
            "License expressions evaluated",
        ),
        &["tier"],
    )
    .unwrap()
});

/// Security scores assigned after scanning.
pub static SECURITY_SCORES: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("pkgvet_security_score", "Distribution of security scores")
            .buckets(vec![0.0, 25.0, 50.0, 70.0, 80.0, 90.0, 95.0, 100.0]),
        &[],
    )
    .unwrap()
});

/// Approval decisions by kind.
pub static APPROVAL_DECISIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("pkgvet_approval_decisions_total", "Approval decisions"),
        &["decision"], // "auto_approved", "auto_rejected", "manual"
    )
    .unwrap()
});

// =============================================================================
// External services
// =============================================================================

/// External service call duration.
pub static EXTERNAL_SERVICE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "pkgvet_external_service_duration_seconds",
            "Duration of external service calls",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["service", "operation"],
    )
    .unwrap()
});

/// External service requests by result.
pub static EXTERNAL_SERVICE_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "pkgvet_external_service_requests_total",
            "Total external service requests",
        ),
        &["service", "result"], // "success", "error", "timeout"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Workers
        Box::new(PACKAGES_CLAIMED.clone()),
        Box::new(PACKAGES_PROCESSED.clone()),
        Box::new(STUCK_RECOVERED.clone()),
        Box::new(CYCLE_DURATION.clone()),
        Box::new(CYCLE_ERRORS.clone()),
        Box::new(WORKER_RUNNING.clone()),
        // Evaluation
        Box::new(LICENSE_EVALUATIONS.clone()),
        Box::new(SECURITY_SCORES.clone()),
        Box::new(APPROVAL_DECISIONS.clone()),
        // External services
        Box::new(EXTERNAL_SERVICE_DURATION.clone()),
        Box::new(EXTERNAL_SERVICE_REQUESTS.clone()),
    ]
}
