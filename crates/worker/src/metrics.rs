//! Prometheus registry for the worker process.
//!
//! Holds the core pipeline metrics plus a gauge of packages per status that
//! is refreshed from the store on every scrape.

use once_cell::sync::Lazy;
use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::{error, warn};

use pkgvet_core::status::{PackageFilter, PackageStatus, PackageStore, StoreError};

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// Packages by current status (collected on scrape).
pub static PACKAGES_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("pkgvet_packages_by_status", "Current package count by status"),
        &["status"],
    )
    .unwrap()
});

fn register_metrics(registry: &Registry) {
    if let Err(e) = registry.register(Box::new(PACKAGES_BY_STATUS.clone())) {
        error!("Failed to register status gauge: {}", e);
    }

    for metric in pkgvet_core::metrics::all_metrics() {
        if let Err(e) = registry.register(metric) {
            error!("Failed to register core metric: {}", e);
        }
    }
}

/// Package count for every status.
pub fn status_counts(
    store: &dyn PackageStore,
) -> Result<Vec<(PackageStatus, i64)>, StoreError> {
    PackageStatus::ALL
        .iter()
        .map(|status| {
            store
                .count(&PackageFilter::new().with_status(*status))
                .map(|count| (*status, count))
        })
        .collect()
}

/// Update the status gauge from the store.
pub fn collect_dynamic_metrics(store: &dyn PackageStore) {
    match status_counts(store) {
        Ok(counts) => {
            for (status, count) in counts {
                PACKAGES_BY_STATUS
                    .with_label_values(&[status.as_str()])
                    .set(count);
            }
        }
        Err(e) => warn!("Failed to count packages by status: {}", e),
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
