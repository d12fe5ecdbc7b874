//! Testing utilities and mock implementations of the external collaborators.
//!
//! # Example
//!
//! ```rust,ignore
//! use pkgvet_core::testing::{MockRegistry, MockScanner, MockTargetRegistry};
//!
//! let registry = MockRegistry::new();
//! registry.fail_package("left-pad", MockDownloadFailure::NotFound).await;
//!
//! let scanner = MockScanner::new();
//! scanner.set_counts("lodash", VulnerabilityCounts { critical: 1, ..Default::default() }).await;
//! ```

mod mock_registry;
mod mock_scanner;
mod mock_target_registry;

pub use mock_registry::{MockDownloadFailure, MockRegistry};
pub use mock_scanner::MockScanner;
pub use mock_target_registry::MockTargetRegistry;

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::Utc;

    use crate::status::{
        CreateRequest, Package, PackageSpec, PackageStatus, PackageStore, PackageUpdate,
        RequestRecord, StoreError,
    };

    /// A package row with no evaluation results.
    pub fn package(name: &str, status: PackageStatus) -> Package {
        Package {
            id: format!("pkg-{}", name.trim_start_matches('@').replace('/', "-")),
            request_id: "req-1".to_string(),
            name: name.to_string(),
            version: "1.0.0".to_string(),
            license_expression: None,
            license_identifier: None,
            license_tier: None,
            license_score: None,
            security_score: None,
            vulnerabilities: Default::default(),
            scan_duration_ms: None,
            artifact: None,
            status,
            retry_count: 0,
            error: None,
            decided_by: None,
            decision_reason: None,
            published_location: None,
            claim_token: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    /// Create a request with the given `(name, license)` packages and move
    /// them to `Parsed`.
    pub fn submit_parsed(
        store: &dyn PackageStore,
        packages: &[(&str, &str)],
    ) -> Result<RequestRecord, StoreError> {
        let mut request = CreateRequest::new("tester").with_source("fixture");
        for (name, license) in packages {
            request = request.with_package(PackageSpec::new(*name, "1.0.0").with_license(*license));
        }
        let record = store.create_request(request)?;
        for package in store.request_packages(&record.id)? {
            store.transition(
                &package.id,
                PackageStatus::Submitted,
                PackageStatus::Parsed,
                None,
                &PackageUpdate::default(),
            )?;
        }
        Ok(record)
    }

    /// A minimal npm lockfile (v3) with the given `(name, version, license)`
    /// entries.
    pub fn lockfile(entries: &[(&str, &str, &str)]) -> String {
        let mut packages = serde_json::Map::new();
        packages.insert(
            String::new(),
            serde_json::json!({ "name": "fixture-app", "version": "0.0.0" }),
        );
        for (name, version, license) in entries {
            packages.insert(
                format!("node_modules/{}", name),
                serde_json::json!({ "version": version, "license": license }),
            );
        }
        serde_json::json!({
            "name": "fixture-app",
            "lockfileVersion": 3,
            "packages": packages,
        })
        .to_string()
    }
}
