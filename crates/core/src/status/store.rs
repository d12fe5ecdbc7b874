//! Package storage trait and types.

use chrono::Duration;
use thiserror::Error;

use super::types::{
    Decision, Package, PackageSpec, PackageStatus, PackageUpdate, RequestRecord, RequestSummary,
    StatusChange,
};

/// Error type for package store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Package not found: {0}")]
    NotFound(String),

    #[error("Request not found: {0}")]
    RequestNotFound(String),

    #[error("Illegal transition for package {package_id}: {from} -> {to}")]
    IllegalTransition {
        package_id: String,
        from: PackageStatus,
        to: PackageStatus,
    },

    #[error("Cannot {operation} package {package_id}: current status is {current}")]
    InvalidState {
        package_id: String,
        current: PackageStatus,
        operation: String,
    },

    #[error("Duplicate package in request: {name}@{version}")]
    DuplicatePackage { name: String, version: String },

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Request to create a new approval request with its packages.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub requested_by: String,
    pub source: Option<String>,
    pub packages: Vec<PackageSpec>,
}

impl CreateRequest {
    pub fn new(requested_by: impl Into<String>) -> Self {
        Self {
            requested_by: requested_by.into(),
            source: None,
            packages: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_package(mut self, package: PackageSpec) -> Self {
        self.packages.push(package);
        self
    }
}

/// Filter for querying packages.
#[derive(Debug, Clone)]
pub struct PackageFilter {
    pub status: Option<PackageStatus>,
    pub request_id: Option<String>,
    pub name: Option<String>,
    /// Maximum number of results.
    pub limit: i64,
    /// Offset for pagination.
    pub offset: i64,
}

impl Default for PackageFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl PackageFilter {
    pub fn new() -> Self {
        Self {
            status: None,
            request_id: None,
            name: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: PackageStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_request(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Result of a stuck-row sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Rows reset to their predecessor status for another attempt.
    pub reset: usize,
    /// Rows that ran out of retries and were moved to the failure status.
    pub exhausted: usize,
}

impl RecoveryReport {
    pub fn total(&self) -> usize {
        self.reset + self.exhausted
    }
}

/// Storage backend for requests and packages.
///
/// Every status change is conditional on the row still being in the expected
/// status, so two workers racing for the same row can never both win.
pub trait PackageStore: Send + Sync {
    /// Create a request and its packages, all in `Submitted`.
    fn create_request(&self, request: CreateRequest) -> Result<RequestRecord, StoreError>;

    /// Get a request by ID.
    fn get_request(&self, id: &str) -> Result<Option<RequestRecord>, StoreError>;

    /// Packages belonging to a request, in submission order.
    fn request_packages(&self, request_id: &str) -> Result<Vec<Package>, StoreError>;

    /// Request with its derived status.
    fn request_summary(&self, request_id: &str) -> Result<RequestSummary, StoreError>;

    /// Get a package by ID.
    fn get(&self, id: &str) -> Result<Option<Package>, StoreError>;

    /// List packages matching the filter, oldest update first.
    fn list(&self, filter: &PackageFilter) -> Result<Vec<Package>, StoreError>;

    /// Count packages matching the filter.
    fn count(&self, filter: &PackageFilter) -> Result<i64, StoreError>;

    /// Move a package from `from` to `to`, writing the fields in `update`.
    ///
    /// `claim_token` must match the token of the claim that put the row in
    /// `from` (`None` for rows that were not claimed).
    ///
    /// Returns `Ok(false)` if the package is no longer in `from` under that
    /// claim.
    /// Returns `IllegalTransition` if `from -> to` is not a forward transition.
    fn transition(
        &self,
        id: &str,
        from: PackageStatus,
        to: PackageStatus,
        claim_token: Option<&str>,
        update: &PackageUpdate,
    ) -> Result<bool, StoreError>;

    /// Atomically move up to `limit` packages from `from` to `to`, oldest
    /// first, and return them. `to` is normally an in-progress marker.
    fn claim(
        &self,
        from: PackageStatus,
        to: PackageStatus,
        limit: usize,
    ) -> Result<Vec<Package>, StoreError>;

    /// Send an in-progress package back to its predecessor status for another
    /// attempt, incrementing its retry count.
    ///
    /// Returns `Ok(false)` if the package is no longer in `from` under
    /// `claim_token`.
    fn requeue(
        &self,
        id: &str,
        from: PackageStatus,
        claim_token: Option<&str>,
        error: &str,
    ) -> Result<bool, StoreError>;

    /// Reset packages that have sat in the in-progress status `marker` for
    /// longer than `older_than`. Packages that already used `max_retries`
    /// attempts go to the marker's failure status instead.
    fn recover_stuck(
        &self,
        marker: PackageStatus,
        older_than: Duration,
        max_retries: u32,
    ) -> Result<RecoveryReport, StoreError>;

    /// Record a human approval decision on a package in `PendingApproval`.
    fn decide(&self, id: &str, decision: &Decision) -> Result<Package, StoreError>;

    /// Status history of a package, oldest first.
    fn history(&self, id: &str) -> Result<Vec<StatusChange>, StoreError>;
}
