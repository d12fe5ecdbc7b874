//! Package status tracking.
//!
//! Every package moves through a closed set of statuses. The store only
//! accepts forward transitions from the status the caller expects, which is
//! how concurrent workers coordinate.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqlitePackageStore;
pub use store::{CreateRequest, PackageFilter, PackageStore, RecoveryReport, StoreError};
pub use types::{
    Decision, Disposition, Package, PackageSpec, PackageStatus, PackageUpdate, RequestRecord,
    RequestStatus, RequestSummary, StatusChange,
};
