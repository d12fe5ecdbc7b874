pub mod config;
pub mod intake;
pub mod license;
pub mod metrics;
pub mod publisher;
pub mod registry;
pub mod scanner;
pub mod stages;
pub mod status;
pub mod storage;
pub mod testing;
pub mod worker;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use intake::{parse_lockfile, submit_lockfile, IntakeError, ParsedLockfile};
pub use license::{
    evaluate, LicenseCache, LicensePolicyEntry, LicensePolicyStore, LicenseTier, LicenseVerdict,
    PolicyError, PolicySnapshot, ScoreBands, SqliteLicensePolicyStore,
};
pub use stages::{
    record_decision, ApprovalConfig, ApprovalStage, LicenseStage, PackageStage, PublishStage,
};
pub use status::{
    CreateRequest, Decision, Package, PackageFilter, PackageStatus, PackageStore,
    RequestStatus, RequestSummary, SqlitePackageStore, StoreError,
};
pub use storage::{ArtifactStore, StoredArtifact};
pub use worker::{CycleReport, Stage, StageKind, Worker, WorkerConfig, WorkerError};
