//! Pipeline lifecycle integration tests.
//!
//! These drive all four workers against one SQLite store with mock
//! collaborators:
//! - Full lifecycle from lockfile to published package
//! - Per-row failure isolation within a batch
//! - Recovery of rows left in progress
//! - Retry limits
//! - Derived request status

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use pkgvet_core::{
    intake::submit_lockfile,
    license::{LicenseCache, SqliteLicensePolicyStore, DEFAULT_UNKNOWN_SCORE},
    publisher::TargetRegistry,
    record_decision,
    registry::PackageRegistry,
    scanner::{VulnerabilityCounts, VulnerabilityScanner},
    status::{Decision, PackageFilter, PackageStatus, PackageStore, RequestStatus},
    testing::{fixtures, MockDownloadFailure, MockRegistry, MockScanner, MockTargetRegistry},
    ApprovalConfig, ApprovalStage, ArtifactStore, LicenseStage, PackageStage, PublishStage,
    ScoreBands, SqlitePackageStore, StageKind, Worker, WorkerConfig,
};

/// All four workers sharing one store.
struct Pipeline {
    _dir: TempDir,
    store: Arc<SqlitePackageStore>,
    registry: Arc<MockRegistry>,
    scanner: Arc<MockScanner>,
    target: Arc<MockTargetRegistry>,
    license: Worker<LicenseStage>,
    package: Worker<PackageStage>,
    approval: Worker<ApprovalStage>,
    publish: Worker<PublishStage>,
}

impl Pipeline {
    fn new(approval: ApprovalConfig) -> Self {
        Self::with_configs(approval, |_, config| config)
    }

    fn with_configs(
        approval: ApprovalConfig,
        tweak: impl Fn(StageKind, WorkerConfig) -> WorkerConfig,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqlitePackageStore::new(&dir.path().join("pkgvet.db")).unwrap());
        let registry = Arc::new(MockRegistry::new());
        let scanner = Arc::new(MockScanner::new());
        let target = Arc::new(MockTargetRegistry::new());
        let artifacts = ArtifactStore::new(dir.path().join("artifacts"));

        let bands = ScoreBands::default();
        let policies = SqliteLicensePolicyStore::in_memory(bands).unwrap();
        policies.seed_defaults().unwrap();
        let cache = Arc::new(
            LicenseCache::load(
                Arc::new(policies),
                bands,
                DEFAULT_UNKNOWN_SCORE,
                Duration::from_secs(300),
            )
            .unwrap(),
        );

        let shared: Arc<dyn PackageStore> = store.clone();
        let config = |kind| tweak(kind, WorkerConfig::for_stage(kind));

        Self {
            license: Worker::new(
                LicenseStage::new(cache),
                Arc::clone(&shared),
                config(StageKind::License),
            ),
            package: Worker::new(
                PackageStage::new(
                    Arc::clone(&registry) as Arc<dyn PackageRegistry>,
                    Arc::clone(&scanner) as Arc<dyn VulnerabilityScanner>,
                    artifacts.clone(),
                ),
                Arc::clone(&shared),
                config(StageKind::Package),
            ),
            approval: Worker::new(
                ApprovalStage::new(approval),
                Arc::clone(&shared),
                config(StageKind::Approval),
            ),
            publish: Worker::new(
                PublishStage::new(Arc::clone(&target) as Arc<dyn TargetRegistry>, artifacts),
                shared,
                config(StageKind::Publish),
            ),
            _dir: dir,
            store,
            registry,
            scanner,
            target,
        }
    }

    async fn run_all(&self) {
        self.license.run_cycle().await.unwrap();
        self.package.run_cycle().await.unwrap();
        self.approval.run_cycle().await.unwrap();
        self.publish.run_cycle().await.unwrap();
    }

    fn status_of(&self, name: &str) -> PackageStatus {
        let packages = self
            .store
            .list(&PackageFilter::new().with_name(name))
            .unwrap();
        assert_eq!(packages.len(), 1, "expected one row for {}", name);
        packages[0].status
    }

    fn count(&self, status: PackageStatus) -> i64 {
        self.store
            .count(&PackageFilter::new().with_status(status))
            .unwrap()
    }
}

#[tokio::test]
async fn test_scoped_packages_with_same_basename_keep_their_own_artifacts() {
    let pipeline = Pipeline::new(ApprovalConfig::default());
    let lockfile = fixtures::lockfile(&[("@a/core", "1.0.0", "MIT"), ("@b/core", "1.0.0", "MIT")]);
    submit_lockfile(pipeline.store.as_ref(), "alice", "package-lock.json", &lockfile).unwrap();

    pipeline.license.run_cycle().await.unwrap();
    pipeline.package.run_cycle().await.unwrap();

    let mut paths = Vec::new();
    for name in ["@a/core", "@b/core"] {
        let package = pipeline
            .store
            .list(&PackageFilter::new().with_name(name))
            .unwrap()
            .remove(0);
        assert_eq!(package.status, PackageStatus::SecurityScanned);
        let artifact = package.artifact.unwrap();
        assert_eq!(
            tokio::fs::read(&artifact.path).await.unwrap(),
            MockRegistry::payload(name, "1.0.0")
        );
        paths.push(artifact.path);
    }
    assert_ne!(paths[0], paths[1]);

    let mut scanned = pipeline.scanner.recorded_scans().await;
    scanned.sort();
    paths.sort();
    assert_eq!(scanned, paths);
}

fn auto_approve() -> ApprovalConfig {
    ApprovalConfig {
        auto_approve: true,
        ..ApprovalConfig::default()
    }
}

#[tokio::test]
async fn test_full_lifecycle_with_auto_approval() {
    let pipeline = Pipeline::new(auto_approve());
    pipeline
        .scanner
        .set_counts(
            "lodash",
            VulnerabilityCounts {
                critical: 1,
                ..Default::default()
            },
        )
        .await;

    let lockfile = fixtures::lockfile(&[
        ("left-pad", "1.3.0", "MIT"),
        ("lodash", "4.17.20", "MIT OR Apache-2.0"),
        ("readline-gpl", "2.0.0", "GPL-3.0"),
    ]);
    let (request, _) = submit_lockfile(
        pipeline.store.as_ref(),
        "alice",
        "package-lock.json",
        &lockfile,
    )
    .unwrap();

    pipeline.run_all().await;

    assert_eq!(pipeline.status_of("left-pad"), PackageStatus::Published);
    assert_eq!(pipeline.status_of("lodash"), PackageStatus::Rejected);
    assert_eq!(
        pipeline.status_of("readline-gpl"),
        PackageStatus::LicenseCheckFailed
    );

    let blocked = &pipeline
        .store
        .list(&PackageFilter::new().with_name("readline-gpl"))
        .unwrap()[0];
    assert_eq!(
        blocked.error.as_deref(),
        Some("license GPL-3.0 is blocked by policy")
    );
    assert_eq!(pipeline.registry.download_count().await, 2);

    let published = pipeline.target.recorded_publishes().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].name, "left-pad");
    assert_eq!(published[0].data, MockRegistry::payload("left-pad", "1.3.0"));

    let summary = pipeline.store.request_summary(&request.id).unwrap();
    assert_eq!(summary.status, RequestStatus::PartiallyCompleted);
    assert_eq!(summary.total_packages, 3);

    // Every step is in the history.
    let left_pad = &pipeline
        .store
        .list(&PackageFilter::new().with_name("left-pad"))
        .unwrap()[0];
    assert_eq!(
        left_pad.published_location.as_deref(),
        Some("mock://left-pad/left-pad-1.3.0.tgz")
    );
    assert_eq!(left_pad.claim_token, None);
    let steps: Vec<PackageStatus> = pipeline
        .store
        .history(&left_pad.id)
        .unwrap()
        .into_iter()
        .map(|change| change.to)
        .collect();
    assert_eq!(
        steps,
        vec![
            PackageStatus::Submitted,
            PackageStatus::Parsed,
            PackageStatus::CheckingLicense,
            PackageStatus::LicenseChecked,
            PackageStatus::Downloading,
            PackageStatus::Downloaded,
            PackageStatus::SecurityScanning,
            PackageStatus::SecurityScanned,
            PackageStatus::PendingApproval,
            PackageStatus::Approved,
            PackageStatus::Publishing,
            PackageStatus::Published,
        ]
    );
}

#[tokio::test]
async fn test_manual_approval() {
    let pipeline = Pipeline::new(ApprovalConfig::default());
    let request = fixtures::submit_parsed(
        pipeline.store.as_ref(),
        &[("left-pad", "MIT"), ("event-stream", "MIT")],
    )
    .unwrap();

    pipeline.run_all().await;
    assert_eq!(pipeline.count(PackageStatus::PendingApproval), 2);
    assert_eq!(
        pipeline.store.request_summary(&request.id).unwrap().status,
        RequestStatus::AwaitingApproval
    );

    let pending = pipeline
        .store
        .list(&PackageFilter::new().with_status(PackageStatus::PendingApproval))
        .unwrap();
    for package in &pending {
        let decision = if package.name == "left-pad" {
            Decision::approve("bob")
        } else {
            Decision::reject("bob", "compromised maintainer")
        };
        record_decision(pipeline.store.as_ref(), &package.id, &decision).unwrap();
    }

    pipeline.run_all().await;
    assert_eq!(pipeline.status_of("left-pad"), PackageStatus::Published);
    assert_eq!(pipeline.status_of("event-stream"), PackageStatus::Rejected);

    let summary = pipeline.store.request_summary(&request.id).unwrap();
    assert_eq!(summary.status, RequestStatus::PartiallyCompleted);
}

#[tokio::test]
async fn test_download_failures_do_not_affect_batch() {
    let pipeline = Pipeline::with_configs(ApprovalConfig::default(), |kind, mut config| {
        if kind == StageKind::Package {
            config.batch_size = 10;
        }
        config
    });

    let names: Vec<String> = (0..10).map(|i| format!("pkg-{:02}", i)).collect();
    let packages: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "MIT")).collect();
    fixtures::submit_parsed(pipeline.store.as_ref(), &packages).unwrap();

    for name in ["pkg-02", "pkg-05", "pkg-08"] {
        pipeline
            .registry
            .fail_package(name, MockDownloadFailure::NotFound)
            .await;
    }

    pipeline.license.run_cycle().await.unwrap();
    let report = pipeline.package.run_cycle().await.unwrap();

    assert_eq!(report.failed, 3);
    assert_eq!(report.unresolved(), 0);
    assert_eq!(pipeline.count(PackageStatus::DownloadFailed), 3);
    assert_eq!(pipeline.count(PackageStatus::SecurityScanned), 7);
    assert_eq!(pipeline.status_of("pkg-05"), PackageStatus::DownloadFailed);
}

#[tokio::test]
async fn test_stuck_download_is_recovered() {
    let pipeline = Pipeline::with_configs(ApprovalConfig::default(), |kind, mut config| {
        if kind == StageKind::Package {
            config.stuck_timeout_secs = 1;
        }
        config
    });
    fixtures::submit_parsed(pipeline.store.as_ref(), &[("left-pad", "MIT")]).unwrap();
    pipeline.license.run_cycle().await.unwrap();

    // A worker claimed the row and died.
    let claimed = pipeline
        .store
        .claim(PackageStatus::LicenseChecked, PackageStatus::Downloading, 10)
        .unwrap();
    assert_eq!(claimed.len(), 1);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let report = pipeline.package.run_cycle().await.unwrap();
    assert_eq!(report.recovered_reset, 1);

    let package = pipeline.store.get(&claimed[0].id).unwrap().unwrap();
    assert_eq!(package.retry_count, 1);
    assert_eq!(package.status, PackageStatus::SecurityScanned);

    let history = pipeline.store.history(&package.id).unwrap();
    assert!(history.iter().any(|change| {
        change.from == Some(PackageStatus::Downloading) && change.to == PackageStatus::LicenseChecked
    }));
}

#[tokio::test]
async fn test_publish_gives_up_after_retry_limit() {
    let pipeline = Pipeline::with_configs(auto_approve(), |kind, mut config| {
        if kind == StageKind::Publish {
            config.max_retries = 2;
        }
        config
    });
    pipeline.target.fail_always("left-pad").await;
    let request =
        fixtures::submit_parsed(pipeline.store.as_ref(), &[("left-pad", "MIT")]).unwrap();

    pipeline.run_all().await;
    assert_eq!(pipeline.status_of("left-pad"), PackageStatus::Approved);

    pipeline.publish.run_cycle().await.unwrap();
    assert_eq!(pipeline.status_of("left-pad"), PackageStatus::Approved);

    let report = pipeline.publish.run_cycle().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(pipeline.status_of("left-pad"), PackageStatus::PublishFailed);

    let package = &pipeline
        .store
        .list(&PackageFilter::new().with_name("left-pad"))
        .unwrap()[0];
    assert_eq!(package.retry_count, 2);
    assert!(package
        .error
        .as_deref()
        .unwrap()
        .contains("gave up after 2 attempts"));
    assert_eq!(pipeline.target.recorded_attempts().await.len(), 3);
    assert_eq!(
        pipeline.store.request_summary(&request.id).unwrap().status,
        RequestStatus::Failed
    );
}

#[tokio::test]
async fn test_request_status_follows_packages() {
    let pipeline = Pipeline::new(auto_approve());
    let request = fixtures::submit_parsed(
        pipeline.store.as_ref(),
        &[("a", "MIT"), ("b", "ISC"), ("c", "Apache-2.0")],
    )
    .unwrap();

    assert_eq!(
        pipeline.store.request_summary(&request.id).unwrap().status,
        RequestStatus::Processing
    );

    pipeline.run_all().await;

    let summary = pipeline.store.request_summary(&request.id).unwrap();
    assert_eq!(summary.status, RequestStatus::Completed);
    assert_eq!(summary.counts, vec![(PackageStatus::Published, 3)]);
}
