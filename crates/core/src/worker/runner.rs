//! Worker loop.
//!
//! A worker drives one [`Stage`]: every `poll_interval_secs` it runs a cycle
//! of stuck-row recovery, claim, per-row processing and commit. Shutdown is
//! only observed between cycles; rows left in progress by a killed process
//! are picked up by the next recovery sweep.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::WorkerConfig;
use super::stage::{Stage, StageOutcome};
use super::types::{CycleReport, WorkerError, WorkerStatus};
use crate::metrics;
use crate::status::{Package, PackageStatus, PackageStore, PackageUpdate};

#[derive(Default)]
struct Stats {
    cycles: u64,
    last_cycle_at: Option<chrono::DateTime<Utc>>,
    last_report: Option<CycleReport>,
    last_error: Option<String>,
}

struct Inner<S: Stage> {
    stage: S,
    store: Arc<dyn PackageStore>,
    config: WorkerConfig,
    stats: RwLock<Stats>,
}

/// Runs one stage against the package store.
pub struct Worker<S: Stage> {
    inner: Arc<Inner<S>>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl<S: Stage> Worker<S> {
    pub fn new(stage: S, store: Arc<dyn PackageStore>, config: WorkerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            inner: Arc::new(Inner {
                stage,
                store,
                config,
                stats: RwLock::new(Stats::default()),
            }),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.inner.config
    }

    pub fn stage(&self) -> &S {
        &self.inner.stage
    }

    /// Start the worker loop in a background task.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("{} worker already running", self.inner.stage.kind());
            return;
        }

        let kind = self.inner.stage.kind();
        info!(
            stage = %kind,
            batch_size = self.inner.config.batch_size,
            poll_interval_secs = self.inner.config.poll_interval_secs,
            stuck_timeout_secs = self.inner.config.stuck_timeout_secs,
            "Starting worker"
        );
        metrics::WORKER_RUNNING
            .with_label_values(&[kind.as_str()])
            .set(1);

        let inner = Arc::clone(&self.inner);
        let running = Arc::clone(&self.running);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let interval = Duration::from_secs(self.inner.config.poll_interval_secs);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("{} worker received shutdown signal", kind);
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if !running.load(Ordering::Relaxed) {
                            break;
                        }
                        if let Err(e) = inner.run_cycle().await {
                            error!("{} worker cycle failed: {}", kind, e);
                        }
                    }
                }
            }
            metrics::WORKER_RUNNING
                .with_label_values(&[kind.as_str()])
                .set(0);
        });

        *self.handle.lock().await = Some(handle);
    }

    /// Stop the loop. Waits for the current cycle to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("{} worker not running", self.inner.stage.kind());
            return;
        }

        info!("Stopping {} worker", self.inner.stage.kind());
        let _ = self.shutdown_tx.send(());

        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                error!("{} worker task ended abnormally: {}", self.inner.stage.kind(), e);
            }
        }

        info!("{} worker stopped", self.inner.stage.kind());
    }

    /// Run a single cycle now.
    pub async fn run_cycle(&self) -> Result<CycleReport, WorkerError> {
        self.inner.run_cycle().await
    }

    pub async fn status(&self) -> WorkerStatus {
        let stats = self.inner.stats.read().await;
        WorkerStatus {
            stage: self.inner.stage.kind(),
            running: self.running.load(Ordering::Relaxed),
            cycles: stats.cycles,
            last_cycle_at: stats.last_cycle_at,
            last_report: stats.last_report.clone(),
            last_error: stats.last_error.clone(),
        }
    }
}

impl<S: Stage> Inner<S> {
    async fn run_cycle(&self) -> Result<CycleReport, WorkerError> {
        let kind = self.stage.kind();
        let started = Instant::now();

        let result = self.cycle().await;

        metrics::CYCLE_DURATION
            .with_label_values(&[kind.as_str()])
            .observe(started.elapsed().as_secs_f64());

        let mut stats = self.stats.write().await;
        stats.cycles += 1;
        stats.last_cycle_at = Some(Utc::now());
        match &result {
            Ok(report) => {
                stats.last_report = Some(report.clone());
                stats.last_error = None;
            }
            Err(e) => {
                metrics::CYCLE_ERRORS.with_label_values(&[kind.as_str()]).inc();
                stats.last_error = Some(e.to_string());
            }
        }

        result
    }

    async fn cycle(&self) -> Result<CycleReport, WorkerError> {
        let kind = self.stage.kind();
        let mut report = CycleReport::default();

        self.recover_stuck(&mut report)?;

        let cycle = self.stage.prepare_cycle().await?;

        for claim in self.stage.claims() {
            let packages = self
                .store
                .claim(claim.from, claim.marker, self.config.batch_size)?;
            if packages.is_empty() {
                continue;
            }

            debug!(
                stage = %kind,
                from = %claim.from,
                marker = %claim.marker,
                count = packages.len(),
                "Claimed packages"
            );
            metrics::PACKAGES_CLAIMED
                .with_label_values(&[kind.as_str(), claim.marker.as_str()])
                .inc_by(packages.len() as u64);
            report.claimed += packages.len();

            // The whole batch must be resolved before recovery may reclaim it.
            let deadline = tokio::time::Instant::now()
                + Duration::from_secs(self.config.stuck_timeout_secs);
            for package in &packages {
                let outcome = self
                    .process_row(&cycle, package, claim.marker, deadline)
                    .await;
                self.commit(package, claim.marker, outcome, &mut report);
            }
        }

        if report.claimed > 0 || report.recovered_reset + report.recovered_exhausted > 0 {
            info!(
                stage = %kind,
                claimed = report.claimed,
                advanced = report.advanced,
                failed = report.failed,
                retried = report.retried,
                held = report.held,
                "Cycle complete"
            );
        }

        Ok(report)
    }

    fn recover_stuck(&self, report: &mut CycleReport) -> Result<(), WorkerError> {
        let older_than = chrono::Duration::seconds(self.config.stuck_timeout_secs as i64);

        for claim in self.stage.claims() {
            if !claim.marker.is_in_progress() {
                continue;
            }
            let recovery =
                self.store
                    .recover_stuck(claim.marker, older_than, self.config.max_retries)?;
            if recovery.total() > 0 {
                warn!(
                    stage = %self.stage.kind(),
                    status = %claim.marker,
                    reset = recovery.reset,
                    exhausted = recovery.exhausted,
                    "Recovered stuck packages"
                );
                metrics::STUCK_RECOVERED
                    .with_label_values(&[claim.marker.as_str(), "reset"])
                    .inc_by(recovery.reset as u64);
                metrics::STUCK_RECOVERED
                    .with_label_values(&[claim.marker.as_str(), "exhausted"])
                    .inc_by(recovery.exhausted as u64);
            }
            report.add_recovery(&recovery);
        }
        Ok(())
    }

    /// Run the stage on one row, turning panics and overruns of the batch
    /// deadline into outcomes.
    async fn process_row(
        &self,
        cycle: &S::Cycle,
        package: &Package,
        marker: PackageStatus,
        deadline: tokio::time::Instant,
    ) -> StageOutcome {
        if tokio::time::Instant::now() >= deadline {
            return StageOutcome::retry(format!(
                "claim expired after {}s before processing started",
                self.config.stuck_timeout_secs
            ));
        }
        let work = AssertUnwindSafe(self.stage.process(cycle, package, marker)).catch_unwind();

        match tokio::time::timeout_at(deadline, work).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(payload)) => {
                let message = panic_message(payload);
                error!(
                    package = %package.name,
                    version = %package.version,
                    "Stage panicked: {}",
                    message
                );
                StageOutcome::fail(format!("internal error: {}", message))
            }
            Err(_) => StageOutcome::retry(format!(
                "processing exceeded {}s",
                self.config.stuck_timeout_secs
            )),
        }
    }

    fn commit(
        &self,
        package: &Package,
        marker: PackageStatus,
        outcome: StageOutcome,
        report: &mut CycleReport,
    ) {
        let kind = self.stage.kind();
        let label = outcome.label();
        let token = package.claim_token.as_deref();

        let result = match outcome {
            StageOutcome::Advance { to, update } => self
                .store
                .transition(&package.id, marker, to, token, &update)
                .map(|moved| (moved, to)),
            StageOutcome::Fail { error, update } => self.fail(package, marker, error, update),
            StageOutcome::Retry { error } => {
                if package.retry_count >= self.config.max_retries {
                    let error = format!(
                        "{} (gave up after {} attempts)",
                        error, package.retry_count
                    );
                    self.fail(package, marker, error, PackageUpdate::default())
                } else {
                    warn!(
                        package = %package.name,
                        version = %package.version,
                        attempt = package.retry_count + 1,
                        "Retrying: {}",
                        error
                    );
                    let to = marker.recovery_target().unwrap_or(marker);
                    self.store
                        .requeue(&package.id, marker, token, &error)
                        .map(|moved| (moved, to))
                }
            }
            StageOutcome::Hold => Ok((true, marker)),
        };

        let outcome_label = match result {
            Ok((true, to)) => {
                if to.is_failure() {
                    report.failed += 1;
                    "failed"
                } else if to == marker {
                    report.held += 1;
                    "held"
                } else if label == "retried" {
                    report.retried += 1;
                    "retried"
                } else {
                    report.advanced += 1;
                    "advanced"
                }
            }
            Ok((false, _)) => {
                warn!(
                    package = %package.name,
                    version = %package.version,
                    "Package moved on before its result was committed"
                );
                report.lost += 1;
                "lost"
            }
            Err(e) => {
                error!(
                    package = %package.name,
                    version = %package.version,
                    "Failed to commit {} result: {}",
                    label,
                    e
                );
                report.errors += 1;
                // Leave nothing claimed: try the failure status directly.
                if let Some(fail_to) = marker.failure_sibling() {
                    let update = PackageUpdate::failed(format!("commit failed: {}", e));
                    match self
                        .store
                        .transition(&package.id, marker, fail_to, token, &update)
                    {
                        Ok(true) => report.failed += 1,
                        Ok(false) => report.lost += 1,
                        Err(e) => error!("Failed to mark {} failed: {}", package.id, e),
                    }
                }
                "error"
            }
        };

        metrics::PACKAGES_PROCESSED
            .with_label_values(&[kind.as_str(), outcome_label])
            .inc();
    }

    fn fail(
        &self,
        package: &Package,
        marker: PackageStatus,
        error: String,
        update: PackageUpdate,
    ) -> Result<(bool, PackageStatus), crate::status::StoreError> {
        warn!(
            package = %package.name,
            version = %package.version,
            status = %marker,
            "Package failed: {}",
            error
        );
        match marker.failure_sibling() {
            Some(to) => {
                let update = update.with_error(error);
                self.store
                    .transition(&package.id, marker, to, package.claim_token.as_deref(), &update)
                    .map(|moved| (moved, to))
            }
            // No failure status for this marker (e.g. pending approval):
            // the row stays for a human to look at.
            None => Ok((true, marker)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{CreateRequest, PackageFilter, PackageSpec, SqlitePackageStore};
    use crate::worker::{Claim, StageKind};
    use async_trait::async_trait;

    const CLAIMS: [Claim; 1] = [Claim::new(
        PackageStatus::Parsed,
        PackageStatus::CheckingLicense,
    )];

    /// Fails packages whose name starts with "bad", panics on "panic",
    /// retries "flaky", sleeps on "slow*" and advances everything else.
    struct ScriptedStage;

    #[async_trait]
    impl Stage for ScriptedStage {
        type Cycle = ();

        fn kind(&self) -> StageKind {
            StageKind::License
        }

        fn claims(&self) -> &[Claim] {
            &CLAIMS
        }

        async fn prepare_cycle(&self) -> Result<(), WorkerError> {
            Ok(())
        }

        async fn process(
            &self,
            _cycle: &(),
            package: &Package,
            _marker: PackageStatus,
        ) -> StageOutcome {
            if package.name.starts_with("bad") {
                StageOutcome::fail("scripted failure")
            } else if package.name == "panic" {
                panic!("scripted panic");
            } else if package.name == "flaky" {
                StageOutcome::retry("try later")
            } else if package.name.starts_with("slow") {
                tokio::time::sleep(Duration::from_millis(600)).await;
                StageOutcome::advance(PackageStatus::LicenseChecked, PackageUpdate::default())
            } else {
                StageOutcome::advance(PackageStatus::LicenseChecked, PackageUpdate::default())
            }
        }
    }

    fn setup(names: &[&str]) -> (Arc<SqlitePackageStore>, Worker<ScriptedStage>) {
        setup_with_timeout(names, 60)
    }

    fn setup_with_timeout(
        names: &[&str],
        stuck_timeout_secs: u64,
    ) -> (Arc<SqlitePackageStore>, Worker<ScriptedStage>) {
        let store = Arc::new(SqlitePackageStore::in_memory().unwrap());
        let mut request = CreateRequest::new("tester");
        for name in names {
            request = request.with_package(PackageSpec::new(*name, "1.0.0"));
        }
        let record = store.create_request(request).unwrap();
        for package in store.request_packages(&record.id).unwrap() {
            store
                .transition(
                    &package.id,
                    PackageStatus::Submitted,
                    PackageStatus::Parsed,
                    None,
                    &PackageUpdate::default(),
                )
                .unwrap();
        }

        let config = WorkerConfig {
            batch_size: 10,
            poll_interval_secs: 1,
            stuck_timeout_secs,
            max_retries: 1,
        };
        let worker = Worker::new(
            ScriptedStage,
            Arc::clone(&store) as Arc<dyn PackageStore>,
            config,
        );
        (store, worker)
    }

    fn count(store: &SqlitePackageStore, status: PackageStatus) -> i64 {
        store
            .count(&PackageFilter::new().with_status(status))
            .unwrap()
    }

    #[tokio::test]
    async fn test_cycle_isolates_failures_and_panics() {
        let (store, worker) = setup(&["a", "b", "bad-1", "panic", "c"]);

        let report = worker.run_cycle().await.unwrap();
        assert_eq!(report.claimed, 5);
        assert_eq!(report.advanced, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(report.unresolved(), 0);

        assert_eq!(count(&store, PackageStatus::LicenseChecked), 3);
        assert_eq!(count(&store, PackageStatus::LicenseCheckFailed), 2);
        assert_eq!(count(&store, PackageStatus::CheckingLicense), 0);

        let panicked = store
            .list(&PackageFilter::new().with_name("panic"))
            .unwrap()
            .remove(0);
        assert!(panicked.error.unwrap().contains("scripted panic"));
    }

    #[tokio::test]
    async fn test_retry_then_give_up() {
        let (store, worker) = setup(&["flaky"]);

        let report = worker.run_cycle().await.unwrap();
        assert_eq!(report.retried, 1);
        let package = store.list(&PackageFilter::new()).unwrap().remove(0);
        assert_eq!(package.status, PackageStatus::Parsed);
        assert_eq!(package.retry_count, 1);

        let report = worker.run_cycle().await.unwrap();
        assert_eq!(report.failed, 1);
        let package = store.get(&package.id).unwrap().unwrap();
        assert_eq!(package.status, PackageStatus::LicenseCheckFailed);
        assert!(package.error.unwrap().contains("gave up"));
    }

    #[tokio::test]
    async fn test_batch_shares_one_deadline() {
        let (store, worker) = setup_with_timeout(&["slow-1", "slow-2"], 1);

        let report = worker.run_cycle().await.unwrap();
        assert_eq!(report.claimed, 2);
        assert_eq!(report.advanced, 1);
        assert_eq!(report.retried, 1);

        let second = store
            .list(&PackageFilter::new().with_name("slow-2"))
            .unwrap()
            .remove(0);
        assert_eq!(second.status, PackageStatus::Parsed);
        assert_eq!(second.retry_count, 1);
        assert!(second.error.unwrap().contains("exceeded 1s"));
    }

    #[tokio::test]
    async fn test_commit_rejected_after_reclaim() {
        let (store, worker) = setup(&["a"]);
        let stale = store
            .claim(PackageStatus::Parsed, PackageStatus::CheckingLicense, 1)
            .unwrap()
            .remove(0);
        store
            .recover_stuck(PackageStatus::CheckingLicense, chrono::Duration::zero(), 3)
            .unwrap();
        let current = store
            .claim(PackageStatus::Parsed, PackageStatus::CheckingLicense, 1)
            .unwrap()
            .remove(0);

        let mut report = CycleReport::default();
        worker.inner.commit(
            &stale,
            PackageStatus::CheckingLicense,
            StageOutcome::fail("late result"),
            &mut report,
        );
        assert_eq!(report.lost, 1);
        assert_eq!(count(&store, PackageStatus::CheckingLicense), 1);

        worker.inner.commit(
            &current,
            PackageStatus::CheckingLicense,
            StageOutcome::advance(PackageStatus::LicenseChecked, PackageUpdate::default()),
            &mut report,
        );
        assert_eq!(report.advanced, 1);
        assert_eq!(count(&store, PackageStatus::LicenseChecked), 1);
    }

    #[tokio::test]
    async fn test_empty_cycle() {
        let (_store, worker) = setup(&[]);
        let report = worker.run_cycle().await.unwrap();
        assert_eq!(report, CycleReport::default());

        let status = worker.status().await;
        assert_eq!(status.cycles, 1);
        assert!(!status.running);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (store, worker) = setup(&["a"]);
        worker.start().await;
        assert!(worker.status().await.running);

        // One poll interval plus slack.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        worker.stop().await;

        assert!(!worker.status().await.running);
        assert_eq!(count(&store, PackageStatus::LicenseChecked), 1);
    }
}
