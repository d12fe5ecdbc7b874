mod http;
mod metrics;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pkgvet_core::config::MetricsConfig;
use pkgvet_core::publisher::{HttpTargetRegistry, TargetRegistry};
use pkgvet_core::registry::{NpmRegistryClient, PackageRegistry};
use pkgvet_core::scanner::{TrivyScanner, VulnerabilityScanner};
use pkgvet_core::{
    load_config, validate_config, ApprovalStage, ArtifactStore, Config, LicenseCache,
    LicensePolicyStore, LicenseStage, PackageStage, PackageStore, PublishStage, SanitizedConfig,
    SqliteLicensePolicyStore, SqlitePackageStore, Stage, StageKind, Worker, WorkerConfig,
};

use http::{create_router, AppState};

#[derive(Parser, Debug)]
#[command(
    name = "pkgvet-worker",
    version,
    about = "Run one stage of the package approval pipeline"
)]
struct Cli {
    /// Stage to run: license, package, approval or publish.
    stage: StageKind,

    /// Configuration file.
    #[arg(long, env = "PKGVET_CONFIG", default_value = "pkgvet.toml")]
    config: PathBuf,

    /// Rows claimed per cycle.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Seconds between cycles.
    #[arg(long)]
    poll_interval_secs: Option<u64>,

    /// Seconds after which an in-progress row counts as abandoned.
    #[arg(long)]
    stuck_timeout_secs: Option<u64>,

    /// Attempts before a retried row is failed.
    #[arg(long)]
    max_retries: Option<u32>,

    /// Emit logs as JSON lines.
    #[arg(long, env = "PKGVET_LOG_JSON")]
    log_json: bool,

    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    if let Err(e) = run(cli).await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Overlay command-line flags on the selected stage's settings.
fn apply_overrides(config: &mut Config, cli: &Cli) {
    let settings = config.workers.settings_mut(cli.stage);
    if let Some(batch_size) = cli.batch_size {
        settings.batch_size = Some(batch_size);
    }
    if let Some(interval) = cli.poll_interval_secs {
        settings.poll_interval_secs = Some(interval);
    }
    if let Some(timeout) = cli.stuck_timeout_secs {
        settings.stuck_timeout_secs = Some(timeout);
    }
    if let Some(retries) = cli.max_retries {
        settings.max_retries = Some(retries);
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!("Loading configuration from {:?}", cli.config);
    let mut config = load_config(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;
    apply_overrides(&mut config, &cli);
    validate_config(&config).context("Configuration validation failed")?;

    let sanitized = SanitizedConfig::from(&config);
    info!(
        "Configuration loaded: {}",
        serde_json::to_string(&sanitized).unwrap_or_default()
    );

    let store: Arc<dyn PackageStore> = Arc::new(
        SqlitePackageStore::new(&config.database.path)
            .context("Failed to open package store")?,
    );
    info!("Package store initialized at {:?}", config.database.path);

    let worker_config = config.workers.resolve(cli.stage);
    let ctx = RunContext {
        store,
        worker_config,
        metrics: config.metrics.clone(),
        sanitized,
        once: cli.once,
    };

    match cli.stage {
        StageKind::License => {
            let cache = build_license_cache(&config)?;
            run_worker(LicenseStage::new(cache), ctx).await
        }
        StageKind::Package => {
            let registry: Arc<dyn PackageRegistry> = Arc::new(
                NpmRegistryClient::new(config.registry.clone())
                    .context("Failed to create registry client")?,
            );
            let scanner: Arc<dyn VulnerabilityScanner> =
                Arc::new(TrivyScanner::new(config.scanner.clone()));
            let artifacts = ArtifactStore::new(config.storage.artifact_dir.clone());
            run_worker(PackageStage::new(registry, scanner, artifacts), ctx).await
        }
        StageKind::Approval => run_worker(ApprovalStage::new(config.approval.clone()), ctx).await,
        StageKind::Publish => {
            let target: Arc<dyn TargetRegistry> = Arc::new(
                HttpTargetRegistry::new(config.target_registry.clone())
                    .context("Failed to create target registry client")?,
            );
            let artifacts = ArtifactStore::new(config.storage.artifact_dir.clone());
            run_worker(PublishStage::new(target, artifacts), ctx).await
        }
    }
}

/// Open the policy table, seed it, apply configured policies and load the cache.
fn build_license_cache(config: &Config) -> Result<Arc<LicenseCache>> {
    let licenses = &config.licenses;
    let policies = SqliteLicensePolicyStore::new(&config.database.path, licenses.bands)
        .context("Failed to open license policy store")?;

    let seeded = policies
        .seed_defaults()
        .context("Failed to seed license policies")?;
    if seeded > 0 {
        info!("Seeded {} default license policies", seeded);
    }
    for policy in &licenses.policy {
        policies
            .upsert_policy(&policy.to_entry(&licenses.bands))
            .with_context(|| format!("Failed to apply policy for {}", policy.identifier))?;
    }

    let cache = LicenseCache::load(
        Arc::new(policies),
        licenses.bands,
        licenses.unknown_score,
        Duration::from_secs(licenses.refresh_interval_secs),
    )
    .context("Failed to load license policies")?;
    Ok(Arc::new(cache))
}

struct RunContext {
    store: Arc<dyn PackageStore>,
    worker_config: WorkerConfig,
    metrics: MetricsConfig,
    sanitized: SanitizedConfig,
    once: bool,
}

async fn run_worker<S: Stage>(stage: S, ctx: RunContext) -> Result<()> {
    let kind = stage.kind();
    let worker = Arc::new(Worker::new(stage, Arc::clone(&ctx.store), ctx.worker_config));

    if ctx.once {
        let report = worker.run_cycle().await?;
        info!(
            stage = %kind,
            claimed = report.claimed,
            advanced = report.advanced,
            failed = report.failed,
            retried = report.retried,
            held = report.held,
            "Single cycle complete"
        );
        return Ok(());
    }

    worker.start().await;

    // Optional health/metrics listener
    let server = if ctx.metrics.enabled {
        let addr = SocketAddr::new(ctx.metrics.host, ctx.metrics.port);
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind to {}", addr))?;
        info!("Serving health and metrics on {}", addr);

        let app = create_router(Arc::new(AppState {
            worker: Arc::clone(&worker),
            store: Arc::clone(&ctx.store),
            config: ctx.sanitized.clone(),
        }));
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await
        });
        Some((tx, handle))
    } else {
        None
    };

    shutdown_signal().await;
    info!("Shutdown requested, finishing current cycle");
    worker.stop().await;

    if let Some((tx, handle)) = server {
        let _ = tx.send(());
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Metrics server error: {}", e),
            Err(e) => error!("Metrics server task failed: {}", e),
        }
    }

    info!("{} worker exited", kind);
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_selected_stage() {
        let cli = Cli::parse_from([
            "pkgvet-worker",
            "package",
            "--batch-size",
            "2",
            "--stuck-timeout-secs",
            "60",
        ]);
        let mut config = Config::default();
        apply_overrides(&mut config, &cli);

        let package = config.workers.resolve(StageKind::Package);
        assert_eq!(package.batch_size, 2);
        assert_eq!(package.stuck_timeout_secs, 60);
        assert_eq!(package.poll_interval_secs, 10);
        assert_eq!(config.workers.resolve(StageKind::License).batch_size, 10);
    }

    #[test]
    fn test_cli_rejects_unknown_stage() {
        assert!(Cli::try_parse_from(["pkgvet-worker", "deploy"]).is_err());
    }

    #[test]
    fn test_zero_batch_override_fails_validation() {
        let cli = Cli::parse_from(["pkgvet-worker", "license", "--batch-size", "0"]);
        let mut config = Config::default();
        apply_overrides(&mut config, &cli);
        assert!(validate_config(&config).is_err());
    }
}
