use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::license::{LicensePolicyEntry, LicenseTier, ScoreBands, DEFAULT_UNKNOWN_SCORE};
use crate::publisher::TargetRegistryConfig;
use crate::registry::NpmRegistryConfig;
use crate::scanner::ScannerConfig;
use crate::stages::ApprovalConfig;
use crate::worker::WorkersConfig;

/// Root configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub licenses: LicensesConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub registry: NpmRegistryConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub target_registry: TargetRegistryConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("pkgvet.db")
}

/// `[licenses]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LicensesConfig {
    /// How often workers reload the policy table.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Score given to identifiers missing from the policy table.
    #[serde(default = "default_unknown_score")]
    pub unknown_score: u8,
    #[serde(default)]
    pub bands: ScoreBands,
    /// Policies upserted into the database at startup.
    #[serde(default)]
    pub policy: Vec<PolicyOverride>,
}

impl Default for LicensesConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            unknown_score: default_unknown_score(),
            bands: ScoreBands::default(),
            policy: Vec::new(),
        }
    }
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_unknown_score() -> u8 {
    DEFAULT_UNKNOWN_SCORE
}

/// A `[[licenses.policy]]` entry. The score defaults to the tier's band.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PolicyOverride {
    pub identifier: String,
    pub tier: LicenseTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

impl PolicyOverride {
    pub fn to_entry(&self, bands: &ScoreBands) -> LicensePolicyEntry {
        let entry = LicensePolicyEntry::new(self.identifier.clone(), self.tier, bands)
            .with_aliases(self.aliases.iter().cloned());
        match self.score {
            Some(score) => entry.with_score(score),
            None => entry,
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root directory for downloaded artifacts.
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            artifact_dir: default_artifact_dir(),
        }
    }
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

/// `[metrics]` section: the health and metrics listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    9090
}

/// Config safe to log (tokens redacted).
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub database: DatabaseConfig,
    pub licenses: SanitizedLicensesConfig,
    pub workers: WorkersConfig,
    pub registry: SanitizedEndpoint,
    pub scanner: ScannerConfig,
    pub target_registry: SanitizedEndpoint,
    pub approval: ApprovalConfig,
    pub storage: StorageConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedLicensesConfig {
    pub refresh_interval_secs: u64,
    pub unknown_score: u8,
    pub bands: ScoreBands,
    pub policy_overrides: usize,
}

/// Registry endpoint with the token hidden.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedEndpoint {
    pub url: String,
    pub token_configured: bool,
    pub timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            database: config.database.clone(),
            licenses: SanitizedLicensesConfig {
                refresh_interval_secs: config.licenses.refresh_interval_secs,
                unknown_score: config.licenses.unknown_score,
                bands: config.licenses.bands,
                policy_overrides: config.licenses.policy.len(),
            },
            workers: config.workers.clone(),
            registry: SanitizedEndpoint {
                url: config.registry.url.clone(),
                token_configured: config.registry.token.as_ref().is_some_and(|t| !t.is_empty()),
                timeout_secs: config.registry.timeout_secs,
            },
            scanner: config.scanner.clone(),
            target_registry: SanitizedEndpoint {
                url: config.target_registry.url.clone(),
                token_configured: config
                    .target_registry
                    .token
                    .as_ref()
                    .is_some_and(|t| !t.is_empty()),
                timeout_secs: config.target_registry.timeout_secs,
            },
            approval: config.approval.clone(),
            storage: config.storage.clone(),
            metrics: config.metrics.clone(),
        }
    }
}
