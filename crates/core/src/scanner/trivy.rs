//! Trivy-based vulnerability scanner.
//!
//! The artifact tarball is unpacked next to itself, `trivy fs` is run over
//! the unpacked tree and its JSON report is reduced to severity counts.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use super::config::ScannerConfig;
use super::error::ScannerError;
use super::traits::VulnerabilityScanner;
use super::types::{ScanReport, Severity, VulnerabilityCounts};
use crate::storage::StoredArtifact;

#[derive(Debug, Deserialize)]
struct TrivyReport {
    #[serde(rename = "Results", default)]
    results: Option<Vec<TrivyResult>>,
}

#[derive(Debug, Deserialize)]
struct TrivyResult {
    #[serde(rename = "Vulnerabilities", default)]
    vulnerabilities: Option<Vec<TrivyVulnerability>>,
}

#[derive(Debug, Deserialize)]
struct TrivyVulnerability {
    #[serde(rename = "VulnerabilityID")]
    id: String,
    #[serde(rename = "PkgName", default)]
    package: Option<String>,
    #[serde(rename = "Severity", default)]
    severity: String,
}

/// Scanner that shells out to `trivy`.
pub struct TrivyScanner {
    config: ScannerConfig,
}

impl TrivyScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ScannerConfig::default())
    }

    /// Checks that the trivy binary can be launched.
    pub async fn validate(&self) -> Result<(), ScannerError> {
        Command::new(&self.config.trivy_path)
            .arg("--version")
            .output()
            .await
            .map_err(|e| self.launch_error(e))?;
        Ok(())
    }

    fn launch_error(&self, e: std::io::Error) -> ScannerError {
        if e.kind() == std::io::ErrorKind::NotFound {
            ScannerError::ScannerNotFound {
                path: self.config.trivy_path.clone(),
            }
        } else {
            ScannerError::Io(e)
        }
    }

    fn unpack_dir(artifact: &Path) -> PathBuf {
        let mut name = artifact
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".scan");
        artifact.with_file_name(name)
    }

    fn build_args(&self, target: &Path) -> Vec<String> {
        let mut args = vec![
            "fs".to_string(),
            "--format".to_string(),
            "json".to_string(),
            "--quiet".to_string(),
            "--scanners".to_string(),
            "vuln".to_string(),
        ];
        args.extend(self.config.extra_args.iter().cloned());
        args.push(target.to_string_lossy().into_owned());
        args
    }

    async fn unpack(&self, artifact: &Path, dest: &Path) -> Result<(), ScannerError> {
        tokio::fs::create_dir_all(dest).await?;
        let output = Command::new(&self.config.tar_path)
            .arg("-xzf")
            .arg(artifact)
            .arg("-C")
            .arg(dest)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ScannerError::UnpackFailed {
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ScannerError::UnpackFailed {
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    async fn run_trivy(&self, target: &Path) -> Result<String, ScannerError> {
        let output = Command::new(&self.config.trivy_path)
            .args(self.build_args(target))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.launch_error(e))?;

        if !output.status.success() {
            return Err(ScannerError::ScanFailed {
                reason: format!(
                    "trivy exited with code {:?}: {}",
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Reduce a trivy JSON report to severity counts. The same advisory for
    /// the same package is counted once even if several targets report it.
    pub fn parse_report(json: &str) -> Result<VulnerabilityCounts, ScannerError> {
        let report: TrivyReport =
            serde_json::from_str(json).map_err(|e| ScannerError::InvalidReport {
                reason: e.to_string(),
            })?;

        let mut seen = HashSet::new();
        let mut counts = VulnerabilityCounts::default();
        for result in report.results.unwrap_or_default() {
            for vuln in result.vulnerabilities.unwrap_or_default() {
                if seen.insert((vuln.id.clone(), vuln.package.clone())) {
                    counts.record(Severity::from_label(&vuln.severity));
                }
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl VulnerabilityScanner for TrivyScanner {
    fn name(&self) -> &str {
        "trivy"
    }

    async fn scan(&self, artifact: &StoredArtifact) -> Result<ScanReport, ScannerError> {
        if !artifact.path.exists() {
            return Err(ScannerError::ArtifactNotFound {
                path: artifact.path.clone(),
            });
        }

        let started = Instant::now();
        let workdir = Self::unpack_dir(&artifact.path);
        let timeout_secs = self.config.timeout_secs;

        let result = timeout(Duration::from_secs(timeout_secs), async {
            self.unpack(&artifact.path, &workdir).await?;
            let stdout = self.run_trivy(&workdir).await?;
            Self::parse_report(&stdout)
        })
        .await;

        if let Err(e) = tokio::fs::remove_dir_all(&workdir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %workdir.display(), error = %e, "Failed to clean scan directory");
            }
        }

        let counts = match result {
            Ok(counts) => counts?,
            Err(_) => return Err(ScannerError::Timeout { timeout_secs }),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(
            artifact = %artifact.path.display(),
            findings = counts.total(),
            duration_ms,
            "Scan complete"
        );

        Ok(ScanReport {
            counts,
            duration_ms,
            scanner: self.name().to_string(),
        })
    }
}
