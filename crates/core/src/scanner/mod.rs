//! Vulnerability scanning of downloaded artifacts.

mod config;
mod error;
mod traits;
mod trivy;
mod types;

pub use config::ScannerConfig;
pub use error::ScannerError;
pub use traits::VulnerabilityScanner;
pub use trivy::TrivyScanner;
pub use types::{ScanReport, Severity, VulnerabilityCounts};
