//! Source package registry access.

mod npm;

pub use npm::{tarball_name, NpmRegistryClient, NpmRegistryConfig};

use async_trait::async_trait;
use thiserror::Error;

/// Errors from a source registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Package not found in registry: {name}@{version}")]
    NotFound { name: String, version: String },

    #[error("Registry rate limit exceeded")]
    RateLimitExceeded,

    #[error("Registry error (HTTP {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Registry request timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid package name: {0}")]
    InvalidName(String),
}

impl RegistryError {
    /// Whether a later attempt may succeed: timeouts, rate limits, connection
    /// errors and 5xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            RegistryError::Timeout | RegistryError::RateLimitExceeded | RegistryError::Http(_) => {
                true
            }
            RegistryError::ApiError { status, .. } => (500..=599).contains(status),
            RegistryError::NotFound { .. } | RegistryError::InvalidName(_) => false,
        }
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RegistryError::Timeout
        } else {
            RegistryError::Http(e.to_string())
        }
    }
}

/// A package tarball fetched from a registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedPackage {
    /// File name the tarball should be stored under.
    pub file_name: String,
    pub data: Vec<u8>,
}

/// A registry packages are downloaded from.
#[async_trait]
pub trait PackageRegistry: Send + Sync {
    /// Returns the name of this registry implementation.
    fn name(&self) -> &str;

    /// Download the tarball for `name@version`.
    async fn download(&self, name: &str, version: &str)
        -> Result<DownloadedPackage, RegistryError>;
}
