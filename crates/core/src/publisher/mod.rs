//! Publishing approved artifacts to the internal registry.

mod http;

pub use http::{HttpTargetRegistry, TargetRegistryConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Target registry rejected {name}@{version} (HTTP {status}): {message}")]
    Rejected {
        name: String,
        version: String,
        status: u16,
        message: String,
    },

    #[error("Target registry request timed out")]
    Timeout,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Failed to read artifact: {0}")]
    Artifact(String),
}

impl From<reqwest::Error> for PublishError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PublishError::Timeout
        } else {
            PublishError::Http(e.to_string())
        }
    }
}

/// What gets published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub name: String,
    pub version: String,
    pub file_name: String,
    pub sha256: String,
    pub data: Vec<u8>,
}

/// Confirmation from the target registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub location: String,
    /// True if the registry already had this exact version.
    pub already_present: bool,
    pub published_at: DateTime<Utc>,
}

/// The internal registry approved packages are published to.
#[async_trait]
pub trait TargetRegistry: Send + Sync {
    /// Returns the name of this registry implementation.
    fn name(&self) -> &str;

    /// Publish an artifact. Publishing the same version twice is not an error.
    async fn publish(&self, request: &PublishRequest) -> Result<PublishReceipt, PublishError>;
}
