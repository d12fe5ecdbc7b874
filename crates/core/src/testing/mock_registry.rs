//! Mock source registry for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::registry::{tarball_name, DownloadedPackage, PackageRegistry, RegistryError};

/// How a mocked download should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockDownloadFailure {
    NotFound,
    Timeout,
    ServerError,
}

/// Mock implementation of [`PackageRegistry`].
///
/// Every download succeeds with a small deterministic payload unless a
/// failure was configured for the package name. Downloads are recorded.
#[derive(Debug, Default)]
pub struct MockRegistry {
    downloads: Arc<RwLock<Vec<(String, String)>>>,
    failures: Arc<RwLock<HashMap<String, MockDownloadFailure>>>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every download of `name` fail.
    pub async fn fail_package(&self, name: impl Into<String>, failure: MockDownloadFailure) {
        self.failures.write().await.insert(name.into(), failure);
    }

    pub async fn clear_failures(&self) {
        self.failures.write().await.clear();
    }

    /// `(name, version)` of every download attempt, in order.
    pub async fn recorded_downloads(&self) -> Vec<(String, String)> {
        self.downloads.read().await.clone()
    }

    pub async fn download_count(&self) -> usize {
        self.downloads.read().await.len()
    }

    /// Payload returned for a successful download.
    pub fn payload(name: &str, version: &str) -> Vec<u8> {
        format!("tarball:{}@{}", name, version).into_bytes()
    }
}

#[async_trait]
impl PackageRegistry for MockRegistry {
    fn name(&self) -> &str {
        "mock"
    }

    async fn download(
        &self,
        name: &str,
        version: &str,
    ) -> Result<DownloadedPackage, RegistryError> {
        self.downloads
            .write()
            .await
            .push((name.to_string(), version.to_string()));

        if let Some(failure) = self.failures.read().await.get(name) {
            return Err(match failure {
                MockDownloadFailure::NotFound => RegistryError::NotFound {
                    name: name.to_string(),
                    version: version.to_string(),
                },
                MockDownloadFailure::Timeout => RegistryError::Timeout,
                MockDownloadFailure::ServerError => RegistryError::ApiError {
                    status: 500,
                    message: "mock server error".to_string(),
                },
            });
        }

        Ok(DownloadedPackage {
            file_name: tarball_name(name, version),
            data: Self::payload(name, version),
        })
    }
}
