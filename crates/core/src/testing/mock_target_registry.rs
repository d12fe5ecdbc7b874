//! Mock target registry for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::publisher::{PublishError, PublishReceipt, PublishRequest, TargetRegistry};

/// Mock implementation of [`TargetRegistry`].
///
/// Failures are configured per package name as a number of attempts that
/// fail before publishing succeeds (`u32::MAX` for always).
#[derive(Debug, Default)]
pub struct MockTargetRegistry {
    published: Arc<RwLock<Vec<PublishRequest>>>,
    attempts: Arc<RwLock<Vec<String>>>,
    failures: Arc<RwLock<HashMap<String, u32>>>,
}

impl MockTargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` publish attempts of `name`.
    pub async fn fail_times(&self, name: impl Into<String>, times: u32) {
        self.failures.write().await.insert(name.into(), times);
    }

    /// Fail every publish attempt of `name`.
    pub async fn fail_always(&self, name: impl Into<String>) {
        self.fail_times(name, u32::MAX).await;
    }

    /// Successfully published requests.
    pub async fn recorded_publishes(&self) -> Vec<PublishRequest> {
        self.published.read().await.clone()
    }

    /// Names of every attempt, successful or not.
    pub async fn recorded_attempts(&self) -> Vec<String> {
        self.attempts.read().await.clone()
    }
}

#[async_trait]
impl TargetRegistry for MockTargetRegistry {
    fn name(&self) -> &str {
        "mock"
    }

    async fn publish(&self, request: &PublishRequest) -> Result<PublishReceipt, PublishError> {
        self.attempts.write().await.push(request.name.clone());

        {
            let mut failures = self.failures.write().await;
            if let Some(remaining) = failures.get_mut(&request.name) {
                if *remaining > 0 {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    return Err(PublishError::Rejected {
                        name: request.name.clone(),
                        version: request.version.clone(),
                        status: 503,
                        message: "mock publish failure".to_string(),
                    });
                }
            }
        }

        self.published.write().await.push(request.clone());
        Ok(PublishReceipt {
            location: format!("mock://{}/{}", request.name, request.file_name),
            already_present: false,
            published_at: Utc::now(),
        })
    }
}
