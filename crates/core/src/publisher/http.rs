//! HTTP target registry.
//!
//! Artifacts are uploaded with `PUT {url}/{name}/-/{file}` and a bearer token.
//! A `409 Conflict` means the version is already there and counts as success.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{PublishError, PublishReceipt, PublishRequest, TargetRegistry};

/// Target registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRegistryConfig {
    /// Base URL of the internal registry.
    #[serde(default = "default_url")]
    pub url: String,
    /// Bearer token. Omitted from sanitized config output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_url() -> String {
    "http://localhost:4873".to_string()
}

fn default_timeout() -> u64 {
    120
}

impl Default for TargetRegistryConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            token: None,
            timeout_secs: default_timeout(),
        }
    }
}

pub struct HttpTargetRegistry {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpTargetRegistry {
    pub fn new(config: TargetRegistryConfig) -> Result<Self, PublishError> {
        let client = Client::builder()
            .user_agent(format!("pkgvet/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token,
        })
    }

    fn upload_url(&self, request: &PublishRequest) -> String {
        format!(
            "{}/{}/-/{}",
            self.base_url,
            request.name,
            urlencoding::encode(&request.file_name)
        )
    }
}

#[async_trait]
impl TargetRegistry for HttpTargetRegistry {
    fn name(&self) -> &str {
        "http"
    }

    async fn publish(&self, request: &PublishRequest) -> Result<PublishReceipt, PublishError> {
        let url = self.upload_url(request);
        debug!("Publishing {}@{} to {}", request.name, request.version, url);

        let mut builder = self
            .client
            .put(&url)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .header("X-Checksum-Sha256", &request.sha256)
            .body(request.data.clone());
        if let Some(ref token) = self.token {
            builder = builder.bearer_auth(token);
        }
        let response = builder.send().await?;

        let status = response.status();
        if status == StatusCode::CONFLICT {
            info!(
                "{}@{} already present in target registry",
                request.name, request.version
            );
            return Ok(PublishReceipt {
                location: url,
                already_present: true,
                published_at: Utc::now(),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PublishError::Rejected {
                name: request.name.clone(),
                version: request.version.clone(),
                status: status.as_u16(),
                message,
            });
        }

        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or(url);

        Ok(PublishReceipt {
            location,
            already_present: false,
            published_at: Utc::now(),
        })
    }
}
