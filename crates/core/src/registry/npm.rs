//! npm registry client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{DownloadedPackage, PackageRegistry, RegistryError};

/// npm registry client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NpmRegistryConfig {
    /// Base URL (default: https://registry.npmjs.org).
    #[serde(default = "default_url")]
    pub url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Optional bearer token for private registries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

fn default_url() -> String {
    "https://registry.npmjs.org".to_string()
}

fn default_timeout() -> u64 {
    60
}

impl Default for NpmRegistryConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            timeout_secs: default_timeout(),
            token: None,
        }
    }
}

/// Tarball file name for a package: `@scope/name` -> `name-<version>.tgz`.
pub fn tarball_name(name: &str, version: &str) -> String {
    let base = name.rsplit('/').next().unwrap_or(name);
    format!("{}-{}.tgz", base, version)
}

/// Path of a package tarball below the registry root.
pub fn tarball_path(name: &str, version: &str) -> Result<String, RegistryError> {
    let invalid = || RegistryError::InvalidName(name.to_string());
    let encoded = match name.strip_prefix('@') {
        Some(scoped) => {
            let (scope, pkg) = scoped.split_once('/').ok_or_else(invalid)?;
            if scope.is_empty() || pkg.is_empty() || pkg.contains('/') {
                return Err(invalid());
            }
            format!("@{}/{}", urlencoding::encode(scope), urlencoding::encode(pkg))
        }
        None => {
            if name.is_empty() || name.contains('/') {
                return Err(invalid());
            }
            urlencoding::encode(name).into_owned()
        }
    };
    Ok(format!(
        "{}/-/{}",
        encoded,
        urlencoding::encode(&tarball_name(name, version))
    ))
}

/// Client for the npm registry tarball endpoint.
pub struct NpmRegistryClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl NpmRegistryClient {
    pub fn new(config: NpmRegistryConfig) -> Result<Self, RegistryError> {
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
}

#[async_trait]
impl PackageRegistry for NpmRegistryClient {
    fn name(&self) -> &str {
        "npm"
    }

    async fn download(
        &self,
        name: &str,
        version: &str,
    ) -> Result<DownloadedPackage, RegistryError> {
        let url = format!("{}/{}", self.base_url, tarball_path(name, version)?);
        debug!("npm download: {}", url);

        let mut request = self.client.get(&url);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;

        let status = response.status();
        if status == 404 {
            return Err(RegistryError::NotFound {
                name: name.to_string(),
                version: version.to_string(),
            });
        }
        if status == 429 {
            warn!("npm registry rate limit exceeded");
            return Err(RegistryError::RateLimitExceeded);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        let data = response.bytes().await?.to_vec();
        Ok(DownloadedPackage {
            file_name: tarball_name(name, version),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tarball_name() {
        assert_eq!(tarball_name("left-pad", "1.3.0"), "left-pad-1.3.0.tgz");
        assert_eq!(tarball_name("@babel/core", "7.24.0"), "core-7.24.0.tgz");
    }

    #[test]
    fn test_tarball_path_unscoped() {
        assert_eq!(
            tarball_path("left-pad", "1.3.0").unwrap(),
            "left-pad/-/left-pad-1.3.0.tgz"
        );
    }

    #[test]
    fn test_tarball_path_scoped() {
        assert_eq!(
            tarball_path("@babel/core", "7.24.0").unwrap(),
            "@babel/core/-/core-7.24.0.tgz"
        );
    }

    #[test]
    fn test_tarball_path_rejects_bad_names() {
        assert!(tarball_path("", "1.0.0").is_err());
        assert!(tarball_path("a/b", "1.0.0").is_err());
        assert!(tarball_path("@scope", "1.0.0").is_err());
        assert!(tarball_path("@scope/a/b", "1.0.0").is_err());
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = NpmRegistryClient::new(NpmRegistryConfig {
            url: "http://localhost:4873/".to_string(),
            ..NpmRegistryConfig::default()
        })
        .unwrap();
        assert_eq!(client.base_url, "http://localhost:4873");
    }
}
