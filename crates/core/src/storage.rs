//! On-disk artifact storage.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid artifact name: {0}")]
    InvalidName(String),

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A file written by [`ArtifactStore::save`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the file contents.
    pub sha256: String,
    pub size_bytes: u64,
}

/// Stores downloaded artifacts under a root directory, one subdirectory per
/// request and package row.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn check_component(value: &str) -> Result<&str, StorageError> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains('/')
        || value.contains('\\')
    {
        return Err(StorageError::InvalidName(value.to_string()));
    }
    Ok(value)
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `data` to `<root>/<request_id>/<package_id>/<file_name>`,
    /// replacing any previous file. The write goes through a temporary file
    /// and a rename.
    pub async fn save(
        &self,
        request_id: &str,
        package_id: &str,
        file_name: &str,
        data: &[u8],
    ) -> Result<StoredArtifact, StorageError> {
        let dir = self
            .root
            .join(check_component(request_id)?)
            .join(check_component(package_id)?);
        let path = dir.join(check_component(file_name)?);
        tokio::fs::create_dir_all(&dir).await?;

        let tmp = dir.join(format!(".{}.part", file_name));
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;

        let artifact = StoredArtifact {
            path,
            sha256: sha256_hex(data),
            size_bytes: data.len() as u64,
        };
        debug!(
            path = %artifact.path.display(),
            size = artifact.size_bytes,
            "Stored artifact"
        );
        Ok(artifact)
    }

    /// Read an artifact back, verifying its checksum.
    pub async fn read(&self, artifact: &StoredArtifact) -> Result<Vec<u8>, StorageError> {
        let data = tokio::fs::read(&artifact.path).await?;
        let actual = sha256_hex(&data);
        if actual != artifact.sha256 {
            return Err(StorageError::ChecksumMismatch {
                path: artifact.path.clone(),
                expected: artifact.sha256.clone(),
                actual,
            });
        }
        Ok(data)
    }

    /// Check that the file on disk still matches the recorded checksum.
    pub async fn verify(&self, artifact: &StoredArtifact) -> Result<(), StorageError> {
        self.read(artifact).await.map(|_| ())
    }
}
