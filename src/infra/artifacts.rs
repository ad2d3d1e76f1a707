//! Filesystem-backed artifact storage.
//!
//! Rendered output is stored under `<root>/<sha256(map_id)>/<version>.<ext>`.
//! An artifact is immutable once written: a new content version always lands
//! at a new path, and rewriting an existing path with different bytes is a
//! ledger invariant violation, not a normal outcome.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::fs;
use tracing::info;

use crate::domain::{jobs::ArtifactRef, types::OutputFormat};

#[derive(Debug, Error)]
pub enum ArtifactStoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("artifact `{path}` already exists with different content")]
    Conflict { path: String },
    #[error("artifact not found")]
    NotFound,
}

/// Filesystem artifact store rooted at a single directory.
#[derive(Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Initialise storage rooted at the provided directory, creating it if necessary.
    pub fn new(root: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Store rendered bytes for a render target.
    ///
    /// Idempotent for identical payloads: a repeated put of the same bytes
    /// returns a fresh reference without rewriting the file. Differing bytes
    /// at an existing path fail with [`ArtifactStoreError::Conflict`].
    pub async fn put(
        &self,
        map_id: &str,
        format: OutputFormat,
        version: u64,
        bytes: Bytes,
    ) -> Result<ArtifactRef, ArtifactStoreError> {
        let stored_path = relative_path(map_id, format, version);
        let absolute = self.root.join(&stored_path);
        let checksum = hex::encode(Sha256::digest(&bytes));

        match fs::read(&absolute).await {
            Ok(existing) => {
                let existing_checksum = hex::encode(Sha256::digest(&existing));
                if existing_checksum != checksum {
                    return Err(ArtifactStoreError::Conflict { path: stored_path });
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                if let Some(parent) = absolute.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(&absolute, &bytes).await?;
                info!(
                    target = "infra::artifacts",
                    map_id = %map_id,
                    format = %format,
                    version,
                    size_bytes = bytes.len(),
                    stored_path = %stored_path,
                    "artifact written"
                );
            }
            Err(err) => return Err(err.into()),
        }

        Ok(ArtifactRef {
            map_id: map_id.to_string(),
            format,
            version,
            stored_path,
            checksum,
            size_bytes: bytes.len() as u64,
            created_at: OffsetDateTime::now_utc(),
        })
    }

    /// Read the bytes an [`ArtifactRef`] points at.
    pub async fn get(&self, artifact: &ArtifactRef) -> Result<Bytes, ArtifactStoreError> {
        self.read(&self.root.join(&artifact.stored_path)).await
    }

    /// Read the bytes for a render target directly, bypassing the ledger.
    ///
    /// Used to serve artifacts that outlived the process that rendered them.
    pub async fn get_target(
        &self,
        map_id: &str,
        format: OutputFormat,
        version: u64,
    ) -> Result<Bytes, ArtifactStoreError> {
        let path = self.root.join(relative_path(map_id, format, version));
        self.read(&path).await
    }

    pub async fn exists(&self, map_id: &str, format: OutputFormat, version: u64) -> bool {
        fs::try_exists(self.root.join(relative_path(map_id, format, version)))
            .await
            .unwrap_or(false)
    }

    async fn read(&self, path: &Path) -> Result<Bytes, ArtifactStoreError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(ArtifactStoreError::NotFound),
            Err(err) => Err(err.into()),
        }
    }
}

/// `<sha256(map_id)>/<version>.<ext>`: map identifiers are opaque client
/// strings, so the directory name is their hash rather than the raw value.
fn relative_path(map_id: &str, format: OutputFormat, version: u64) -> String {
    let dir = hex::encode(Sha256::digest(map_id.as_bytes()));
    format!("{dir}/{version}.{}", format.extension())
}
