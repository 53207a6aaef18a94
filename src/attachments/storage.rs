//! Durable object storage seam.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::StorageError;

/// Metadata stored alongside an object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub content_type: String,
    pub original_name: String,
    pub owner_id: String,
    pub ingestion_id: String,
}

/// Object storage backend (filesystem, S3-compatible bucket, ...).
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Write `bytes` at `path`, replacing anything already there.
    async fn save(
        &self,
        path: &str,
        bytes: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError>;
}

/// Filesystem-backed object storage rooted at a base directory.
///
/// Writes go to a temp file that is renamed into place, so readers never see
/// a partial object. Metadata is written as a `.meta.json` sidecar.
pub struct LocalObjectStorage {
    base_dir: PathBuf,
}

impl LocalObjectStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve an object path, rejecting anything that could escape the base.
    fn full_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        let safe = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.base_dir.join(relative))
    }

    async fn write_atomic(target: &Path, data: &[u8]) -> Result<(), StorageError> {
        let mut temp_name = target.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, target).await {
            warn!(from = %temp_path.display(), to = %target.display(), error = %e, "rename failed");
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for LocalObjectStorage {
    async fn save(
        &self,
        path: &str,
        bytes: &[u8],
        metadata: &ObjectMetadata,
    ) -> Result<(), StorageError> {
        let full_path = self.full_path(path)?;
        debug!(storage_path = %path, size = bytes.len(), "object_storage: save");

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        Self::write_atomic(&full_path, bytes).await?;

        let meta_json =
            serde_json::to_vec_pretty(metadata).map_err(|e| StorageError::WriteFailed {
                path: path.to_string(),
                reason: format!("metadata serialization: {e}"),
            })?;
        let mut meta_name = full_path.as_os_str().to_owned();
        meta_name.push(".meta.json");
        Self::write_atomic(Path::new(&meta_name), &meta_json).await?;

        Ok(())
    }
}
