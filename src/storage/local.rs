// ABOUTME: Local filesystem storage backend rooted at a base directory
// ABOUTME: Rejects keys escaping the root; uploads are written atomically

use super::Storage;
use crate::error::SyncError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Stores each key as a file below `root`
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        for component in relative.components() {
            if !matches!(component, Component::Normal(_)) {
                return Err(storage_error(key, "key must be a plain relative path").into());
            }
        }
        Ok(self.root.join(relative))
    }
}

fn storage_error(key: &str, message: impl Into<String>) -> SyncError {
    SyncError::Storage {
        key: key.to_string(),
        message: message.into(),
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload(&self, bytes: Vec<u8>, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        let parent = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&parent)
            .await
            .map_err(|e| storage_error(key, format!("failed to create directory: {}", e)))?;

        // Write to a sibling temp file and rename so readers never see a partial artifact
        let target = path.clone();
        let owned_key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut tmp = tempfile::NamedTempFile::new_in(&parent)
                .map_err(|e| storage_error(&owned_key, format!("failed to create temp file: {}", e)))?;
            tmp.write_all(&bytes)
                .map_err(|e| storage_error(&owned_key, format!("failed to write: {}", e)))?;
            tmp.persist(&target)
                .map_err(|e| storage_error(&owned_key, format!("failed to persist: {}", e)))?;
            Ok(())
        })
        .await
        .context("Upload task panicked")??;

        tracing::debug!("Wrote {}", path.display());
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(key)?;
        fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                storage_error(key, "not found").into()
            } else {
                storage_error(key, format!("failed to read: {}", e)).into()
            }
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        if !fs::try_exists(&self.root).await.unwrap_or(false) {
            return Ok(keys);
        }

        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await.map_err(|e| {
                storage_error(prefix, format!("failed to list {}: {}", dir.display(), e))
            })?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| storage_error(prefix, format!("failed to read entry: {}", e)))?
            {
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| storage_error(prefix, format!("failed to stat entry: {}", e)))?;
                let path = entry.path();
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    if let Ok(relative) = path.strip_prefix(&self.root) {
                        let key = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy())
                            .collect::<Vec<_>>()
                            .join("/");
                        if key.starts_with(prefix.trim_start_matches('/')) {
                            keys.push(key);
                        }
                    }
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_upload_download_list() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());

        storage
            .upload(b"[]\n".to_vec(), "snap/1_orders.json")
            .await
            .unwrap();
        storage
            .upload(b"{}".to_vec(), "snap/0_metadata.json")
            .await
            .unwrap();
        storage.upload(b"x".to_vec(), "other/1_a.sql").await.unwrap();

        assert_eq!(
            storage.download("snap/1_orders.json").await.unwrap(),
            b"[]\n"
        );
        assert_eq!(
            storage.list("snap").await.unwrap(),
            vec!["snap/0_metadata.json", "snap/1_orders.json"]
        );
        assert_eq!(storage.list("").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_upload_replaces_existing() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        storage.upload(b"one".to_vec(), "a.sql").await.unwrap();
        storage.upload(b"two".to_vec(), "a.sql").await.unwrap();
        assert_eq!(storage.download("a.sql").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_missing_key_is_storage_error() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let err = storage.download("nope.json").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::Storage { key, .. }) if key == "nope.json"
        ));
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("root"));
        assert!(storage.upload(b"x".to_vec(), "../escape.sql").await.is_err());
        assert!(storage.download("a/../../etc/passwd").await.is_err());
    }

    #[tokio::test]
    async fn test_list_missing_root_is_empty() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path().join("absent"));
        assert!(storage.list("").await.unwrap().is_empty());
    }
}
