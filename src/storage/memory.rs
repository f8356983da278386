// ABOUTME: In-memory storage backend for tests and archive unpacking
// ABOUTME: Records every download so callers can assert which artifacts were opened

use super::Storage;
use crate::error::SyncError;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    downloads: Mutex<Vec<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a storage pre-populated with `(key, bytes)` pairs
    pub fn from_objects<I>(objects: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<u8>)>,
    {
        Self {
            objects: Mutex::new(objects.into_iter().collect()),
            downloads: Mutex::new(Vec::new()),
        }
    }

    /// Keys passed to `download`, in call order
    pub fn downloads(&self) -> Vec<String> {
        self.downloads
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().ok()?.get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().ok()?.remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|o| o.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn poisoned(key: &str) -> SyncError {
    SyncError::Storage {
        key: key.to_string(),
        message: "storage lock poisoned".to_string(),
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn upload(&self, bytes: Vec<u8>, key: &str) -> Result<()> {
        self.objects
            .lock()
            .map_err(|_| poisoned(key))?
            .insert(key.to_string(), bytes);
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        self.downloads
            .lock()
            .map_err(|_| poisoned(key))?
            .push(key.to_string());
        let objects = self.objects.lock().map_err(|_| poisoned(key))?;
        objects.get(key).cloned().ok_or_else(|| {
            SyncError::Storage {
                key: key.to_string(),
                message: "not found".to_string(),
            }
            .into()
        })
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let objects = self.objects.lock().map_err(|_| poisoned(prefix))?;
        Ok(objects
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}
