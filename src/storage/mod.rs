// ABOUTME: Storage abstraction for snapshot artifacts and archives
// ABOUTME: Keys are `/`-separated relative paths; backends live in submodules

pub mod local;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

pub use local::LocalStorage;
pub use memory::MemoryStorage;

/// Suffix of snapshot archive objects
pub const ARCHIVE_SUFFIX: &str = ".zip";

/// Where snapshot artifacts are written to and read from
///
/// Failures surface as [`crate::error::SyncError::Storage`] wrapped in
/// `anyhow`, naming the key involved.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store `bytes` under `key`, replacing any existing object
    async fn upload(&self, bytes: Vec<u8>, key: &str) -> Result<()>;

    async fn download(&self, key: &str) -> Result<Vec<u8>>;

    /// All keys starting with `prefix`, sorted
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// The lexicographically greatest archive key under `prefix`
    ///
    /// Archive keys embed a sortable timestamp, so this is the newest one.
    async fn latest_archive(&self, prefix: &str) -> Result<Option<String>> {
        let keys = self.list(prefix).await?;
        Ok(keys
            .into_iter()
            .filter(|key| key.ends_with(ARCHIVE_SUFFIX))
            .max())
    }
}

/// Join a snapshot prefix and an artifact name into a storage key
pub fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// The artifact name of `key` relative to `prefix`
pub fn strip_prefix<'a>(prefix: &str, key: &'a str) -> &'a str {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return key;
    }
    key.strip_prefix(prefix)
        .map(|rest| rest.trim_start_matches('/'))
        .unwrap_or(key)
}
