// ABOUTME: Export command - snapshots a database into the local snapshot store
// ABOUTME: Connects, runs the sync engine and reports the summary

use crate::config::SyncConfig;
use crate::dialect;
use crate::engine::{RunSummary, SyncEngine};
use crate::storage::LocalStorage;
use anyhow::{Context, Result};

/// Export schema and data of the configured database
///
/// Artifacts land under `storage_dir/prefix`. With `archive` set, a
/// `snapshot_<db>_<timestamp>.zip` bundle is written next to them.
pub async fn export(config: SyncConfig) -> Result<RunSummary> {
    tracing::info!("Starting snapshot export...");
    let storage = LocalStorage::new(&config.storage_dir);

    tracing::info!("Step 1/2: Connecting to source database...");
    let dialect = dialect::connect(&config.connection)
        .await
        .context("Failed to connect to source database")?;

    tracing::info!("Step 2/2: Exporting tables...");
    let mut engine = SyncEngine::new(dialect, &storage, config);
    let summary = engine.export().await.inspect_err(super::log_resume_hint)?;

    if let Some(ref key) = summary.archive_key {
        tracing::info!("Archive: {}", storage.root().join(key).display());
    }
    tracing::info!("✓ Export complete");
    Ok(summary)
}
