// ABOUTME: Import command - restores a snapshot into a database
// ABOUTME: Reads loose artifacts or the latest archive from the local snapshot store

use crate::config::SyncConfig;
use crate::dialect;
use crate::engine::{RunSummary, SyncEngine};
use crate::storage::LocalStorage;
use anyhow::{Context, Result};

/// Import a snapshot into the configured database
pub async fn import(config: SyncConfig) -> Result<RunSummary> {
    tracing::info!("Starting snapshot import...");
    let storage = LocalStorage::new(&config.storage_dir);

    tracing::info!("Step 1/2: Connecting to target database...");
    let dialect = dialect::connect(&config.connection)
        .await
        .context("Failed to connect to target database")?;

    tracing::info!("Step 2/2: Importing tables...");
    let mut engine = SyncEngine::new(dialect, &storage, config);
    let summary = engine.import().await.inspect_err(super::log_resume_hint)?;

    tracing::info!(
        "✓ Import complete: {} rows, {} schema statements",
        summary.total_rows(),
        summary.schema_statements
    );
    Ok(summary)
}
