// ABOUTME: Sync engine sequencing the table pipeline over a dependency order
// ABOUTME: Tracks run state, persists resume checkpoints and aggregates outcomes

use crate::archive;
use crate::checkpoint::{
    checkpoint_path, remove_checkpoint, RunCheckpoint, RunCheckpointMetadata, RunKind,
    RunProgress,
};
use crate::config::SyncConfig;
use crate::dialect::Dialect;
use crate::error::SyncError;
use crate::manifest::{
    decode_schema, encode_schema, order_from_listing, schema_file, table_file, ExportManifest,
    SchemaEntry, MANIFEST_FILE,
};
use crate::pipeline::{
    apply_schema, describe_table, export_table, import_table, truncate_tables, ExportOptions,
    ImportOptions, TableOutcome, TableStatus,
};
use crate::resolver::{resolve_order, DependencyGraph, DroppedEdge};
use crate::storage::{join_key, strip_prefix, MemoryStorage, Storage};
use crate::table_name::TableName;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Lifecycle of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Initializing,
    ResolvingOrder,
    ExportingTable(usize),
    ImportingTable(usize),
    Completed,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => f.write_str("idle"),
            RunState::Initializing => f.write_str("initializing"),
            RunState::ResolvingOrder => f.write_str("resolving order"),
            RunState::ExportingTable(i) => write!(f, "exporting table {}", i),
            RunState::ImportingTable(i) => write!(f, "importing table {}", i),
            RunState::Completed => f.write_str("completed"),
            RunState::Failed => f.write_str("failed"),
        }
    }
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub kind: RunKind,
    pub database: String,
    pub order: Vec<TableName>,
    pub dropped_edges: Vec<DroppedEdge>,
    /// Cursor the run started from
    pub started_at: RunProgress,
    /// Outcomes of the tables processed by this run, in order
    pub tables: Vec<TableOutcome>,
    pub schema_statements: usize,
    pub archive_key: Option<String>,
}

impl RunSummary {
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|t| t.rows).sum()
    }

    pub fn outcome(&self, table: &TableName) -> Option<&TableOutcome> {
        self.tables.iter().find(|t| &t.table == table)
    }

    fn log(&self) {
        let verb = match self.kind {
            RunKind::Export => "Exported",
            RunKind::Import => "Imported",
        };
        for outcome in &self.tables {
            match (outcome.status, outcome.rows_before, outcome.rows_after) {
                (TableStatus::Copied, Some(before), Some(after)) => tracing::info!(
                    "  {}: {} rows applied ({} -> {})",
                    outcome.table,
                    outcome.rows,
                    before,
                    after
                ),
                (TableStatus::Copied, _, _) => {
                    tracing::info!("  {}: {} rows", outcome.table, outcome.rows)
                }
                (status, _, _) => tracing::info!("  {}: {}", outcome.table, status),
            }
        }
        tracing::info!(
            "✓ {} {} rows across {} tables of '{}'",
            verb,
            self.total_rows(),
            self.tables.len(),
            self.database
        );
    }
}

/// Drives export and import runs for one database and one snapshot location
///
/// The engine owns the dialect for the whole run; storage is borrowed so
/// callers can inspect it afterwards.
pub struct SyncEngine<'a> {
    dialect: Box<dyn Dialect>,
    storage: &'a dyn Storage,
    config: SyncConfig,
    checkpoint_path: Option<PathBuf>,
    state: RunState,
}

impl<'a> SyncEngine<'a> {
    pub fn new(dialect: Box<dyn Dialect>, storage: &'a dyn Storage, config: SyncConfig) -> Self {
        Self {
            dialect,
            storage,
            config,
            checkpoint_path: None,
            state: RunState::Idle,
        }
    }

    /// Keep the checkpoint at `path` instead of the derived temp-dir location
    pub fn with_checkpoint_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn transition(&mut self, next: RunState) {
        match next {
            RunState::ExportingTable(_) | RunState::ImportingTable(_) => {
                tracing::debug!("Run state: {} -> {}", self.state, next)
            }
            _ => tracing::info!("Run state: {} -> {}", self.state, next),
        }
        self.state = next;
    }

    fn finish(&mut self, result: Result<RunSummary>) -> Result<RunSummary> {
        match result {
            Ok(summary) => {
                self.transition(RunState::Completed);
                summary.log();
                Ok(summary)
            }
            Err(err) => {
                self.transition(RunState::Failed);
                tracing::error!("Run failed: {:#}", err);
                Err(err)
            }
        }
    }

    /// Write a snapshot of the connected database to storage
    pub async fn export(&mut self) -> Result<RunSummary> {
        let result = self.run_export().await;
        self.finish(result)
    }

    /// Restore a snapshot from storage into the connected database
    pub async fn import(&mut self) -> Result<RunSummary> {
        let result = self.run_import().await;
        self.finish(result)
    }

    fn initialize(&mut self) -> Result<String> {
        self.transition(RunState::Initializing);
        let database = self.dialect.database().to_string();
        if database.trim().is_empty() {
            return Err(SyncError::Configuration("Database name cannot be empty".into()).into());
        }
        if self.config.chunk_size == 0 {
            return Err(SyncError::Configuration("chunk_size must be at least 1".into()).into());
        }
        tracing::info!(
            "Initializing {} snapshot run for '{}' at {}",
            self.dialect.driver(),
            database,
            self.config.location()
        );
        Ok(database)
    }

    fn checkpoint_file(&self, metadata: &RunCheckpointMetadata) -> Result<PathBuf> {
        match &self.checkpoint_path {
            Some(path) => Ok(path.clone()),
            None => checkpoint_path(metadata),
        }
    }

    /// Load the saved checkpoint when resuming
    fn load_checkpoint(
        &self,
        path: &Path,
        metadata: &RunCheckpointMetadata,
    ) -> Result<Option<RunCheckpoint>> {
        if !self.config.resume {
            return Ok(None);
        }
        match RunCheckpoint::load(path)? {
            Some(checkpoint) => {
                checkpoint
                    .validate(metadata)
                    .map_err(|e| SyncError::ResumeState {
                        cursor: checkpoint.progress(),
                        message: format!("{:#}", e),
                    })?;
                tracing::info!(
                    "Found checkpoint at {} (cursor {})",
                    path.display(),
                    checkpoint.progress()
                );
                Ok(Some(checkpoint))
            }
            None => Ok(None),
        }
    }

    /// List, select and order the tables to export
    async fn resolve_export_order(&mut self) -> Result<(Vec<TableName>, Vec<DroppedEdge>)> {
        let available = self.dialect.list_tables().await?;
        let filter = &self.config.filter;

        if let Some(include) = filter.include_tables() {
            let missing: Vec<String> = include
                .iter()
                .filter(|t| !available.contains(t))
                .map(ToString::to_string)
                .collect();
            if !missing.is_empty() {
                return Err(SyncError::Configuration(format!(
                    "Selected tables do not exist in '{}': {}",
                    self.dialect.database(),
                    missing.join(", ")
                ))
                .into());
            }
        }
        for table in filter.unknown_tables(&available) {
            tracing::warn!("Table '{}' named in configuration does not exist", table);
        }

        let tables = filter.select(&available);
        let mut graph = DependencyGraph::new();
        for table in &tables {
            let mut targets = self.dialect.get_foreign_key_targets(table).await?;
            targets.retain(|t| tables.contains(t));
            if !targets.is_empty() {
                graph.insert(table.clone(), targets);
            }
        }

        let resolved = resolve_order(&tables, &graph);
        if !resolved.dropped_edges.is_empty() {
            tracing::warn!(
                "Dropped {} foreign key edge(s) to break cycles",
                resolved.dropped_edges.len()
            );
        }
        Ok((resolved.order, resolved.dropped_edges))
    }

    async fn run_export(&mut self) -> Result<RunSummary> {
        let database = self.initialize()?;
        let storage = self.storage;
        let prefix = self.config.prefix.clone();
        let format = self.config.format;

        let metadata =
            RunCheckpointMetadata::new(RunKind::Export, &database, &self.config.location());
        let path = self.checkpoint_file(&metadata)?;
        let saved = self.load_checkpoint(&path, &metadata)?;

        self.transition(RunState::ResolvingOrder);
        let manifest_key = join_key(&prefix, MANIFEST_FILE);
        let existing = if self.config.resume {
            read_manifest(storage, &manifest_key).await?
        } else {
            None
        };

        let mut described: HashMap<TableName, SchemaEntry> = HashMap::new();
        let (manifest, dropped_edges) = match existing {
            Some(manifest) => {
                tracing::info!(
                    "Resuming with the order of the existing manifest ({} tables)",
                    manifest.tables.len()
                );
                (manifest, Vec::new())
            }
            None => {
                let (order, dropped) = self.resolve_export_order().await?;
                tracing::info!("Processing order: {}", join_names(&order));

                let mut entries = Vec::with_capacity(order.len());
                for table in &order {
                    let with_ddl = self.config.include_schema
                        && self.config.filter.should_apply_schema(table);
                    entries.push(describe_table(self.dialect.as_mut(), table, with_ddl).await?);
                }

                let mut manifest = ExportManifest::new(
                    &database,
                    self.dialect.driver().name(),
                    format,
                    order.clone(),
                    self.config.include_schema,
                    self.config.include_view_data,
                    self.config.chunk_size,
                );
                manifest.views = entries
                    .iter()
                    .filter(|e| e.is_view)
                    .map(|e| e.table.clone())
                    .collect();
                manifest.data_excluded = order
                    .iter()
                    .filter(|t| !self.config.filter.should_copy_data(t))
                    .cloned()
                    .collect();

                storage.upload(manifest.to_bytes()?, &manifest_key).await?;
                if self.config.include_schema {
                    let schema: Vec<SchemaEntry> = entries
                        .iter()
                        .filter(|e| self.config.filter.should_apply_schema(&e.table))
                        .cloned()
                        .collect();
                    let key = join_key(&prefix, &schema_file(format));
                    storage.upload(encode_schema(&schema, format)?, &key).await?;
                    tracing::info!("✓ Wrote schema for {} tables to {}", schema.len(), key);
                }

                described = entries.into_iter().map(|e| (e.table.clone(), e)).collect();
                (manifest, dropped)
            }
        };
        let order = manifest.tables.clone();

        if let Some(ref saved) = saved {
            if saved.order() != order.as_slice() {
                return Err(SyncError::ResumeState {
                    cursor: saved.progress(),
                    message: "checkpoint order differs from the snapshot manifest".into(),
                }
                .into());
            }
        }

        let mut start = match (self.config.resume_from, saved.as_ref()) {
            (Some(cursor), _) => cursor,
            (None, Some(saved)) => saved.progress(),
            (None, None) if self.config.resume => {
                first_missing_artifact(storage, &prefix, &manifest).await?
            }
            (None, None) => RunProgress::default(),
        };
        validate_cursor(start, order.len())?;
        if start.chunk_index != 0 {
            tracing::warn!(
                "Export resumes per table; ignoring chunk index of cursor {}",
                start
            );
            start = RunProgress::new(start.table_index, 0);
        }
        if !start.is_start() {
            tracing::info!("Resuming export at table {} of {}", start.table_index, order.len());
        }

        let mut checkpoint = RunCheckpoint::new(metadata, &order);
        checkpoint.advance(start);
        checkpoint.save(&path)?;

        let mut outcomes = Vec::new();
        for index in start.table_index..order.len() {
            let table = &order[index];
            self.transition(RunState::ExportingTable(index));
            tracing::info!("Exporting table {}/{}: '{}'", index + 1, order.len(), table);

            let entry = match described.remove(table) {
                Some(entry) => entry,
                None => describe_table(self.dialect.as_mut(), table, false)
                    .await
                    .map_err(|err| table_failed(err, table, checkpoint.progress()))?,
            };
            let options = ExportOptions {
                format: manifest.format,
                include_view_data: manifest.include_view_data,
                filter: &self.config.filter,
                prefix: &prefix,
            };
            let outcome = export_table(self.dialect.as_mut(), storage, &options, index, &entry)
                .await
                .map_err(|err| table_failed(err, table, checkpoint.progress()))?;
            outcomes.push(outcome);

            checkpoint.advance(RunProgress::new(index, 0).next_table());
            checkpoint.save(&path)?;
        }

        let archive_key = if self.config.archive {
            Some(write_archive(storage, &prefix, &manifest).await?)
        } else {
            None
        };

        remove_checkpoint(&path)?;
        Ok(RunSummary {
            kind: RunKind::Export,
            database,
            order,
            dropped_edges,
            started_at: start,
            tables: outcomes,
            schema_statements: 0,
            archive_key,
        })
    }

    async fn run_import(&mut self) -> Result<RunSummary> {
        let database = self.initialize()?;
        let storage = self.storage;

        let archive_key = if self.config.archive {
            let key = match self.config.archive_key.clone() {
                Some(key) => key,
                None => storage
                    .latest_archive(&self.config.prefix)
                    .await?
                    .ok_or_else(|| SyncError::Storage {
                        key: self.config.prefix.clone(),
                        message: "no snapshot archive found".into(),
                    })?,
            };
            tracing::info!("Restoring from archive {}", key);
            Some(key)
        } else {
            None
        };
        let unpacked = match &archive_key {
            Some(key) => {
                let bytes = storage.download(key).await?;
                Some(MemoryStorage::from_objects(archive::unpack(&bytes)?))
            }
            None => None,
        };
        let (source, prefix): (&dyn Storage, String) = match &unpacked {
            Some(memory) => (memory as &dyn Storage, String::new()),
            None => (storage, self.config.prefix.clone()),
        };

        let mut location = self.config.location();
        if let Some(ref key) = archive_key {
            location.push('#');
            location.push_str(key);
        }
        let metadata = RunCheckpointMetadata::new(RunKind::Import, &database, &location);
        let path = self.checkpoint_file(&metadata)?;
        let saved = self.load_checkpoint(&path, &metadata)?;

        self.transition(RunState::ResolvingOrder);
        let manifest = self.read_import_manifest(source, &prefix, &database).await?;
        let order = manifest.tables.clone();
        let format = manifest.format;
        tracing::info!("Processing order: {}", join_names(&order));

        if let Some(ref saved) = saved {
            if saved.order() != order.as_slice() {
                return Err(SyncError::ResumeState {
                    cursor: saved.progress(),
                    message: "checkpoint order differs from the snapshot manifest".into(),
                }
                .into());
            }
        }
        let start = match (self.config.resume_from, saved.as_ref()) {
            (Some(cursor), _) => cursor,
            (None, Some(saved)) => saved.progress(),
            (None, None) => {
                if self.config.resume {
                    tracing::warn!("No checkpoint found; importing from the beginning");
                }
                RunProgress::default()
            }
        };
        validate_cursor(start, order.len())?;

        self.dialect.begin_import().await?;

        let mut schema_statements = 0;
        if self.config.include_schema && manifest.include_schema {
            if start.is_start() {
                let key = join_key(&prefix, &schema_file(format));
                let bytes = source.download(&key).await?;
                let statements = decode_schema(&bytes, format).map_err(|e| {
                    SyncError::RowCodec {
                        artifact: schema_file(format),
                        location: "schema".into(),
                        message: format!("{:#}", e),
                    }
                })?;
                schema_statements =
                    apply_schema(self.dialect.as_mut(), &statements, &self.config.filter).await?;
                tracing::info!("✓ Applied {} schema statements", schema_statements);
            } else {
                tracing::info!("Skipping schema: resuming at {}", start);
            }
        }

        let mut checkpoint = RunCheckpoint::new(metadata, &order);
        checkpoint.advance(start);
        checkpoint.save(&path)?;

        let options = ImportOptions {
            format,
            chunk_size: manifest.chunk_size,
            upsert: self.config.upsert,
            prefix: &prefix,
        };

        let rows_before = if self.config.truncate {
            let load_set = self.truncation_set(&manifest, start);
            truncate_tables(self.dialect.as_mut(), &load_set).await?
        } else {
            HashMap::new()
        };

        let mut outcomes = Vec::new();
        for index in start.table_index..order.len() {
            let table = &order[index];
            self.transition(RunState::ImportingTable(index));

            let outcome = match self.import_skip(&manifest, table) {
                Some(status) => {
                    tracing::info!(
                        "Skipping table {}/{}: '{}' ({})",
                        index + 1,
                        order.len(),
                        table,
                        status
                    );
                    TableOutcome::skipped(table, status)
                }
                None => {
                    tracing::info!("Importing table {}/{}: '{}'", index + 1, order.len(), table);
                    let start_chunk = if index == start.table_index {
                        start.chunk_index
                    } else {
                        0
                    };
                    let mut on_chunk = |chunk: usize| -> Result<()> {
                        checkpoint.advance(RunProgress::new(index, chunk).next_chunk());
                        checkpoint.save(&path)
                    };
                    let result = import_table(
                        self.dialect.as_mut(),
                        source,
                        &options,
                        index,
                        table,
                        start_chunk,
                        &mut on_chunk,
                    )
                    .await;
                    let mut outcome =
                        result.map_err(|err| table_failed(err, table, checkpoint.progress()))?;
                    if let Some(count) = rows_before.get(table) {
                        outcome.rows_before = Some(*count);
                    }
                    outcome
                }
            };
            outcomes.push(outcome);

            checkpoint.advance(RunProgress::new(index, 0).next_table());
            checkpoint.save(&path)?;
        }

        remove_checkpoint(&path)?;
        Ok(RunSummary {
            kind: RunKind::Import,
            database,
            order,
            dropped_edges: Vec::new(),
            started_at: start,
            tables: outcomes,
            schema_statements,
            archive_key,
        })
    }

    /// Why `table` gets no rows in this import, if it gets none
    fn import_skip(&self, manifest: &ExportManifest, table: &TableName) -> Option<TableStatus> {
        let filter = &self.config.filter;
        if !filter.should_process(table) {
            Some(TableStatus::Excluded)
        } else if manifest.is_view(table) && !manifest.has_data_artifact(table) {
            Some(TableStatus::SkippedView)
        } else if !manifest.has_data_artifact(table) || !filter.should_copy_data(table) {
            Some(TableStatus::DataExcluded)
        } else {
            None
        }
    }

    /// Tables this import reloads from their first row
    ///
    /// A table the cursor enters mid-way keeps the rows already applied.
    fn truncation_set(&self, manifest: &ExportManifest, start: RunProgress) -> Vec<TableName> {
        manifest
            .tables
            .iter()
            .enumerate()
            .skip(start.table_index)
            .filter(|(index, table)| {
                if *index == start.table_index && start.chunk_index > 0 {
                    tracing::warn!(
                        "Not truncating '{}': resuming at chunk {}",
                        table,
                        start.chunk_index
                    );
                    return false;
                }
                self.import_skip(manifest, table).is_none()
            })
            .map(|(_, table)| table.clone())
            .collect()
    }

    /// The snapshot manifest, or one recovered from the artifact listing
    async fn read_import_manifest(
        &self,
        source: &dyn Storage,
        prefix: &str,
        database: &str,
    ) -> Result<ExportManifest> {
        let manifest_key = join_key(prefix, MANIFEST_FILE);
        if let Some(manifest) = read_manifest(source, &manifest_key).await? {
            if manifest.format != self.config.format {
                tracing::debug!(
                    "Snapshot format is {}; ignoring configured {}",
                    manifest.format,
                    self.config.format
                );
            }
            return Ok(manifest);
        }

        tracing::warn!(
            "No manifest at {}; recovering table order from artifact names",
            manifest_key
        );
        let names = artifact_names(source, prefix).await?;
        let format = self.config.format;
        let order = order_from_listing(&names, format)?;
        let has_schema = names.contains(&schema_file(format));
        if order.is_empty() && !has_schema {
            return Err(SyncError::Storage {
                key: prefix.to_string(),
                message: format!("no {} snapshot artifacts found", format),
            }
            .into());
        }

        Ok(ExportManifest::new(
            database,
            self.dialect.driver().name(),
            format,
            order,
            has_schema,
            true,
            self.config.chunk_size,
        ))
    }
}

/// Wrap a table failure with the cursor a later run can resume from
fn table_failed(err: anyhow::Error, table: &TableName, cursor: RunProgress) -> anyhow::Error {
    err.context(SyncError::TableFailed {
        table: table.to_string(),
        cursor,
    })
}

fn validate_cursor(cursor: RunProgress, tables: usize) -> Result<()> {
    if cursor.table_index > tables || (cursor.table_index == tables && cursor.chunk_index > 0) {
        return Err(SyncError::ResumeState {
            cursor,
            message: format!("snapshot has only {} tables", tables),
        }
        .into());
    }
    Ok(())
}

fn join_names(tables: &[TableName]) -> String {
    tables
        .iter()
        .map(TableName::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

async fn read_manifest(storage: &dyn Storage, key: &str) -> Result<Option<ExportManifest>> {
    let keys = storage.list(key).await?;
    if !keys.iter().any(|k| k == key) {
        return Ok(None);
    }
    let bytes = storage.download(key).await?;
    let manifest = ExportManifest::from_bytes(&bytes)
        .with_context(|| format!("Invalid snapshot manifest at {}", key))?;
    Ok(Some(manifest))
}

/// Artifact names directly under `prefix`
async fn artifact_names(storage: &dyn Storage, prefix: &str) -> Result<Vec<String>> {
    let keys = storage.list(prefix).await?;
    Ok(keys
        .iter()
        .filter_map(|key| {
            let name = strip_prefix(prefix, key);
            (join_key(prefix, name) == *key && !name.contains('/')).then(|| name.to_string())
        })
        .collect())
}

/// Position of the first table whose data artifact is not yet written
async fn first_missing_artifact(
    storage: &dyn Storage,
    prefix: &str,
    manifest: &ExportManifest,
) -> Result<RunProgress> {
    let names = artifact_names(storage, prefix).await?;
    let index = manifest
        .tables
        .iter()
        .enumerate()
        .position(|(i, table)| {
            manifest.has_data_artifact(table)
                && !names.contains(&table_file(i, table, manifest.format))
        })
        .unwrap_or(manifest.tables.len());
    if index > 0 {
        tracing::info!("Found artifacts for the first {} tables", index);
    }
    Ok(RunProgress::new(index, 0))
}

/// Bundle the snapshot artifacts into one archive object
async fn write_archive(
    storage: &dyn Storage,
    prefix: &str,
    manifest: &ExportManifest,
) -> Result<String> {
    let mut names = vec![MANIFEST_FILE.to_string()];
    if manifest.include_schema {
        names.push(schema_file(manifest.format));
    }
    for (index, table) in manifest.tables.iter().enumerate() {
        if manifest.has_data_artifact(table) {
            names.push(table_file(index, table, manifest.format));
        }
    }

    let mut artifacts = Vec::with_capacity(names.len());
    for name in names {
        let bytes = storage.download(&join_key(prefix, &name)).await?;
        artifacts.push((name, bytes));
    }

    let key = join_key(
        prefix,
        &archive::archive_name(&manifest.database, &manifest.timestamp),
    );
    storage.upload(archive::pack(&artifacts)?, &key).await?;
    tracing::info!("✓ Wrote archive {} ({} artifacts)", key, artifacts.len());
    Ok(key)
}
