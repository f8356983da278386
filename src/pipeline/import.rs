// ABOUTME: Import side of the table pipeline
// ABOUTME: Applies schema statements and loads table artifacts chunk by chunk

use super::{TableOutcome, TableStatus};
use crate::codec::{decode_table, Format};
use crate::dialect::{insert_statement, Dialect};
use crate::error::SyncError;
use crate::filters::TableFilter;
use crate::manifest::{table_file, SchemaStatement};
use crate::row::RowRecord;
use crate::storage::{join_key, Storage};
use crate::table_name::TableName;
use anyhow::{Context, Result};
use std::collections::HashMap;

pub struct ImportOptions<'a> {
    pub format: Format,
    pub chunk_size: usize,
    pub upsert: bool,
    pub prefix: &'a str,
}

/// Execute schema statements in order, skipping schema-excluded tables
///
/// Returns the number of statements executed.
pub async fn apply_schema(
    dialect: &mut dyn Dialect,
    statements: &[SchemaStatement],
    filter: &TableFilter,
) -> Result<usize> {
    let mut applied = 0;
    for statement in statements {
        if let Some(ref table) = statement.table {
            if !filter.should_apply_schema(table) {
                tracing::debug!("Skipping schema statement for excluded table '{}'", table);
                continue;
            }
        }

        tracing::debug!(
            "Applying schema: {}",
            SyncError::statement_fragment(&statement.sql)
        );
        dialect
            .execute(&statement.sql)
            .await
            .map_err(|e| SyncError::SchemaApply {
                statement: SyncError::statement_fragment(&statement.sql),
                message: format!("{:#}", e),
            })?;
        applied += 1;
    }
    Ok(applied)
}

/// Empty the load set in one pass before any table is imported
///
/// Returns each table's row count from before truncation. Tables outside
/// `tables` are never touched.
pub async fn truncate_tables(
    dialect: &mut dyn Dialect,
    tables: &[TableName],
) -> Result<HashMap<TableName, u64>> {
    let mut counts = HashMap::with_capacity(tables.len());
    if tables.is_empty() {
        return Ok(counts);
    }
    for table in tables {
        counts.insert(table.clone(), dialect.row_count(table).await?);
    }

    tracing::info!("Truncating {} tables before loading", tables.len());
    dialect.truncate_tables(tables).await.with_context(|| {
        format!(
            "Failed to truncate {}",
            tables
                .iter()
                .map(TableName::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        )
    })?;
    Ok(counts)
}

/// Consecutive runs of rows that share one column set
fn column_runs(rows: &[RowRecord]) -> Vec<&[RowRecord]> {
    let mut runs = Vec::new();
    let mut start = 0;
    for i in 1..rows.len() {
        if !rows[i].same_columns(&rows[start]) {
            runs.push(&rows[start..i]);
            start = i;
        }
    }
    if start < rows.len() {
        runs.push(&rows[start..]);
    }
    runs
}

/// Load the artifact of `table` at `index` of the processing order
///
/// Chunks before `start_chunk` are decoded but not applied. `on_chunk` is
/// called with the index of every applied chunk so the caller can persist
/// progress. Truncation is the caller's job, see [`truncate_tables`].
pub async fn import_table(
    dialect: &mut dyn Dialect,
    storage: &dyn Storage,
    options: &ImportOptions<'_>,
    index: usize,
    table: &TableName,
    start_chunk: usize,
    on_chunk: &mut (dyn FnMut(usize) -> Result<()> + Send),
) -> Result<TableOutcome> {
    let artifact = table_file(index, table, options.format);
    let key = join_key(options.prefix, &artifact);
    let bytes = storage.download(&key).await?;
    let rows = decode_table(table, &bytes, options.format, &artifact)?;

    let rows_before = dialect.row_count(table).await?;

    let primary_key = if options.upsert {
        Some(dialect.primary_key_columns(table).await?)
    } else {
        None
    };

    let chunk_size = options.chunk_size.max(1);
    let mut applied = 0;
    for (chunk_index, chunk) in rows.chunks(chunk_size).enumerate().skip(start_chunk) {
        tracing::debug!(
            "  Applying chunk {} of '{}' ({} rows)",
            chunk_index,
            table,
            chunk.len()
        );
        for run in column_runs(chunk) {
            let columns: Vec<String> = run[0].columns().map(str::to_string).collect();
            let sql = insert_statement(&*dialect, table, &columns, run, primary_key.as_deref());
            dialect
                .execute(&sql)
                .await
                .map_err(|e| SyncError::RowApply {
                    table: table.to_string(),
                    chunk: chunk_index,
                    message: format!("{:#}", e),
                })?;
        }
        applied += chunk.len();
        on_chunk(chunk_index)?;
    }

    let rows_after = dialect.row_count(table).await?;
    tracing::info!(
        "  ✓ Imported {} rows into '{}' ({} -> {} rows)",
        applied,
        table,
        rows_before,
        rows_after
    );

    Ok(TableOutcome {
        table: table.clone(),
        status: TableStatus::Copied,
        rows: applied,
        rows_before: Some(rows_before),
        rows_after: Some(rows_after),
    })
}
