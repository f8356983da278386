// ABOUTME: Export side of the table pipeline
// ABOUTME: Reads schema entries and streams table rows into data artifacts

use super::{TableOutcome, TableStatus};
use crate::codec::statement::check_columns;
use crate::codec::{Format, TableWriter};
use crate::dialect::Dialect;
use crate::error::SyncError;
use crate::filters::TableFilter;
use crate::manifest::{table_file, SchemaEntry};
use crate::storage::{join_key, Storage};
use crate::table_name::TableName;
use anyhow::{Context, Result};
use futures::StreamExt;

pub struct ExportOptions<'a> {
    pub format: Format,
    pub include_view_data: bool,
    pub filter: &'a TableFilter,
    pub prefix: &'a str,
}

/// Collect the schema entry for one table or view
///
/// DDL is only read when `with_ddl` is set; the view flag and columns are
/// always needed to plan the data artifacts.
pub async fn describe_table(
    dialect: &mut dyn Dialect,
    table: &TableName,
    with_ddl: bool,
) -> Result<SchemaEntry> {
    let is_view = dialect.is_view(table).await?;
    let columns = dialect.get_columns(table).await?;
    let (ddl, deferred) = if with_ddl {
        (
            dialect.get_schema_ddl(table).await?,
            dialect.get_deferred_ddl(table).await?,
        )
    } else {
        (String::new(), Vec::new())
    };
    Ok(SchemaEntry {
        table: table.clone(),
        is_view,
        ddl,
        columns,
        deferred,
    })
}

/// Export the rows of `table` as the artifact at `index` of the processing order
///
/// The artifact is built in memory and uploaded in one call, so a table is
/// either fully written or absent.
pub async fn export_table(
    dialect: &mut dyn Dialect,
    storage: &dyn Storage,
    options: &ExportOptions<'_>,
    index: usize,
    entry: &SchemaEntry,
) -> Result<TableOutcome> {
    let table = &entry.table;

    if entry.is_view && !options.include_view_data {
        tracing::info!("  Skipping data of view '{}'", table);
        return Ok(TableOutcome::skipped(table, TableStatus::SkippedView));
    }
    if !options.filter.should_copy_data(table) {
        tracing::info!("  Skipping data of '{}' (excluded)", table);
        return Ok(TableOutcome::skipped(table, TableStatus::DataExcluded));
    }

    let statement_format = options.format == Format::Sql;
    if statement_format {
        check_columns(entry.columns.iter().map(String::as_str))
            .map_err(|e| unwritable_columns(table, e))?;
    }

    let condition = options.filter.condition(table);
    if let Some(predicate) = condition {
        tracing::info!("  Exporting '{}' with filter: {}", table, predicate);
    }

    let mut writer = TableWriter::new(table.clone(), options.format);
    if !entry.columns.is_empty() {
        writer = writer.with_columns(entry.columns.clone());
    }
    {
        let mut rows = dialect
            .query_rows(table, &entry.columns, condition)
            .await
            .with_context(|| format!("Failed to query rows of '{}'", table))?;
        let mut checked = !entry.columns.is_empty();
        while let Some(row) = rows.next().await {
            let row = row?;
            // Without a described column list the first row decides
            if statement_format && !checked {
                check_columns(row.columns()).map_err(|e| unwritable_columns(table, e))?;
                checked = true;
            }
            writer.push(&row);
        }
    }

    let count = writer.rows();
    let key = join_key(options.prefix, &table_file(index, table, options.format));
    storage
        .upload(writer.finish(), &key)
        .await
        .with_context(|| format!("Failed to write artifact for '{}'", table))?;

    tracing::info!("  ✓ Exported {} rows from '{}' to {}", count, table, key);
    Ok(TableOutcome::copied(table, count))
}

fn unwritable_columns(table: &TableName, err: anyhow::Error) -> anyhow::Error {
    SyncError::SchemaRead {
        table: table.to_string(),
        message: format!("{:#}; export this table with the json format instead", err),
    }
    .into()
}
