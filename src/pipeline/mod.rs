// ABOUTME: Per-table export and import steps driven by the sync engine
// ABOUTME: Each call handles exactly one table and reports a TableOutcome

pub mod export;
pub mod import;

pub use export::{describe_table, export_table, ExportOptions};
pub use import::{apply_schema, import_table, truncate_tables, ImportOptions};

use crate::table_name::TableName;
use std::fmt;

/// What happened to one table during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    /// Rows were written (export) or applied (import)
    Copied,
    /// A view whose data was not exported
    SkippedView,
    /// Data excluded by configuration; schema may still be handled
    DataExcluded,
    /// Fully excluded by configuration
    Excluded,
}

impl fmt::Display for TableStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            TableStatus::Copied => "copied",
            TableStatus::SkippedView => "view, data skipped",
            TableStatus::DataExcluded => "data excluded",
            TableStatus::Excluded => "excluded",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOutcome {
    pub table: TableName,
    pub status: TableStatus,
    /// Rows written to the artifact (export) or applied to the database (import)
    pub rows: usize,
    /// Destination row count before the import touched the table
    pub rows_before: Option<u64>,
    pub rows_after: Option<u64>,
}

impl TableOutcome {
    pub fn skipped(table: &TableName, status: TableStatus) -> Self {
        Self {
            table: table.clone(),
            status,
            rows: 0,
            rows_before: None,
            rows_after: None,
        }
    }

    pub fn copied(table: &TableName, rows: usize) -> Self {
        Self {
            table: table.clone(),
            status: TableStatus::Copied,
            rows,
            rows_before: None,
            rows_after: None,
        }
    }
}
