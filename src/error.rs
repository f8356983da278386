// ABOUTME: Typed error taxonomy for snapshot export and import runs
// ABOUTME: Wrapped in anyhow for propagation, recoverable via downcast_ref

use crate::checkpoint::RunProgress;
use thiserror::Error;

/// Errors surfaced to the operator by the sync engine.
///
/// Every variant carries enough context (table, file, statement fragment) to
/// resume manually. Functions in this crate return `anyhow::Result`, so callers
/// that need to branch on the kind use `err.downcast_ref::<SyncError>()`.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Unsupported database driver '{0}' (expected mysql, mariadb, postgres or postgresql)")]
    UnsupportedDialect(String),

    #[error("Failed to read schema for '{table}': {message}")]
    SchemaRead { table: String, message: String },

    #[error("Failed to apply schema statement '{statement}': {message}")]
    SchemaApply { statement: String, message: String },

    #[error("Malformed content in '{artifact}' at {location}: {message}")]
    RowCodec {
        artifact: String,
        location: String,
        message: String,
    },

    #[error("Failed to apply rows to '{table}' (chunk {chunk}): {message}")]
    RowApply {
        table: String,
        chunk: usize,
        message: String,
    },

    #[error("Invalid resume cursor {cursor}: {message}")]
    ResumeState { cursor: RunProgress, message: String },

    #[error("Storage error for '{key}': {message}")]
    Storage { key: String, message: String },

    #[error("Table '{table}' failed; resume from {cursor}")]
    TableFailed { table: String, cursor: RunProgress },
}

impl SyncError {
    /// Shorten a statement for inclusion in an error message.
    pub fn statement_fragment(statement: &str) -> String {
        const MAX: usize = 120;
        let flat: String = statement.split_whitespace().collect::<Vec<_>>().join(" ");
        if flat.chars().count() <= MAX {
            flat
        } else {
            let head: String = flat.chars().take(MAX).collect();
            format!("{}...", head)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statement_fragment_collapses_whitespace() {
        let fragment = SyncError::statement_fragment("CREATE TABLE t (\n    id INT\n)");
        assert_eq!(fragment, "CREATE TABLE t ( id INT )");
    }

    #[test]
    fn statement_fragment_truncates_long_statements() {
        let long = format!("INSERT INTO t VALUES ({})", "1, ".repeat(100));
        let fragment = SyncError::statement_fragment(&long);
        assert!(fragment.ends_with("..."));
        assert_eq!(fragment.chars().count(), 123);
    }

    #[test]
    fn errors_survive_anyhow_round_trip() {
        let err: anyhow::Error = SyncError::UnsupportedDialect("oracle".into()).into();
        let err = err.context("Failed to connect to source");
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::UnsupportedDialect(driver)) if driver == "oracle"
        ));
    }
}
