// ABOUTME: Command implementations behind the CLI subcommands
// ABOUTME: Exports the export and import commands

pub mod export;
pub mod import;

pub use export::export;
pub use import::import;

use crate::error::SyncError;

/// Point the operator at the cursor a failed run can resume from
pub(crate) fn log_resume_hint(err: &anyhow::Error) {
    if let Some(SyncError::TableFailed { table, cursor }) = err.downcast_ref::<SyncError>() {
        tracing::error!(
            "Table '{}' failed. Re-run with --resume (or --resume-from {}) to continue",
            table,
            cursor
        );
    }
}
