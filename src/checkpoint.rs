// ABOUTME: Resume cursor and persistent checkpoint for export/import runs
// ABOUTME: Stores the processing order and last completed position under a hashed identity

use crate::table_name::TableName;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const RUN_CHECKPOINT_VERSION: u32 = 1;

/// Position in a run: the next table to process and, inside it, the next chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunProgress {
    pub table_index: usize,
    pub chunk_index: usize,
}

impl RunProgress {
    pub fn new(table_index: usize, chunk_index: usize) -> Self {
        Self {
            table_index,
            chunk_index,
        }
    }

    pub fn is_start(&self) -> bool {
        self.table_index == 0 && self.chunk_index == 0
    }

    /// Cursor after finishing the current table
    pub fn next_table(&self) -> Self {
        Self::new(self.table_index + 1, 0)
    }

    /// Cursor after finishing the current chunk
    pub fn next_chunk(&self) -> Self {
        Self::new(self.table_index, self.chunk_index + 1)
    }
}

impl fmt::Display for RunProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.table_index, self.chunk_index)
    }
}

impl FromStr for RunProgress {
    type Err = anyhow::Error;

    /// Parse `table:chunk`, or a bare `table` meaning chunk 0
    fn from_str(s: &str) -> Result<Self> {
        let (table, chunk) = s.split_once(':').unwrap_or((s, "0"));
        let table_index = table
            .trim()
            .parse()
            .with_context(|| format!("Invalid table index in resume cursor '{}'", s))?;
        let chunk_index = chunk
            .trim()
            .parse()
            .with_context(|| format!("Invalid chunk index in resume cursor '{}'", s))?;
        Ok(Self::new(table_index, chunk_index))
    }
}

/// Direction of a run, part of the checkpoint identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Export,
    Import,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunCheckpointMetadata {
    pub kind: RunKind,
    pub database_hash: String,
    pub location_hash: String,
}

impl RunCheckpointMetadata {
    pub fn new(kind: RunKind, database: &str, location: &str) -> Self {
        Self {
            kind,
            database_hash: hash_string(database),
            location_hash: hash_string(location),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunCheckpointData {
    version: u32,
    metadata: RunCheckpointMetadata,
    order: Vec<TableName>,
    progress: RunProgress,
}

/// Checkpoint of a single run, saved after every completed table or chunk
#[derive(Debug, Clone)]
pub struct RunCheckpoint {
    data: RunCheckpointData,
}

impl RunCheckpoint {
    pub fn new(metadata: RunCheckpointMetadata, order: &[TableName]) -> Self {
        Self {
            data: RunCheckpointData {
                version: RUN_CHECKPOINT_VERSION,
                metadata,
                order: order.to_vec(),
                progress: RunProgress::default(),
            },
        }
    }

    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read checkpoint at {}", path.display()))?;
        let data: RunCheckpointData = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse checkpoint JSON at {}", path.display()))?;

        if data.version != RUN_CHECKPOINT_VERSION {
            bail!(
                "Checkpoint version mismatch (found {}, expected {}). Run without --resume to start fresh.",
                data.version,
                RUN_CHECKPOINT_VERSION
            );
        }

        Ok(Some(Self { data }))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create checkpoint directory {}", parent.display())
            })?;
        }

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temp checkpoint in {}", parent.display()))?;

        serde_json::to_writer_pretty(tmp.as_file_mut(), &self.data)
            .with_context(|| format!("Failed to serialize checkpoint at {}", path.display()))?;

        tmp.persist(path)
            .with_context(|| format!("Failed to persist checkpoint at {}", path.display()))?;

        Ok(())
    }

    pub fn order(&self) -> &[TableName] {
        &self.data.order
    }

    pub fn progress(&self) -> RunProgress {
        self.data.progress
    }

    pub fn metadata(&self) -> &RunCheckpointMetadata {
        &self.data.metadata
    }

    /// Record a new position; positions never move backwards
    pub fn advance(&mut self, progress: RunProgress) -> bool {
        if progress > self.data.progress {
            self.data.progress = progress;
            true
        } else {
            false
        }
    }

    pub fn validate(&self, metadata: &RunCheckpointMetadata) -> Result<()> {
        if self.data.metadata != *metadata {
            bail!(
                "Checkpoint belongs to a different run (direction, database or snapshot location differ). \
                 Run without --resume to discard the previous state."
            );
        }
        Ok(())
    }
}

pub fn checkpoint_path(metadata: &RunCheckpointMetadata) -> Result<PathBuf> {
    let base = std::env::temp_dir().join("seren-snapshot-checkpoints");
    fs::create_dir_all(&base).with_context(|| {
        format!(
            "Failed to create checkpoint base directory {}",
            base.display()
        )
    })?;

    let mut hasher = Sha256::new();
    hasher.update(metadata.database_hash.as_bytes());
    hasher.update(b"::");
    hasher.update(metadata.location_hash.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    let short = &digest[..16.min(digest.len())];

    let kind = match metadata.kind {
        RunKind::Export => "export",
        RunKind::Import => "import",
    };
    Ok(base.join(format!("{}-{}.json", kind, short)))
}

pub fn remove_checkpoint(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("Failed to remove checkpoint at {}", path.display()))?;
    }
    Ok(())
}

fn hash_string(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn order() -> Vec<TableName> {
        vec![
            TableName::new("customers").unwrap(),
            TableName::new("orders").unwrap(),
        ]
    }

    #[test]
    fn cursor_parse_and_display() {
        assert_eq!("2:5".parse::<RunProgress>().unwrap(), RunProgress::new(2, 5));
        assert_eq!("3".parse::<RunProgress>().unwrap(), RunProgress::new(3, 0));
        assert!("x:1".parse::<RunProgress>().is_err());
        assert!("1:-2".parse::<RunProgress>().is_err());
        assert_eq!(RunProgress::new(4, 1).to_string(), "4:1");
    }

    #[test]
    fn cursor_ordering_is_table_then_chunk() {
        assert!(RunProgress::new(1, 9) < RunProgress::new(2, 0));
        assert!(RunProgress::new(2, 0) < RunProgress::new(2, 1));
        assert_eq!(RunProgress::new(1, 3).next_table(), RunProgress::new(2, 0));
        assert_eq!(RunProgress::new(1, 3).next_chunk(), RunProgress::new(1, 4));
    }

    #[test]
    fn metadata_hash_changes_with_inputs() {
        let a = RunCheckpointMetadata::new(RunKind::Import, "shop", "/snapshots/a");
        let b = RunCheckpointMetadata::new(RunKind::Import, "shop", "/snapshots/b");
        assert_ne!(a.location_hash, b.location_hash);
        assert_ne!(checkpoint_path(&a).unwrap(), checkpoint_path(&b).unwrap());
    }

    #[test]
    fn checkpoint_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cp.json");
        let metadata = RunCheckpointMetadata::new(RunKind::Export, "shop", "/snapshots/a");
        let mut checkpoint = RunCheckpoint::new(metadata.clone(), &order());
        assert!(checkpoint.advance(RunProgress::new(1, 0)));
        assert!(!checkpoint.advance(RunProgress::new(0, 4)));
        checkpoint.save(&path).unwrap();

        let loaded = RunCheckpoint::load(&path).unwrap().unwrap();
        loaded.validate(&metadata).unwrap();
        assert_eq!(loaded.order(), order().as_slice());
        assert_eq!(loaded.progress(), RunProgress::new(1, 0));

        let other = RunCheckpointMetadata::new(RunKind::Import, "shop", "/snapshots/a");
        assert!(loaded.validate(&other).is_err());

        remove_checkpoint(&path).unwrap();
        assert!(RunCheckpoint::load(&path).unwrap().is_none());
    }

    #[test]
    fn checkpoint_path_is_deterministic() {
        let metadata = RunCheckpointMetadata::new(RunKind::Export, "shop", "s3://bucket/x");
        assert_eq!(
            checkpoint_path(&metadata).unwrap(),
            checkpoint_path(&metadata).unwrap()
        );
    }
}
