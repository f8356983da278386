// ABOUTME: Packs snapshot artifacts into a single zip archive and back
// ABOUTME: Archive names embed the database and a sortable UTC timestamp

use crate::storage::ARCHIVE_SUFFIX;
use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use std::io::{Cursor, Read, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// `snapshot_<database>_<YYYYMMDD_HHMMSS>.zip`
pub fn archive_name(database: &str, timestamp: &NaiveDateTime) -> String {
    format!(
        "snapshot_{}_{}{}",
        database,
        timestamp.format("%Y%m%d_%H%M%S"),
        ARCHIVE_SUFFIX
    )
}

/// Zip `(name, bytes)` artifacts in the given order
pub fn pack(artifacts: &[(String, Vec<u8>)]) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (name, bytes) in artifacts {
        writer
            .start_file(name.as_str(), options)
            .with_context(|| format!("Failed to add '{}' to archive", name))?;
        writer
            .write_all(bytes)
            .with_context(|| format!("Failed to write '{}' into archive", name))?;
    }

    let cursor = writer.finish().context("Failed to finalize archive")?;
    Ok(cursor.into_inner())
}

/// Extract every file of an archive as `(name, bytes)` in archive order
pub fn unpack(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).context("Failed to open archive")?;
    let mut artifacts = Vec::with_capacity(archive.len());

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .with_context(|| format!("Failed to read archive entry {}", i))?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        if name.contains("..") || name.starts_with('/') {
            bail!("Archive entry '{}' has an unsafe path", name);
        }
        let mut content = Vec::new();
        file.read_to_end(&mut content)
            .with_context(|| format!("Failed to extract '{}'", name))?;
        artifacts.push((name, content));
    }

    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_archive_name_sorts_by_time() {
        let early = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        let late = NaiveDate::from_ymd_opt(2024, 11, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(
            archive_name("shop", &early),
            "snapshot_shop_20240102_030405.zip"
        );
        assert!(archive_name("shop", &early) < archive_name("shop", &late));
    }

    #[test]
    fn test_pack_unpack() {
        let artifacts = vec![
            ("0_metadata.json".to_string(), b"{}".to_vec()),
            ("1_orders.sql".to_string(), Vec::new()),
            (
                "2_items.sql".to_string(),
                b"INSERT INTO items (id) VALUES (1);\n".to_vec(),
            ),
        ];
        let bytes = pack(&artifacts).unwrap();
        assert_eq!(unpack(&bytes).unwrap(), artifacts);
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        assert!(unpack(b"not a zip").is_err());
    }
}
