// ABOUTME: Row codec entry points for the structured and statement formats
// ABOUTME: Encodes rows into table artifacts and decodes artifacts back into rows

pub mod base64;
pub mod statement;
pub mod structured;

use crate::error::SyncError;
use crate::row::RowRecord;
use crate::table_name::TableName;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Wire format of table artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// JSON array of row objects
    Json,
    /// One `INSERT` statement per row
    Sql,
}

impl Format {
    pub fn extension(self) -> &'static str {
        match self {
            Format::Json => "json",
            Format::Sql => "sql",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "json" => Some(Format::Json),
            "sql" => Some(Format::Sql),
            _ => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for Format {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Format::from_extension(&s.to_ascii_lowercase())
            .ok_or_else(|| anyhow::anyhow!("Unknown format '{}' (expected json or sql)", s))
    }
}

/// Encode a single row as a format-specific fragment
///
/// Structured fragments are JSON objects; statement fragments are one
/// `INSERT` statement.
pub fn encode_row(table: &TableName, row: &RowRecord, format: Format) -> String {
    match format {
        Format::Json => structured::encode_row(row),
        Format::Sql => statement::encode_row(table, row),
    }
}

/// Decode a single format-specific fragment back into a row
pub fn decode_row(fragment: &str, format: Format) -> Result<RowRecord> {
    match format {
        Format::Json => structured::decode_row(fragment),
        Format::Sql => statement::decode_statement(fragment).map(|(_, row)| row),
    }
}

/// Incrementally builds one table artifact
///
/// The statement format is appended line by line as rows arrive; the
/// structured format keeps encoded objects until [`TableWriter::finish`]
/// closes the array.
pub struct TableWriter {
    table: TableName,
    format: Format,
    columns: Option<Vec<String>>,
    sql: String,
    objects: Vec<String>,
    rows: usize,
}

impl TableWriter {
    pub fn new(table: TableName, format: Format) -> Self {
        Self {
            table,
            format,
            columns: None,
            sql: String::new(),
            objects: Vec::new(),
            rows: 0,
        }
    }

    /// Use an explicit column list for statements instead of each row's keys
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = Some(columns);
        self
    }

    pub fn push(&mut self, row: &RowRecord) {
        match self.format {
            Format::Json => self.objects.push(structured::encode_row(row)),
            Format::Sql => {
                let line = match &self.columns {
                    Some(columns) => statement::encode_insert(
                        &self.table,
                        columns.iter().map(String::as_str),
                        row,
                    ),
                    None => statement::encode_row(&self.table, row),
                };
                self.sql.push_str(&line);
                self.sql.push('\n');
            }
        }
        self.rows += 1;
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn finish(self) -> Vec<u8> {
        match self.format {
            Format::Json => structured::assemble_table(&self.objects).into_bytes(),
            Format::Sql => self.sql.into_bytes(),
        }
    }
}

/// Decode a whole table artifact
///
/// `artifact` names the file in error messages. Malformed content yields
/// [`SyncError::RowCodec`].
pub fn decode_table(
    table: &TableName,
    bytes: &[u8],
    format: Format,
    artifact: &str,
) -> Result<Vec<RowRecord>> {
    let codec_error = |location: String, message: String| SyncError::RowCodec {
        artifact: artifact.to_string(),
        location,
        message,
    };

    let text = std::str::from_utf8(bytes).map_err(|e| {
        codec_error(
            format!("byte {}", e.valid_up_to()),
            "artifact is not valid UTF-8".to_string(),
        )
    })?;

    let decoded = match format {
        Format::Json => structured::decode_table(text),
        Format::Sql => statement::decode_table(table, text),
    };

    decoded.map_err(|e| {
        // The outermost context is the row/statement position when there is one
        let chain: Vec<String> = e.chain().map(|c| c.to_string()).collect();
        let (location, message) = match chain.split_first() {
            Some((first, rest))
                if (first.starts_with("row ") || first.starts_with("statement "))
                    && !rest.is_empty() =>
            {
                (first.clone(), rest.join(": "))
            }
            _ => ("artifact".to_string(), chain.join(": ")),
        };
        codec_error(location, message).into()
    })
}
