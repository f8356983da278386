// ABOUTME: Snapshot manifest, schema entries and artifact naming
// ABOUTME: Lets an import recover table order from the manifest or a directory listing

use crate::codec::Format;
use crate::table_name::TableName;
use crate::utils::split_sql_statements;
use anyhow::{bail, Context, Result};
use chrono::{NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const MANIFEST_VERSION: u32 = 1;
pub const MANIFEST_FILE: &str = "0_metadata.json";

/// Run-level metadata written as the first artifact of every snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportManifest {
    pub version: u32,
    #[serde(with = "manifest_timestamp")]
    pub timestamp: NaiveDateTime,
    pub database: String,
    pub driver: String,
    pub format: Format,
    pub tables: Vec<TableName>,
    #[serde(default)]
    pub views: Vec<TableName>,
    /// Tables whose data was excluded at export time; no artifact exists
    #[serde(default)]
    pub data_excluded: Vec<TableName>,
    pub include_schema: bool,
    pub include_view_data: bool,
    pub chunk_size: usize,
}

mod manifest_timestamp {
    use crate::row::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

impl ExportManifest {
    pub fn new(
        database: &str,
        driver: &str,
        format: Format,
        tables: Vec<TableName>,
        include_schema: bool,
        include_view_data: bool,
        chunk_size: usize,
    ) -> Self {
        Self {
            version: MANIFEST_VERSION,
            timestamp: Utc::now().naive_utc(),
            database: database.to_string(),
            driver: driver.to_string(),
            format,
            tables,
            views: Vec::new(),
            data_excluded: Vec::new(),
            include_schema,
            include_view_data,
            chunk_size,
        }
    }

    pub fn is_view(&self, table: &TableName) -> bool {
        self.views.contains(table)
    }

    /// True if the data artifact for `table` was written by the export
    pub fn has_data_artifact(&self, table: &TableName) -> bool {
        !self.data_excluded.contains(table) && (self.include_view_data || !self.is_view(table))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes =
            serde_json::to_vec_pretty(self).context("Failed to serialize snapshot manifest")?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let manifest: ExportManifest =
            serde_json::from_slice(bytes).context("Failed to parse snapshot manifest")?;
        if manifest.version != MANIFEST_VERSION {
            bail!(
                "Manifest version mismatch (found {}, expected {})",
                manifest.version,
                MANIFEST_VERSION
            );
        }
        if manifest.chunk_size == 0 {
            bail!("Manifest chunk_size must be at least 1");
        }
        Ok(manifest)
    }
}

/// DDL and column list for one table or view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub table: TableName,
    pub is_view: bool,
    pub ddl: String,
    pub columns: Vec<String>,
    /// Run after every entry's DDL, e.g. foreign keys that may point at later tables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deferred: Vec<String>,
}

/// File name of the schema artifact
pub fn schema_file(format: Format) -> String {
    format!("0_schema.{}", format.extension())
}

/// File name of the data artifact at 0-based `index` of the processing order
pub fn table_file(index: usize, table: &TableName, format: Format) -> String {
    format!("{}_{}.{}", index + 1, table, format.extension())
}

static TABLE_FILE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([1-9][0-9]*)_(.+)\.(json|sql)$").expect("valid artifact regex"));

/// Parse a data artifact file name back into (0-based index, table, format)
///
/// Accepts bare names or keys with a `/`-separated prefix. Returns `None`
/// for the manifest, the schema artifact and anything else.
pub fn parse_table_file(key: &str) -> Option<(usize, TableName, Format)> {
    let name = key.rsplit('/').next().unwrap_or(key);
    let captures = TABLE_FILE_PATTERN.captures(name)?;
    let position: usize = captures[1].parse().ok()?;
    let table = TableName::new(&captures[2]).ok()?;
    let format = Format::from_extension(&captures[3])?;
    Some((position - 1, table, format))
}

/// Recover the processing order from a listing of artifact keys
///
/// Used when a snapshot has no manifest. Only artifacts of `format` are
/// considered; positions must be unique.
pub fn order_from_listing(keys: &[String], format: Format) -> Result<Vec<TableName>> {
    let mut found: Vec<(usize, TableName)> = keys
        .iter()
        .filter_map(|key| parse_table_file(key))
        .filter(|(_, _, f)| *f == format)
        .map(|(index, table, _)| (index, table))
        .collect();
    found.sort_by_key(|(index, _)| *index);

    for pair in found.windows(2) {
        if pair[0].0 == pair[1].0 {
            bail!(
                "Two artifacts share position {}: '{}' and '{}'",
                pair[0].0 + 1,
                pair[0].1,
                pair[1].1
            );
        }
    }

    Ok(found.into_iter().map(|(_, table)| table).collect())
}

/// Render schema entries as the schema artifact
///
/// Tables come first in the given order, then views, so views never run
/// before the tables they select from. Deferred statements follow all of
/// them, so a foreign key can reference a table created later.
pub fn encode_schema(entries: &[SchemaEntry], format: Format) -> Result<Vec<u8>> {
    let ordered: Vec<&SchemaEntry> = entries
        .iter()
        .filter(|e| !e.is_view)
        .chain(entries.iter().filter(|e| e.is_view))
        .collect();

    match format {
        Format::Json => {
            let mut bytes = serde_json::to_vec_pretty(&ordered)
                .context("Failed to serialize schema entries")?;
            bytes.push(b'\n');
            Ok(bytes)
        }
        Format::Sql => {
            let mut out = String::new();
            for entry in ordered {
                let kind = if entry.is_view { "view" } else { "table" };
                out.push_str(&format!("-- {}: {}\n", kind, entry.table));
                out.push_str(entry.ddl.trim().trim_end_matches(';').trim_end());
                out.push_str(";\n\n");
            }
            for entry in entries.iter().filter(|e| !e.deferred.is_empty()) {
                out.push_str(&format!("-- constraints: {}\n", entry.table));
                for statement in &entry.deferred {
                    out.push_str(statement.trim().trim_end_matches(';').trim_end());
                    out.push_str(";\n");
                }
                out.push('\n');
            }
            Ok(out.into_bytes())
        }
    }
}

/// One executable schema statement and the table it targets, if known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaStatement {
    pub table: Option<TableName>,
    pub sql: String,
}

static TARGET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)^\s*(?:CREATE|ALTER|DROP|COMMENT\s+ON)\s+(?:OR\s+REPLACE\s+)?(?:TEMPORARY\s+|UNLOGGED\s+|MATERIALIZED\s+)?(?:ALGORITHM\s*=\s*\w+\s+)?(?:DEFINER\s*=\s*\S+\s+)?(?:SQL\s+SECURITY\s+\w+\s+)?(?:TABLE|VIEW|COLUMN)\s+(?:IF\s+(?:NOT\s+)?EXISTS\s+)?(?:[`"]?\w+[`"]?\.)?[`"]?([^`"\s(.]+)[`"]?"#,
    )
    .expect("valid schema target regex")
});

static INDEX_TARGET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?is)^\s*CREATE\s+(?:UNIQUE\s+)?INDEX\s+(?:CONCURRENTLY\s+)?(?:IF\s+NOT\s+EXISTS\s+)?\S+\s+ON\s+(?:ONLY\s+)?(?:[`"]?\w+[`"]?\.)?[`"]?([^`"\s(.]+)[`"]?"#,
    )
    .expect("valid index target regex")
});

static LINE_COMMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*--[^\n]*\n?").expect("valid comment regex"));

/// Best-effort extraction of the table a DDL statement targets
pub fn statement_target(sql: &str) -> Option<TableName> {
    let captures = TARGET_PATTERN
        .captures(sql)
        .or_else(|| INDEX_TARGET_PATTERN.captures(sql))?;
    TableName::new(&captures[1]).ok()
}

/// Split a schema artifact into statements in file order
pub fn decode_schema(bytes: &[u8], format: Format) -> Result<Vec<SchemaStatement>> {
    match format {
        Format::Json => {
            let entries: Vec<SchemaEntry> =
                serde_json::from_slice(bytes).context("Failed to parse schema artifact")?;
            let mut statements = Vec::new();
            for entry in &entries {
                statements.extend(split_sql_statements(&entry.ddl).into_iter().map(|sql| {
                    SchemaStatement {
                        table: Some(entry.table.clone()),
                        sql,
                    }
                }));
            }
            for entry in &entries {
                statements.extend(entry.deferred.iter().flat_map(|ddl| {
                    split_sql_statements(ddl)
                        .into_iter()
                        .map(|sql| SchemaStatement {
                            table: Some(entry.table.clone()),
                            sql,
                        })
                }));
            }
            Ok(statements)
        }
        Format::Sql => {
            let text = std::str::from_utf8(bytes).context("Schema artifact is not valid UTF-8")?;
            Ok(split_sql_statements(text)
                .into_iter()
                .map(|stmt| LINE_COMMENT.replace_all(&stmt, "").trim().to_string())
                .filter(|sql| !sql.is_empty())
                .map(|sql| SchemaStatement {
                    table: statement_target(&sql),
                    sql,
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::Value;

    fn t(name: &str) -> TableName {
        TableName::new(name).unwrap()
    }

    fn entries() -> Vec<SchemaEntry> {
        vec![
            SchemaEntry {
                table: t("active_users"),
                is_view: true,
                ddl: "CREATE VIEW `active_users` AS SELECT * FROM `users` WHERE note = 'a;b'"
                    .into(),
                columns: vec!["id".into()],
                deferred: Vec::new(),
            },
            SchemaEntry {
                table: t("users"),
                is_view: false,
                ddl: "CREATE TABLE `users` (\n  `id` int NOT NULL\n);".into(),
                columns: vec!["id".into()],
                deferred: Vec::new(),
            },
        ]
    }

    /// `a` and `b` reference each other
    fn cyclic_entries() -> Vec<SchemaEntry> {
        ["a", "b"]
            .iter()
            .zip(["b", "a"])
            .map(|(name, target)| SchemaEntry {
                table: t(name),
                is_view: false,
                ddl: format!("CREATE TABLE \"{}\" (id int PRIMARY KEY, ref int)", name),
                columns: vec!["id".into(), "ref".into()],
                deferred: vec![format!(
                    "ALTER TABLE \"{0}\" ADD CONSTRAINT \"{0}_ref_fkey\" FOREIGN KEY (ref) REFERENCES \"{1}\"(id)",
                    name, target
                )],
            })
            .collect()
    }

    #[test]
    fn test_file_names() {
        assert_eq!(schema_file(Format::Sql), "0_schema.sql");
        assert_eq!(table_file(0, &t("users"), Format::Json), "1_users.json");
        assert_eq!(
            parse_table_file("snap/12_order-items.sql"),
            Some((11, t("order-items"), Format::Sql))
        );
        assert_eq!(parse_table_file("0_metadata.json"), None);
        assert_eq!(parse_table_file("0_schema.sql"), None);
        assert_eq!(parse_table_file("3_users.csv"), None);
    }

    #[test]
    fn test_order_from_listing() {
        let keys = vec![
            "0_metadata.json".to_string(),
            "10_z.sql".to_string(),
            "2_b.sql".to_string(),
            "1_a.sql".to_string(),
            "1_a.json".to_string(),
        ];
        let order = order_from_listing(&keys, Format::Sql).unwrap();
        assert_eq!(order, vec![t("a"), t("b"), t("z")]);

        let clash = vec!["1_a.sql".to_string(), "1_b.sql".to_string()];
        assert!(order_from_listing(&clash, Format::Sql).is_err());
    }

    #[test]
    fn test_schema_sql_round_trip_puts_views_last() {
        let bytes = encode_schema(&entries(), Format::Sql).unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.find("CREATE TABLE").unwrap() < text.find("CREATE VIEW").unwrap());

        let statements = decode_schema(&bytes, Format::Sql).unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].table, Some(t("users")));
        assert!(statements[0].sql.starts_with("CREATE TABLE"));
        assert_eq!(statements[1].table, Some(t("active_users")));
        assert!(statements[1].sql.ends_with("'a;b'"));
    }

    #[test]
    fn test_schema_json_round_trip() {
        let bytes = encode_schema(&entries(), Format::Json).unwrap();
        let statements = decode_schema(&bytes, Format::Json).unwrap();
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].table, Some(t("users")));
        assert_eq!(statements[1].table, Some(t("active_users")));
    }

    #[test]
    fn test_deferred_statements_follow_every_create() {
        for format in [Format::Sql, Format::Json] {
            let bytes = encode_schema(&cyclic_entries(), format).unwrap();
            let statements = decode_schema(&bytes, format).unwrap();
            let kinds: Vec<(&str, Option<TableName>)> = statements
                .iter()
                .map(|s| (s.sql.split_whitespace().next().unwrap(), s.table.clone()))
                .collect();
            assert_eq!(
                kinds,
                vec![
                    ("CREATE", Some(t("a"))),
                    ("CREATE", Some(t("b"))),
                    ("ALTER", Some(t("a"))),
                    ("ALTER", Some(t("b"))),
                ],
                "format {}",
                format
            );
        }
    }

    #[test]
    fn test_entries_without_deferred_statements_omit_the_field() {
        let bytes = encode_schema(&entries(), Format::Json).unwrap();
        assert!(!String::from_utf8(bytes).unwrap().contains("deferred"));
    }

    #[test]
    fn test_statement_target() {
        assert_eq!(
            statement_target("CREATE TABLE IF NOT EXISTS \"public\".\"orders\" (id int)"),
            Some(t("orders"))
        );
        assert_eq!(
            statement_target("CREATE OR REPLACE VIEW v_sales AS SELECT 1"),
            Some(t("v_sales"))
        );
        assert_eq!(
            statement_target("CREATE ALGORITHM=UNDEFINED DEFINER=`root`@`%` SQL SECURITY DEFINER VIEW `v` AS select 1"),
            Some(t("v"))
        );
        assert_eq!(
            statement_target("ALTER TABLE `logs` ADD CONSTRAINT fk FOREIGN KEY (a) REFERENCES b (id)"),
            Some(t("logs"))
        );
        assert_eq!(
            statement_target("CREATE UNIQUE INDEX \"idx_logs_at\" ON \"public\".\"logs\" (at)"),
            Some(t("logs"))
        );
        assert_eq!(statement_target("SET FOREIGN_KEY_CHECKS=0"), None);
    }

    #[test]
    fn test_manifest_round_trip_and_validation() {
        let mut manifest = ExportManifest::new(
            "shop",
            "mysql",
            Format::Sql,
            vec![t("customers"), t("orders")],
            true,
            false,
            500,
        );
        manifest.views.push(t("orders"));
        manifest.data_excluded.push(t("customers"));
        let decoded = ExportManifest::from_bytes(&manifest.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.tables, manifest.tables);
        assert_eq!(
            Value::format_timestamp(&decoded.timestamp),
            Value::format_timestamp(&manifest.timestamp)
        );
        assert!(!decoded.has_data_artifact(&t("customers")));
        assert!(!decoded.has_data_artifact(&t("orders")));
        assert!(decoded.has_data_artifact(&t("items")));

        let mut bad: serde_json::Value = serde_json::from_slice(&manifest.to_bytes().unwrap()).unwrap();
        bad["version"] = serde_json::json!(99);
        assert!(ExportManifest::from_bytes(bad.to_string().as_bytes()).is_err());
    }
}
