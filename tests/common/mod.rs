// ABOUTME: Scripted in-memory dialect shared by the engine integration tests
// ABOUTME: Serves fixed tables and rows and records every executed statement

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use seren_snapshot::config::{ConnectionSettings, SyncConfig};
use seren_snapshot::dialect::{Dialect, Driver};
use seren_snapshot::error::SyncError;
use seren_snapshot::row::{RowRecord, Value};
use seren_snapshot::table_name::TableName;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
struct FakeTable {
    columns: Vec<String>,
    rows: Vec<RowRecord>,
    references: Vec<TableName>,
    view: bool,
    primary_key: Vec<String>,
}

/// Statements and reads seen by a [`FakeDialect`], shared with the test
#[derive(Clone, Default)]
pub struct FakeLog(Arc<Mutex<Vec<String>>>);

impl FakeLog {
    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|e| e.strip_prefix("EXEC ").map(str::to_string))
            .collect()
    }

    pub fn inserts_into(&self, table: &str) -> Vec<String> {
        let head = format!("INSERT INTO `{}`", table);
        self.statements()
            .into_iter()
            .filter(|s| s.starts_with(&head))
            .collect()
    }
}

#[derive(Clone)]
pub struct FakeDialect {
    database: String,
    tables: BTreeMap<TableName, FakeTable>,
    counts: HashMap<TableName, u64>,
    fail_when: Option<String>,
    log: FakeLog,
}

pub fn t(name: &str) -> TableName {
    TableName::new(name).unwrap()
}

/// `count` rows of `(id, name)` where names look like `<table>-<id>`
pub fn rows(table: &str, count: i64) -> Vec<RowRecord> {
    (1..=count)
        .map(|id| {
            RowRecord::new()
                .with("id", Value::Integer(id))
                .with("name", Value::String(format!("{}-{}", table, id)))
        })
        .collect()
}

impl FakeDialect {
    pub fn new(database: &str) -> Self {
        Self {
            database: database.to_string(),
            tables: BTreeMap::new(),
            counts: HashMap::new(),
            fail_when: None,
            log: FakeLog::default(),
        }
    }

    /// Add a table with `(id, name)` columns and `count` rows
    pub fn table(mut self, name: &str, count: i64) -> Self {
        self.tables.insert(
            t(name),
            FakeTable {
                columns: vec!["id".into(), "name".into()],
                rows: rows(name, count),
                primary_key: vec!["id".into()],
                ..Default::default()
            },
        );
        self
    }

    pub fn view(mut self, name: &str, count: i64) -> Self {
        self.tables.insert(
            t(name),
            FakeTable {
                columns: vec!["id".into(), "name".into()],
                rows: rows(name, count),
                view: true,
                ..Default::default()
            },
        );
        self
    }

    pub fn references(mut self, name: &str, targets: &[&str]) -> Self {
        if let Some(table) = self.tables.get_mut(&t(name)) {
            table.references = targets.iter().map(|n| t(n)).collect();
        }
        self
    }

    /// Destination row count reported for `name` before anything is loaded
    pub fn existing_rows(mut self, name: &str, count: u64) -> Self {
        self.counts.insert(t(name), count);
        self
    }

    /// Fail any statement containing `needle`
    pub fn fail_when(mut self, needle: &str) -> Self {
        self.fail_when = Some(needle.to_string());
        self
    }

    pub fn log(&self) -> FakeLog {
        self.log.clone()
    }

    fn lookup(&self, table: &TableName) -> Result<&FakeTable> {
        self.tables.get(table).ok_or_else(|| {
            SyncError::SchemaRead {
                table: table.to_string(),
                message: "no such table".into(),
            }
            .into()
        })
    }
}

#[async_trait]
impl Dialect for FakeDialect {
    fn driver(&self) -> Driver {
        Driver::MySql
    }

    fn database(&self) -> &str {
        &self.database
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
    }

    fn string_literal(&self, text: &str) -> String {
        format!("'{}'", text.replace('\'', "''"))
    }

    fn upsert_clause(&self, columns: &[String], primary_key: &[String]) -> String {
        let updates: Vec<String> = columns
            .iter()
            .filter(|c| !primary_key.contains(c))
            .map(|c| format!("{0} = VALUES({0})", self.quote_identifier(c)))
            .collect();
        format!("ON DUPLICATE KEY UPDATE {}", updates.join(", "))
    }

    async fn begin_import(&mut self) -> Result<()> {
        self.log.push("BEGIN IMPORT".into());
        Ok(())
    }

    async fn list_tables(&mut self) -> Result<Vec<TableName>> {
        Ok(self.tables.keys().cloned().collect())
    }

    async fn is_view(&mut self, table: &TableName) -> Result<bool> {
        Ok(self.lookup(table)?.view)
    }

    async fn get_columns(&mut self, table: &TableName) -> Result<Vec<String>> {
        Ok(self.lookup(table)?.columns.clone())
    }

    async fn get_schema_ddl(&mut self, table: &TableName) -> Result<String> {
        let fake = self.lookup(table)?;
        if fake.view {
            return Ok(format!("CREATE VIEW `{}` AS SELECT 1 AS `id`", table));
        }
        let columns: Vec<String> = fake
            .columns
            .iter()
            .map(|c| format!("  `{}` text", c))
            .collect();
        Ok(format!("CREATE TABLE `{}` (\n{}\n)", table, columns.join(",\n")))
    }

    async fn get_foreign_key_targets(&mut self, table: &TableName) -> Result<Vec<TableName>> {
        Ok(self.lookup(table)?.references.clone())
    }

    async fn primary_key_columns(&mut self, table: &TableName) -> Result<Vec<String>> {
        Ok(self.lookup(table)?.primary_key.clone())
    }

    async fn query_rows<'a>(
        &'a mut self,
        table: &TableName,
        _columns: &[String],
        condition: Option<&str>,
    ) -> Result<BoxStream<'a, Result<RowRecord>>> {
        self.log.push(format!(
            "SELECT {}{}",
            table,
            condition.map(|c| format!(" WHERE {}", c)).unwrap_or_default()
        ));
        let rows = self.lookup(table)?.rows.clone();
        Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.log.push(format!("EXEC {}", sql));
        if let Some(ref needle) = self.fail_when {
            if sql.contains(needle.as_str()) {
                return Err(anyhow!("simulated failure"));
            }
        }
        if let Some(rest) = sql.strip_prefix("INSERT INTO `") {
            let name = rest.split('`').next().unwrap_or_default();
            let tuples = sql.matches("),\n(").count() as u64 + 1;
            *self.counts.entry(t(name)).or_insert(0) += tuples;
            return Ok(tuples);
        }
        Ok(0)
    }

    async fn truncate(&mut self, table: &TableName) -> Result<()> {
        self.log.push(format!("TRUNCATE {}", table));
        self.counts.insert(table.clone(), 0);
        Ok(())
    }

    async fn row_count(&mut self, table: &TableName) -> Result<u64> {
        Ok(self.counts.get(table).copied().unwrap_or(0))
    }
}

pub fn config(prefix: &str) -> SyncConfig {
    let mut config = SyncConfig::new(ConnectionSettings {
        driver: "mysql".into(),
        host: "localhost".into(),
        database: "shop".into(),
        ..Default::default()
    });
    config.prefix = prefix.to_string();
    config
}

/// Find the first typed error of the chain matching `pred`
pub fn find_error<F>(err: &anyhow::Error, pred: F) -> Option<&SyncError>
where
    F: Fn(&SyncError) -> bool,
{
    err.downcast_ref::<SyncError>()
        .filter(|e| pred(e))
        .or_else(|| {
            err.chain()
                .filter_map(|cause| cause.downcast_ref::<SyncError>())
                .find(|e| pred(e))
        })
}
