// ABOUTME: Database dialect abstraction shared by the MySQL and Postgres adapters
// ABOUTME: Covers introspection, row streaming, statement execution and SQL rendering

use crate::codec::statement::format_float;
use crate::config::ConnectionSettings;
use crate::error::SyncError;
use crate::row::{RowRecord, Value};
use crate::table_name::TableName;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::str::FromStr;

/// Supported database engine families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    MySql,
    Postgres,
}

impl Driver {
    pub fn name(self) -> &'static str {
        match self {
            Driver::MySql => "mysql",
            Driver::Postgres => "postgres",
        }
    }

    pub fn default_port(self) -> u16 {
        match self {
            Driver::MySql => 3306,
            Driver::Postgres => 5432,
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Driver {
    type Err = SyncError;

    fn from_str(s: &str) -> std::result::Result<Self, SyncError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Driver::MySql),
            "postgres" | "postgresql" | "pgsql" => Ok(Driver::Postgres),
            _ => Err(SyncError::UnsupportedDialect(s.to_string())),
        }
    }
}

/// One live database session plus the SQL dialect it speaks
///
/// The engine owns the dialect exclusively for the whole run, so every
/// operation takes `&mut self`.
#[async_trait]
pub trait Dialect: Send {
    fn driver(&self) -> Driver;

    /// Name of the connected database
    fn database(&self) -> &str;

    fn quote_identifier(&self, identifier: &str) -> String;

    /// Quote text as a string literal for this engine
    fn string_literal(&self, text: &str) -> String;

    /// Conflict clause appended to an INSERT to turn it into an upsert
    fn upsert_clause(&self, columns: &[String], primary_key: &[String]) -> String;

    /// Render a row value as a literal for this engine
    fn render_value(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) if f.is_finite() => format_float(*f),
            Value::Float(f) => self.string_literal(&f.to_string()),
            Value::String(s) => self.string_literal(s),
            Value::Timestamp(ts) => self.string_literal(&Value::format_timestamp(ts)),
            Value::Json(json) => self.string_literal(&json.to_string()),
        }
    }

    /// Session setup before any schema or row is applied
    async fn begin_import(&mut self) -> Result<()> {
        Ok(())
    }

    /// Tables and views in the connected database, sorted by name
    async fn list_tables(&mut self) -> Result<Vec<TableName>>;

    async fn is_view(&mut self, table: &TableName) -> Result<bool>;

    /// Non-generated columns in ordinal order
    async fn get_columns(&mut self, table: &TableName) -> Result<Vec<String>>;

    /// DDL that recreates the table or view
    async fn get_schema_ddl(&mut self, table: &TableName) -> Result<String>;

    /// Statements that must run after every table exists, such as foreign keys
    async fn get_deferred_ddl(&mut self, _table: &TableName) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Tables referenced by foreign keys of `table`, in first-seen order
    async fn get_foreign_key_targets(&mut self, table: &TableName) -> Result<Vec<TableName>>;

    async fn primary_key_columns(&mut self, table: &TableName) -> Result<Vec<String>>;

    /// Stream rows of `columns` from `table`, optionally filtered by a WHERE condition
    async fn query_rows<'a>(
        &'a mut self,
        table: &TableName,
        columns: &[String],
        condition: Option<&str>,
    ) -> Result<BoxStream<'a, Result<RowRecord>>>;

    /// Run one statement, returning the affected row count
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    async fn truncate(&mut self, table: &TableName) -> Result<()>;

    /// Empty every table of the load set before any row is applied
    ///
    /// Only the given tables are touched; nothing cascades beyond them.
    async fn truncate_tables(&mut self, tables: &[TableName]) -> Result<()> {
        for table in tables {
            self.truncate(table).await?;
        }
        Ok(())
    }

    async fn row_count(&mut self, table: &TableName) -> Result<u64>;
}

/// Build the SELECT used to stream rows
pub fn select_statement(
    dialect: &dyn Dialect,
    table: &TableName,
    columns: &[String],
    condition: Option<&str>,
) -> String {
    let column_list = if columns.is_empty() {
        "*".to_string()
    } else {
        columns
            .iter()
            .map(|c| dialect.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let mut sql = format!(
        "SELECT {} FROM {}",
        column_list,
        dialect.quote_identifier(table.as_str())
    );
    if let Some(condition) = condition.map(str::trim).filter(|c| !c.is_empty()) {
        sql.push_str(" WHERE ");
        sql.push_str(condition);
    }
    sql
}

/// Render one multi-row INSERT for rows that share `columns`
///
/// Columns missing from a row are written as NULL. With `upsert`, the
/// dialect's conflict clause against the given primary key is appended.
pub fn insert_statement(
    dialect: &dyn Dialect,
    table: &TableName,
    columns: &[String],
    rows: &[RowRecord],
    upsert: Option<&[String]>,
) -> String {
    let column_list = columns
        .iter()
        .map(|c| dialect.quote_identifier(c))
        .collect::<Vec<_>>()
        .join(", ");
    let tuples = rows
        .iter()
        .map(|row| {
            let values = columns
                .iter()
                .map(|c| dialect.render_value(row.get(c).unwrap_or(&Value::Null)))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({})", values)
        })
        .collect::<Vec<_>>()
        .join(",\n");

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES\n{}",
        dialect.quote_identifier(table.as_str()),
        column_list,
        tuples
    );
    if let Some(primary_key) = upsert {
        let clause = dialect.upsert_clause(columns, primary_key);
        if !clause.is_empty() {
            sql.push(' ');
            sql.push_str(&clause);
        }
    }
    sql
}

/// Open a session for the configured driver
///
/// Unknown drivers yield [`SyncError::UnsupportedDialect`]; connection
/// failures after retries yield [`SyncError::Connection`].
pub async fn connect(settings: &ConnectionSettings) -> Result<Box<dyn Dialect>> {
    let driver: Driver = settings.driver.parse()?;
    tracing::info!(
        "Connecting to {} database '{}' at {}:{}",
        driver,
        settings.database,
        settings.host,
        settings.port_or_default(driver)
    );

    let dialect: Box<dyn Dialect> = match driver {
        Driver::MySql => Box::new(crate::mysql::MySqlDialect::connect(settings).await?),
        Driver::Postgres => Box::new(crate::postgres::PostgresDialect::connect(settings).await?),
    };
    Ok(dialect)
}
