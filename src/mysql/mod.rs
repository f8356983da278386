// ABOUTME: MySQL-family dialect (MySQL and MariaDB) for snapshot export and import
// ABOUTME: Wraps one mysql_async connection with backtick quoting and ON DUPLICATE KEY upserts

pub mod converter;
pub mod reader;

use crate::config::ConnectionSettings;
use crate::dialect::{select_statement, Dialect, Driver};
use crate::error::SyncError;
use crate::row::RowRecord;
use crate::table_name::TableName;
use crate::utils;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use mysql_async::{prelude::*, Conn, Opts, OptsBuilder, Row};
use std::time::Duration;

pub struct MySqlDialect {
    conn: Conn,
    database: String,
}

/// Build connection options from discrete settings
pub fn connection_opts(settings: &ConnectionSettings) -> Opts {
    OptsBuilder::default()
        .ip_or_hostname(settings.host.clone())
        .tcp_port(settings.port_or_default(Driver::MySql))
        .user(Some(settings.user.clone()))
        .pass(settings.password.clone())
        .db_name(Some(settings.database.clone()))
        .into()
}

/// Connect to a MySQL database
///
/// Retries up to 3 times with exponential backoff before giving up with
/// [`SyncError::Connection`].
pub async fn connect_mysql(settings: &ConnectionSettings) -> Result<Conn> {
    let opts = connection_opts(settings);

    let conn = utils::retry_with_backoff(
        || {
            let opts = opts.clone();
            async move {
                Conn::new(opts)
                    .await
                    .context("Failed to create MySQL connection")
            }
        },
        3,
        Duration::from_secs(1),
    )
    .await
    .map_err(|e| {
        SyncError::Connection(format!(
            "MySQL server {}:{} database '{}': {:#}",
            settings.host,
            settings.port_or_default(Driver::MySql),
            settings.database,
            e
        ))
    })?;

    tracing::debug!("Successfully connected to MySQL");

    Ok(conn)
}

impl MySqlDialect {
    pub async fn connect(settings: &ConnectionSettings) -> Result<Self> {
        let conn = connect_mysql(settings).await?;
        Ok(Self {
            conn,
            database: settings.database.clone(),
        })
    }

    fn schema_read(table: &TableName, err: anyhow::Error) -> anyhow::Error {
        SyncError::SchemaRead {
            table: table.to_string(),
            message: format!("{:#}", err),
        }
        .into()
    }
}

#[async_trait]
impl Dialect for MySqlDialect {
    fn driver(&self) -> Driver {
        Driver::MySql
    }

    fn database(&self) -> &str {
        &self.database
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        format!("`{}`", identifier.replace('`', "``"))
    }

    /// MySQL treats backslash as an escape character inside string literals
    fn string_literal(&self, text: &str) -> String {
        format!("'{}'", text.replace('\\', "\\\\").replace('\'', "''"))
    }

    fn upsert_clause(&self, columns: &[String], primary_key: &[String]) -> String {
        let mut updates: Vec<String> = columns
            .iter()
            .filter(|c| !primary_key.contains(c))
            .map(|c| format!("{0} = VALUES({0})", self.quote_identifier(c)))
            .collect();
        if updates.is_empty() {
            // Every column is part of the key; a self-assignment turns duplicates into no-ops
            match columns.first() {
                Some(first) => updates.push(format!(
                    "{0} = {0}",
                    self.quote_identifier(first)
                )),
                None => return String::new(),
            }
        }
        format!("ON DUPLICATE KEY UPDATE {}", updates.join(", "))
    }

    /// Foreign key checks stay off for the session so cyclic references load
    async fn begin_import(&mut self) -> Result<()> {
        self.conn
            .query_drop("SET FOREIGN_KEY_CHECKS = 0")
            .await
            .context("Failed to disable foreign key checks")
    }

    async fn list_tables(&mut self) -> Result<Vec<TableName>> {
        let names = reader::list_tables(&mut self.conn, &self.database).await?;
        names
            .into_iter()
            .map(TableName::new)
            .collect::<Result<Vec<_>>>()
            .context("MySQL returned a table name that cannot be used as an artifact name")
    }

    async fn is_view(&mut self, table: &TableName) -> Result<bool> {
        let kind = reader::table_type(&mut self.conn, &self.database, table.as_str())
            .await
            .map_err(|e| Self::schema_read(table, e))?;
        match kind {
            Some(kind) => Ok(kind.eq_ignore_ascii_case("VIEW")),
            None => Err(Self::schema_read(
                table,
                anyhow::anyhow!("table does not exist in '{}'", self.database),
            )),
        }
    }

    async fn get_columns(&mut self, table: &TableName) -> Result<Vec<String>> {
        reader::get_column_names(&mut self.conn, &self.database, table.as_str())
            .await
            .map_err(|e| Self::schema_read(table, e))
    }

    async fn get_schema_ddl(&mut self, table: &TableName) -> Result<String> {
        let quoted = self.quote_identifier(table.as_str());
        reader::show_create(&mut self.conn, &quoted)
            .await
            .map_err(|e| Self::schema_read(table, e))
    }

    async fn get_foreign_key_targets(&mut self, table: &TableName) -> Result<Vec<TableName>> {
        let targets = reader::get_referenced_tables(&mut self.conn, &self.database, table.as_str())
            .await
            .map_err(|e| Self::schema_read(table, e))?;
        Ok(targets
            .into_iter()
            .filter_map(|t| TableName::new(t).ok())
            .collect())
    }

    async fn primary_key_columns(&mut self, table: &TableName) -> Result<Vec<String>> {
        reader::get_primary_key(&mut self.conn, &self.database, table.as_str())
            .await
            .map_err(|e| Self::schema_read(table, e))
    }

    async fn query_rows<'a>(
        &'a mut self,
        table: &TableName,
        columns: &[String],
        condition: Option<&str>,
    ) -> Result<BoxStream<'a, Result<RowRecord>>> {
        let sql = select_statement(&*self, table, columns, condition);
        tracing::debug!("Streaming rows: {}", sql);

        let table_name = table.to_string();
        let stream = self
            .conn
            .query_stream::<Row, _>(sql)
            .await
            .with_context(|| format!("Failed to read rows from '{}'", table_name))?;

        Ok(stream
            .map(move |row| {
                row.map(|r| converter::mysql_row_to_record(&r))
                    .with_context(|| format!("Failed to read a row from '{}'", table_name))
            })
            .boxed())
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.conn.query_drop(sql).await.map_err(|e| {
            anyhow::anyhow!(
                "MySQL rejected '{}': {}",
                SyncError::statement_fragment(sql),
                e
            )
        })?;
        Ok(self.conn.affected_rows())
    }

    async fn truncate(&mut self, table: &TableName) -> Result<()> {
        let sql = format!("TRUNCATE TABLE {}", self.quote_identifier(table.as_str()));
        self.conn
            .query_drop(&sql)
            .await
            .with_context(|| format!("Failed to truncate '{}'", table))
    }

    async fn row_count(&mut self, table: &TableName) -> Result<u64> {
        let quoted = self.quote_identifier(table.as_str());
        reader::get_table_row_count(&mut self.conn, &quoted).await
    }
}
