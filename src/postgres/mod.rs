// ABOUTME: Postgres-family dialect for snapshot export and import
// ABOUTME: Double-quote identifiers, catalog-built DDL and ON CONFLICT upserts

pub mod connection;
pub mod converter;
pub mod reader;

pub use connection::{connect, connect_with_retry};

use crate::config::ConnectionSettings;
use crate::dialect::{Dialect, Driver};
use crate::error::SyncError;
use crate::row::{RowRecord, Value};
use crate::table_name::TableName;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tokio_postgres::{Client, SimpleQueryMessage};

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// One `TRUNCATE` over the whole load set, without `CASCADE`
///
/// Postgres refuses it when a table outside the set still references one
/// inside, instead of silently emptying the referencing table.
pub fn truncate_statement(tables: &[TableName]) -> String {
    let list = tables
        .iter()
        .map(|t| quote(t.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    format!("TRUNCATE TABLE {}", list)
}

/// `CREATE [MATERIALIZED] VIEW` for a relation of the given pg_class kind
///
/// Materialized views are created empty; `REFRESH MATERIALIZED VIEW` fills
/// them once the data is loaded.
pub fn view_ddl(relkind: &str, table: &TableName, definition: &str) -> String {
    let body = definition.trim().trim_end_matches(';');
    if relkind == "m" {
        format!(
            "CREATE MATERIALIZED VIEW {} AS\n{}\nWITH NO DATA",
            quote(table.as_str()),
            body
        )
    } else {
        format!("CREATE VIEW {} AS\n{}", quote(table.as_str()), body)
    }
}

/// Foreign keys are emitted as trailing `ALTER TABLE` statements
pub fn foreign_key_statement(table: &TableName, constraint: &reader::ConstraintInfo) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} {}",
        quote(table.as_str()),
        quote(&constraint.name),
        constraint.definition
    )
}

pub struct PostgresDialect {
    client: Client,
    database: String,
    schema: String,
}

impl PostgresDialect {
    pub async fn connect(settings: &ConnectionSettings) -> Result<Self> {
        let client = connect_with_retry(settings).await?;
        let schema = reader::get_current_schema(&client).await?;
        tracing::debug!("Using schema '{}'", schema);
        Ok(Self {
            client,
            database: settings.database.clone(),
            schema,
        })
    }

    fn schema_read(table: &TableName, err: anyhow::Error) -> anyhow::Error {
        SyncError::SchemaRead {
            table: table.to_string(),
            message: format!("{:#}", err),
        }
        .into()
    }

    async fn build_table_ddl(&self, table: &TableName) -> Result<String> {
        let columns = reader::get_table_columns(&self.client, &self.schema, table.as_str()).await?;
        if columns.is_empty() {
            anyhow::bail!("table has no columns or does not exist");
        }
        let constraints = reader::get_constraints(&self.client, &self.schema, table.as_str()).await?;
        let indexes =
            reader::get_index_definitions(&self.client, &self.schema, table.as_str()).await?;

        let mut lines: Vec<String> = columns
            .iter()
            .map(|c| reader::column_definition(c, |s| self.quote_identifier(s)))
            .collect();
        lines.extend(constraints.iter().filter(|c| c.kind != "f").map(|c| {
            format!(
                "CONSTRAINT {} {}",
                self.quote_identifier(&c.name),
                c.definition
            )
        }));

        let mut ddl = format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.quote_identifier(table.as_str()),
            lines.join(",\n    ")
        );
        for index in indexes {
            // Indexes are qualified with the source schema; keep them relative
            let relative = index.replace(
                &format!(" ON {}.", self.quote_schema_prefix()),
                " ON ",
            );
            ddl.push_str(";\n");
            ddl.push_str(&relative);
        }
        Ok(ddl)
    }

    fn quote_schema_prefix(&self) -> String {
        if self
            .schema
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            self.schema.clone()
        } else {
            self.quote_identifier(&self.schema)
        }
    }
}

#[async_trait]
impl Dialect for PostgresDialect {
    fn driver(&self) -> Driver {
        Driver::Postgres
    }

    fn database(&self) -> &str {
        &self.database
    }

    fn quote_identifier(&self, identifier: &str) -> String {
        quote(identifier)
    }

    fn string_literal(&self, text: &str) -> String {
        format!("'{}'", text.replace('\'', "''"))
    }

    fn upsert_clause(&self, columns: &[String], primary_key: &[String]) -> String {
        if primary_key.is_empty() {
            return "ON CONFLICT DO NOTHING".to_string();
        }
        let target = primary_key
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let updates: Vec<String> = columns
            .iter()
            .filter(|c| !primary_key.contains(c))
            .map(|c| format!("{0} = EXCLUDED.{0}", self.quote_identifier(c)))
            .collect();
        if updates.is_empty() {
            format!("ON CONFLICT ({}) DO NOTHING", target)
        } else {
            format!("ON CONFLICT ({}) DO UPDATE SET {}", target, updates.join(", "))
        }
    }

    /// Quoted literals stay untyped, so Postgres coerces them to each target column's type
    fn render_value(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => self.string_literal(if *b { "true" } else { "false" }),
            Value::Integer(i) => self.string_literal(&i.to_string()),
            Value::Float(f) => self.string_literal(&f.to_string()),
            Value::String(s) => self.string_literal(s),
            Value::Timestamp(ts) => self.string_literal(&Value::format_timestamp(ts)),
            Value::Json(json) => self.string_literal(&json.to_string()),
        }
    }

    /// Triggers, including foreign key checks, stay off for the session so
    /// cyclic references load. This needs superuser or replication rights;
    /// without them the import continues with checks enabled.
    async fn begin_import(&mut self) -> Result<()> {
        if let Err(e) = self
            .client
            .batch_execute("SET session_replication_role = replica")
            .await
        {
            tracing::warn!(
                "Could not disable foreign key checks ({}); rows referencing later tables may be rejected",
                e
            );
        }
        Ok(())
    }

    async fn list_tables(&mut self) -> Result<Vec<TableName>> {
        let names = reader::list_relations(&self.client, &self.schema).await?;
        names
            .into_iter()
            .map(TableName::new)
            .collect::<Result<Vec<_>>>()
            .context("Postgres returned a table name that cannot be used as an artifact name")
    }

    async fn is_view(&mut self, table: &TableName) -> Result<bool> {
        let kind = reader::relation_kind(&self.client, &self.schema, table.as_str())
            .await
            .map_err(|e| Self::schema_read(table, e))?;
        match kind.as_deref() {
            Some("v") | Some("m") => Ok(true),
            Some(_) => Ok(false),
            None => Err(Self::schema_read(
                table,
                anyhow::anyhow!("relation does not exist in schema '{}'", self.schema),
            )),
        }
    }

    async fn get_columns(&mut self, table: &TableName) -> Result<Vec<String>> {
        let columns = reader::get_table_columns(&self.client, &self.schema, table.as_str())
            .await
            .map_err(|e| Self::schema_read(table, e))?;
        Ok(columns
            .into_iter()
            .filter(|c| !c.generated)
            .map(|c| c.name)
            .collect())
    }

    async fn get_schema_ddl(&mut self, table: &TableName) -> Result<String> {
        let kind = reader::relation_kind(&self.client, &self.schema, table.as_str())
            .await
            .map_err(|e| Self::schema_read(table, e))?;
        if let Some(kind @ ("v" | "m")) = kind.as_deref() {
            let definition = reader::get_view_definition(&self.client, &self.schema, table.as_str())
                .await
                .map_err(|e| Self::schema_read(table, e))?;
            return Ok(view_ddl(kind, table, &definition));
        }
        self.build_table_ddl(table)
            .await
            .map_err(|e| Self::schema_read(table, e))
    }

    async fn get_deferred_ddl(&mut self, table: &TableName) -> Result<Vec<String>> {
        let constraints = reader::get_constraints(&self.client, &self.schema, table.as_str())
            .await
            .map_err(|e| Self::schema_read(table, e))?;
        Ok(constraints
            .iter()
            .filter(|c| c.kind == "f")
            .map(|c| foreign_key_statement(table, c))
            .collect())
    }

    async fn get_foreign_key_targets(&mut self, table: &TableName) -> Result<Vec<TableName>> {
        let constraints = reader::get_constraints(&self.client, &self.schema, table.as_str())
            .await
            .map_err(|e| Self::schema_read(table, e))?;
        let mut targets: Vec<TableName> = Vec::new();
        for name in constraints
            .into_iter()
            .filter(|c| c.kind == "f")
            .filter_map(|c| c.referenced_table)
        {
            if let Ok(target) = TableName::new(name) {
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
        }
        Ok(targets)
    }

    async fn primary_key_columns(&mut self, table: &TableName) -> Result<Vec<String>> {
        reader::get_primary_key(&self.client, &self.schema, table.as_str())
            .await
            .map_err(|e| Self::schema_read(table, e))
    }

    async fn query_rows<'a>(
        &'a mut self,
        table: &TableName,
        columns: &[String],
        condition: Option<&str>,
    ) -> Result<BoxStream<'a, Result<RowRecord>>> {
        let infos = reader::get_table_columns(&self.client, &self.schema, table.as_str())
            .await
            .map_err(|e| Self::schema_read(table, e))?;

        let selected: Vec<String> = if columns.is_empty() {
            infos.iter().map(|c| c.name.clone()).collect()
        } else {
            columns.to_vec()
        };
        let expressions: Vec<String> = selected
            .iter()
            .map(|name| {
                let quoted = self.quote_identifier(name);
                let native = infos
                    .iter()
                    .find(|c| &c.name == name)
                    .map(|c| converter::is_native_type(&c.type_name))
                    .unwrap_or(true);
                if native {
                    quoted
                } else {
                    format!("{0}::text AS {0}", quoted)
                }
            })
            .collect();

        let mut sql = format!(
            "SELECT {} FROM {}",
            expressions.join(", "),
            self.quote_identifier(table.as_str())
        );
        if let Some(condition) = condition.map(str::trim).filter(|c| !c.is_empty()) {
            sql.push_str(" WHERE ");
            sql.push_str(condition);
        }
        tracing::debug!("Streaming rows: {}", sql);

        let table_name = table.to_string();
        let stream = self
            .client
            .query_raw(sql.as_str(), Vec::<String>::new())
            .await
            .with_context(|| format!("Failed to read rows from '{}'", table_name))?;

        Ok(stream
            .map(move |row| {
                row.map_err(anyhow::Error::from)
                    .and_then(|r| converter::postgres_row_to_record(&r))
                    .with_context(|| format!("Failed to read a row from '{}'", table_name))
            })
            .boxed())
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        let messages = self.client.simple_query(sql).await.map_err(|e| {
            anyhow::anyhow!(
                "Postgres rejected '{}': {}",
                SyncError::statement_fragment(sql),
                e
            )
        })?;
        Ok(messages
            .iter()
            .map(|m| match m {
                SimpleQueryMessage::CommandComplete(n) => *n,
                _ => 0,
            })
            .sum())
    }

    async fn truncate(&mut self, table: &TableName) -> Result<()> {
        self.truncate_tables(std::slice::from_ref(table)).await
    }

    async fn truncate_tables(&mut self, tables: &[TableName]) -> Result<()> {
        if tables.is_empty() {
            return Ok(());
        }
        let sql = truncate_statement(tables);
        tracing::debug!("{}", sql);
        self.client.batch_execute(&sql).await.map_err(|e| {
            anyhow::anyhow!(
                "Postgres rejected '{}': {}",
                SyncError::statement_fragment(&sql),
                e
            )
        })
    }

    async fn row_count(&mut self, table: &TableName) -> Result<u64> {
        let quoted = self.quote_identifier(table.as_str());
        reader::get_table_row_count(&self.client, &quoted).await
    }
}
