// ABOUTME: PostgreSQL schema introspection through pg_catalog
// ABOUTME: Lists relations and columns, reads keys and rebuilds CREATE statements

use anyhow::{Context, Result};
use tokio_postgres::Client;

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    /// `format_type` output, e.g. `character varying(40)`
    pub data_type: String,
    /// Base type name from pg_type, e.g. `varchar`
    pub type_name: String,
    pub not_null: bool,
    pub default: Option<String>,
    pub generated: bool,
    pub identity: bool,
}

#[derive(Debug, Clone)]
pub struct ConstraintInfo {
    pub name: String,
    /// `p`, `u`, `c` or `f`
    pub kind: String,
    pub definition: String,
    pub referenced_table: Option<String>,
}

/// Tables, partitioned tables and views of `schema`, sorted by name
pub async fn list_relations(client: &Client, schema: &str) -> Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT c.relname::text
             FROM pg_catalog.pg_class c
             JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
             WHERE n.nspname = $1
               AND c.relkind IN ('r', 'p', 'v')
               AND NOT c.relispartition
             ORDER BY c.relname",
            &[&schema],
        )
        .await
        .with_context(|| format!("Failed to list tables in schema '{}'", schema))?;

    Ok(rows.iter().map(|row| row.get(0)).collect())
}

/// The pg_class relkind of a relation, or `None` if it does not exist
pub async fn relation_kind(client: &Client, schema: &str, table: &str) -> Result<Option<String>> {
    let row = client
        .query_opt(
            "SELECT c.relkind::text
             FROM pg_catalog.pg_class c
             JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
             WHERE n.nspname = $1 AND c.relname = $2",
            &[&schema, &table],
        )
        .await
        .with_context(|| format!("Failed to look up relation '{}'.'{}'", schema, table))?;

    Ok(row.map(|r| r.get(0)))
}

/// Columns of a relation in attribute order
pub async fn get_table_columns(
    client: &Client,
    schema: &str,
    table: &str,
) -> Result<Vec<ColumnInfo>> {
    let rows = client
        .query(
            "SELECT
                a.attname::text,
                pg_catalog.format_type(a.atttypid, a.atttypmod),
                t.typname::text,
                a.attnotnull,
                pg_catalog.pg_get_expr(d.adbin, d.adrelid),
                a.attgenerated::text <> '',
                a.attidentity::text <> ''
             FROM pg_catalog.pg_attribute a
             JOIN pg_catalog.pg_class c ON a.attrelid = c.oid
             JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
             JOIN pg_catalog.pg_type t ON a.atttypid = t.oid
             LEFT JOIN pg_catalog.pg_attrdef d ON d.adrelid = a.attrelid AND d.adnum = a.attnum
             WHERE n.nspname = $1
               AND c.relname = $2
               AND a.attnum > 0
               AND NOT a.attisdropped
             ORDER BY a.attnum",
            &[&schema, &table],
        )
        .await
        .with_context(|| format!("Failed to get columns for table '{}'.'{}'", schema, table))?;

    Ok(rows
        .iter()
        .map(|row| ColumnInfo {
            name: row.get(0),
            data_type: row.get(1),
            type_name: row.get(2),
            not_null: row.get(3),
            default: row.get(4),
            generated: row.get(5),
            identity: row.get(6),
        })
        .collect())
}

/// Primary key, unique, check and foreign key constraints of a table
pub async fn get_constraints(
    client: &Client,
    schema: &str,
    table: &str,
) -> Result<Vec<ConstraintInfo>> {
    let rows = client
        .query(
            "SELECT
                con.conname::text,
                con.contype::text,
                pg_catalog.pg_get_constraintdef(con.oid, true),
                CASE WHEN rn.nspname = n.nspname THEN ref.relname::text END
             FROM pg_catalog.pg_constraint con
             JOIN pg_catalog.pg_class c ON con.conrelid = c.oid
             JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
             LEFT JOIN pg_catalog.pg_class ref ON con.confrelid = ref.oid
             LEFT JOIN pg_catalog.pg_namespace rn ON ref.relnamespace = rn.oid
             WHERE n.nspname = $1
               AND c.relname = $2
               AND con.contype IN ('p', 'u', 'c', 'f')
             ORDER BY
                CASE con.contype WHEN 'p' THEN 0 WHEN 'u' THEN 1 WHEN 'c' THEN 2 ELSE 3 END,
                con.conname",
            &[&schema, &table],
        )
        .await
        .with_context(|| format!("Failed to read constraints of '{}'.'{}'", schema, table))?;

    Ok(rows
        .iter()
        .map(|row| ConstraintInfo {
            name: row.get(0),
            kind: row.get(1),
            definition: row.get(2),
            referenced_table: row.get(3),
        })
        .collect())
}

/// Primary key columns in key order
pub async fn get_primary_key(client: &Client, schema: &str, table: &str) -> Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT a.attname::text
             FROM pg_catalog.pg_index i
             JOIN pg_catalog.pg_class c ON i.indrelid = c.oid
             JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
             CROSS JOIN LATERAL unnest(i.indkey) WITH ORDINALITY AS k(attnum, position)
             JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid AND a.attnum = k.attnum
             WHERE n.nspname = $1 AND c.relname = $2 AND i.indisprimary
             ORDER BY k.position",
            &[&schema, &table],
        )
        .await
        .with_context(|| format!("Failed to get primary key of '{}'.'{}'", schema, table))?;

    Ok(rows.iter().map(|row| row.get(0)).collect())
}

/// Standalone index definitions, excluding those backing constraints
pub async fn get_index_definitions(
    client: &Client,
    schema: &str,
    table: &str,
) -> Result<Vec<String>> {
    let rows = client
        .query(
            "SELECT pg_catalog.pg_get_indexdef(i.indexrelid)
             FROM pg_catalog.pg_index i
             JOIN pg_catalog.pg_class c ON i.indrelid = c.oid
             JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
             WHERE n.nspname = $1
               AND c.relname = $2
               AND NOT EXISTS (
                   SELECT 1 FROM pg_catalog.pg_constraint con WHERE con.conindid = i.indexrelid
               )
             ORDER BY i.indexrelid",
            &[&schema, &table],
        )
        .await
        .with_context(|| format!("Failed to read indexes of '{}'.'{}'", schema, table))?;

    Ok(rows.iter().map(|row| row.get(0)).collect())
}

pub async fn get_view_definition(client: &Client, schema: &str, view: &str) -> Result<String> {
    let row = client
        .query_one(
            "SELECT pg_catalog.pg_get_viewdef(c.oid, true)
             FROM pg_catalog.pg_class c
             JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
             WHERE n.nspname = $1 AND c.relname = $2",
            &[&schema, &view],
        )
        .await
        .with_context(|| format!("Failed to read definition of view '{}'.'{}'", schema, view))?;

    Ok(row.get(0))
}

pub async fn get_current_schema(client: &Client) -> Result<String> {
    let row = client
        .query_one("SELECT current_schema()::text", &[])
        .await
        .context("Failed to read current schema")?;
    let schema: Option<String> = row.get(0);
    Ok(schema.unwrap_or_else(|| "public".to_string()))
}

pub async fn get_table_row_count(client: &Client, quoted_table: &str) -> Result<u64> {
    let query = format!("SELECT COUNT(*) FROM {}", quoted_table);
    let row = client
        .query_one(&query, &[])
        .await
        .with_context(|| format!("Failed to count rows in {}", quoted_table))?;
    let count: i64 = row.get(0);
    Ok(count.max(0) as u64)
}

/// Column definition line for CREATE TABLE
///
/// Columns defaulting to a sequence are written as `serial`/`bigserial` so
/// the sequence is recreated with the table.
pub fn column_definition(column: &ColumnInfo, quote: impl Fn(&str) -> String) -> String {
    let default = column.default.as_deref();
    let is_serial = !column.identity
        && !column.generated
        && default.is_some_and(|d| d.starts_with("nextval("));

    let data_type = if is_serial {
        match column.data_type.as_str() {
            "bigint" => "bigserial",
            "smallint" => "smallserial",
            _ => "serial",
        }
        .to_string()
    } else {
        column.data_type.clone()
    };

    let mut line = format!("{} {}", quote(&column.name), data_type);
    if column.generated {
        if let Some(expr) = default {
            line.push_str(&format!(" GENERATED ALWAYS AS ({}) STORED", expr));
        }
    } else if column.identity {
        line.push_str(" GENERATED BY DEFAULT AS IDENTITY");
    } else if let Some(expr) = default.filter(|_| !is_serial) {
        line.push_str(&format!(" DEFAULT {}", expr));
    }
    if column.not_null {
        line.push_str(" NOT NULL");
    }
    line
}
