// ABOUTME: MySQL database introspection through INFORMATION_SCHEMA
// ABOUTME: Lists tables and views, columns, keys and CREATE statements

use anyhow::{Context, Result};
use mysql_async::{prelude::*, Conn, Row};
use once_cell::sync::Lazy;
use regex::Regex;

/// List all tables and views in a MySQL database
///
/// Returns names in alphabetical order. System schemas are never included
/// because the query is scoped to `db_name`.
///
/// # Examples
///
/// ```no_run
/// # use seren_snapshot::mysql::reader::list_tables;
/// # async fn example(conn: &mut mysql_async::Conn) -> anyhow::Result<()> {
/// let tables = list_tables(conn, "shop").await?;
/// println!("Found {} tables", tables.len());
/// # Ok(())
/// # }
/// ```
pub async fn list_tables(conn: &mut Conn, db_name: &str) -> Result<Vec<String>> {
    tracing::debug!("Listing tables from MySQL database '{}'", db_name);

    let query = r#"
        SELECT TABLE_NAME
        FROM INFORMATION_SCHEMA.TABLES
        WHERE TABLE_SCHEMA = ?
        AND TABLE_TYPE IN ('BASE TABLE', 'VIEW')
        ORDER BY TABLE_NAME
    "#;

    let tables: Vec<String> = conn
        .exec(query, (db_name,))
        .await
        .with_context(|| format!("Failed to list tables from database '{}'", db_name))?;

    tracing::debug!("Found {} table(s) in database '{}'", tables.len(), db_name);

    Ok(tables)
}

pub async fn table_type(conn: &mut Conn, db_name: &str, table: &str) -> Result<Option<String>> {
    let query = r#"
        SELECT TABLE_TYPE
        FROM INFORMATION_SCHEMA.TABLES
        WHERE TABLE_SCHEMA = ?
        AND TABLE_NAME = ?
    "#;

    conn.exec_first(query, (db_name, table))
        .await
        .with_context(|| format!("Failed to read table type of '{}'", table))
}

/// Column names in ordinal order, skipping generated columns
///
/// Generated columns cannot be written by INSERT, so they are left out of
/// both the SELECT on export and the INSERT on import.
pub async fn get_column_names(conn: &mut Conn, db_name: &str, table: &str) -> Result<Vec<String>> {
    let query = r#"
        SELECT COLUMN_NAME
        FROM INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = ?
        AND TABLE_NAME = ?
        AND EXTRA NOT LIKE '%VIRTUAL GENERATED%'
        AND EXTRA NOT LIKE '%STORED GENERATED%'
        AND EXTRA NOT LIKE '%PERSISTENT GENERATED%'
        ORDER BY ORDINAL_POSITION
    "#;

    conn.exec(query, (db_name, table))
        .await
        .with_context(|| format!("Failed to get column names for table '{}.{}'", db_name, table))
}

pub async fn get_primary_key(conn: &mut Conn, db_name: &str, table: &str) -> Result<Vec<String>> {
    let query = r#"
        SELECT COLUMN_NAME
        FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
        WHERE TABLE_SCHEMA = ?
        AND TABLE_NAME = ?
        AND CONSTRAINT_NAME = 'PRIMARY'
        ORDER BY ORDINAL_POSITION
    "#;

    conn.exec(query, (db_name, table))
        .await
        .with_context(|| format!("Failed to get primary key of '{}'", table))
}

/// Tables referenced by foreign keys of `table` within the same database
pub async fn get_referenced_tables(
    conn: &mut Conn,
    db_name: &str,
    table: &str,
) -> Result<Vec<String>> {
    let query = r#"
        SELECT REFERENCED_TABLE_NAME
        FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE
        WHERE TABLE_SCHEMA = ?
        AND TABLE_NAME = ?
        AND REFERENCED_TABLE_SCHEMA = ?
        AND REFERENCED_TABLE_NAME IS NOT NULL
        ORDER BY CONSTRAINT_NAME, ORDINAL_POSITION
    "#;

    let mut targets: Vec<String> = conn
        .exec(query, (db_name, table, db_name))
        .await
        .with_context(|| format!("Failed to read foreign keys of '{}'", table))?;

    let mut seen = std::collections::HashSet::new();
    targets.retain(|t| seen.insert(t.clone()));
    Ok(targets)
}

static DEFINER_CLAUSE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"DEFINER\s*=\s*\S+\s+").expect("valid definer regex"));

/// CREATE statement from `SHOW CREATE TABLE`
///
/// Works for views too; their `DEFINER` clause is removed so the DDL can be
/// applied by a different account.
pub async fn show_create(conn: &mut Conn, quoted_table: &str) -> Result<String> {
    let query = format!("SHOW CREATE TABLE {}", quoted_table);
    let row: Option<Row> = conn
        .query_first(&query)
        .await
        .with_context(|| format!("Failed to run '{}'", query))?;

    let ddl: String = row
        .and_then(|r| r.get(1))
        .with_context(|| format!("'{}' returned no DDL", query))?;

    Ok(DEFINER_CLAUSE.replace(&ddl, "").into_owned())
}

pub async fn get_table_row_count(conn: &mut Conn, quoted_table: &str) -> Result<u64> {
    let query = format!("SELECT COUNT(*) FROM {}", quoted_table);

    let count: Option<u64> = conn
        .query_first(&query)
        .await
        .with_context(|| format!("Failed to count rows in {}", quoted_table))?;

    Ok(count.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definer_clause_removed() {
        let ddl = "CREATE ALGORITHM=UNDEFINED DEFINER=`root`@`%` SQL SECURITY DEFINER VIEW `v` AS select 1";
        assert_eq!(
            DEFINER_CLAUSE.replace(ddl, ""),
            "CREATE ALGORITHM=UNDEFINED SQL SECURITY DEFINER VIEW `v` AS select 1"
        );
    }
}
