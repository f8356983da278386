// ABOUTME: PostgreSQL row to row record conversion
// ABOUTME: Decodes natively supported types and reads everything else as text

use crate::row::{RowRecord, Value};
use anyhow::{Context, Result};
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio_postgres::Row;

/// Base type names decoded directly; other columns are selected as `::text`
pub const NATIVE_TYPES: &[&str] = &[
    "bool",
    "int2",
    "int4",
    "int8",
    "oid",
    "float4",
    "float8",
    "text",
    "varchar",
    "bpchar",
    "name",
    "bytea",
    "json",
    "jsonb",
    "timestamp",
    "timestamptz",
];

pub fn is_native_type(type_name: &str) -> bool {
    NATIVE_TYPES.contains(&type_name)
}

/// Convert column `idx` of a row
///
/// - bytea that is not UTF-8 → base64 text
/// - timestamptz → UTC timestamp
/// - json/jsonb scalars map to the matching scalar value
pub fn postgres_value_to_value(row: &Row, idx: usize) -> Result<Value> {
    let column = &row.columns()[idx];
    let value = match column.type_().name() {
        "bool" => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        "int2" => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| Value::Integer(v as i64)),
        "int4" => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| Value::Integer(v as i64)),
        "int8" => row.try_get::<_, Option<i64>>(idx)?.map(Value::Integer),
        "oid" => row
            .try_get::<_, Option<u32>>(idx)?
            .map(|v| Value::Integer(v as i64)),
        "float4" => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| Value::Float(v as f64)),
        "float8" => row.try_get::<_, Option<f64>>(idx)?.map(Value::Float),
        "bytea" => row.try_get::<_, Option<Vec<u8>>>(idx)?.map(|bytes| {
            match String::from_utf8(bytes) {
                Ok(text) => Value::String(text),
                Err(e) => Value::String(
                    base64::engine::general_purpose::STANDARD.encode(e.into_bytes()),
                ),
            }
        }),
        "json" | "jsonb" => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(Value::from_json),
        "timestamp" => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(Value::timestamp),
        "timestamptz" => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|ts| Value::timestamp(ts.naive_utc())),
        _ => row.try_get::<_, Option<String>>(idx)?.map(Value::String),
    };

    Ok(value.unwrap_or(Value::Null))
}

pub fn postgres_row_to_record(row: &Row) -> Result<RowRecord> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            postgres_value_to_value(row, idx)
                .with_context(|| format!("Failed to convert column '{}'", column.name()))
                .map(|value| (column.name().to_string(), value))
        })
        .collect()
}
