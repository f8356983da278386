// ABOUTME: JSON encoding of rows for the structured artifact format
// ABOUTME: One object per row, timestamps as fixed text, base64 text undone on read

use super::base64::decode_base64_text;
use crate::row::{RowRecord, Value};
use anyhow::{bail, Context, Result};
use serde_json::{Map, Number, Value as JsonValue};

/// Convert a row value to JSON
///
/// - NULL → null
/// - Booleans, integers → JSON booleans/numbers
/// - Finite floats → JSON numbers, non-finite floats → strings
/// - Timestamps → `YYYY-MM-DD HH:MM:SS` strings
/// - JSON objects/arrays → embedded as-is
pub fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Integer(i) => JsonValue::Number((*i).into()),
        Value::Float(f) => Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(f.to_string())),
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Timestamp(ts) => JsonValue::String(Value::format_timestamp(ts)),
        Value::Json(json) => json.clone(),
    }
}

/// Convert a JSON value read from an artifact back to a row value
///
/// Strings go through [`decode_base64_text`] first; a string that was
/// base64-decoded stays a string. Otherwise a string in the fixed timestamp
/// form becomes a timestamp.
///
/// This is lossy: a stored value that is itself valid base64 of printable
/// text (a token such as `dGVzdA==`) comes back decoded.
pub fn json_to_value(json: JsonValue) -> Value {
    match json {
        JsonValue::String(s) => {
            if let Some(decoded) = decode_base64_text(&s) {
                Value::String(decoded)
            } else if let Some(ts) = Value::parse_timestamp(&s) {
                Value::Timestamp(ts)
            } else {
                Value::String(s)
            }
        }
        other => Value::from_json(other),
    }
}

/// Encode a row as a compact JSON object
pub fn encode_row(row: &RowRecord) -> String {
    let obj: Map<String, JsonValue> = row
        .iter()
        .map(|(column, value)| (column.to_string(), value_to_json(value)))
        .collect();
    JsonValue::Object(obj).to_string()
}

/// Decode one JSON object into a row
pub fn decode_row(fragment: &str) -> Result<RowRecord> {
    let json: JsonValue =
        serde_json::from_str(fragment).context("Row fragment is not valid JSON")?;
    object_to_row(json)
}

fn object_to_row(json: JsonValue) -> Result<RowRecord> {
    match json {
        JsonValue::Object(obj) => Ok(obj
            .into_iter()
            .map(|(column, value)| (column, json_to_value(value)))
            .collect()),
        other => bail!("Expected a JSON object per row, found {}", json_kind(&other)),
    }
}

fn json_kind(json: &JsonValue) -> &'static str {
    match json {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// Assemble encoded row objects into a table artifact
///
/// The artifact is a JSON array with one compact object per line, so
/// identical input always yields identical bytes.
pub fn assemble_table(encoded_rows: &[String]) -> String {
    if encoded_rows.is_empty() {
        return "[]\n".to_string();
    }
    format!("[\n{}\n]\n", encoded_rows.join(",\n"))
}

/// Decode a whole table artifact
///
/// Returns the rows in artifact order. Errors name the offending row
/// (1-based) in their message.
pub fn decode_table(text: &str) -> Result<Vec<RowRecord>> {
    let json: JsonValue = serde_json::from_str(text).context("Artifact is not valid JSON")?;
    let items = match json {
        JsonValue::Array(items) => items,
        other => bail!("Expected a JSON array of rows, found {}", json_kind(&other)),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| object_to_row(item).with_context(|| format!("row {}", i + 1)))
        .collect()
}
