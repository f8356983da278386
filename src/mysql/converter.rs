// ABOUTME: MySQL value to row value conversion
// ABOUTME: Uses column type metadata to interpret text-protocol bytes without losing data

use crate::row::{RowRecord, Value};
use base64::Engine;
use chrono::{NaiveDate, NaiveDateTime};
use mysql_async::consts::ColumnType;
use mysql_async::{Row, Value as MySqlValue};

/// Convert one MySQL value into a row value
///
/// The text protocol delivers every non-NULL value as bytes, so the column
/// type decides how they are read back:
/// - Integer types → integers (unsigned values beyond `i64` stay text)
/// - FLOAT/DOUBLE → floats
/// - DECIMAL → text, to preserve precision
/// - DATETIME/TIMESTAMP → timestamps at second precision
/// - DATE/TIME → text
/// - JSON → embedded JSON
/// - Binary data that is not UTF-8 → base64 text
pub fn mysql_value_to_value(value: MySqlValue, column_type: ColumnType) -> Value {
    match value {
        MySqlValue::NULL => Value::Null,
        MySqlValue::Bytes(bytes) => bytes_to_value(bytes, column_type),
        MySqlValue::Int(i) => Value::Integer(i),
        MySqlValue::UInt(u) => i64::try_from(u)
            .map(Value::Integer)
            .unwrap_or_else(|_| Value::String(u.to_string())),
        MySqlValue::Float(f) => Value::Float(f as f64),
        MySqlValue::Double(d) => Value::Float(d),
        MySqlValue::Date(year, month, day, hour, minute, second, micro) => {
            if column_type == ColumnType::MYSQL_TYPE_DATE {
                return Value::String(format!("{:04}-{:02}-{:02}", year, month, day));
            }
            NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
                .and_then(|d| d.and_hms_micro_opt(hour as u32, minute as u32, second as u32, micro))
                .map(Value::timestamp)
                .unwrap_or_else(|| {
                    // Zero dates such as 0000-00-00 have no calendar value
                    Value::String(format!(
                        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                        year, month, day, hour, minute, second
                    ))
                })
        }
        MySqlValue::Time(negative, days, hours, minutes, seconds, micros) => {
            let total_hours = days * 24 + hours as u32;
            let sign = if negative { "-" } else { "" };
            let mut text = format!("{}{:02}:{:02}:{:02}", sign, total_hours, minutes, seconds);
            if micros > 0 {
                text.push_str(&format!(".{:06}", micros));
            }
            Value::String(text)
        }
    }
}

fn bytes_to_value(bytes: Vec<u8>, column_type: ColumnType) -> Value {
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => {
            return Value::String(
                base64::engine::general_purpose::STANDARD.encode(e.into_bytes()),
            )
        }
    };

    match column_type {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_YEAR => text
            .parse::<i64>()
            .map(Value::Integer)
            .unwrap_or(Value::String(text)),
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => text
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or(Value::String(text)),
        ColumnType::MYSQL_TYPE_DATETIME
        | ColumnType::MYSQL_TYPE_DATETIME2
        | ColumnType::MYSQL_TYPE_TIMESTAMP
        | ColumnType::MYSQL_TYPE_TIMESTAMP2 => {
            NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S%.f")
                .map(Value::timestamp)
                .unwrap_or(Value::String(text))
        }
        ColumnType::MYSQL_TYPE_JSON => match serde_json::from_str(&text) {
            Ok(json) => Value::from_json(json),
            Err(_) => Value::String(text),
        },
        _ => Value::String(text),
    }
}

/// Convert a MySQL row into a row record keyed by column name
pub fn mysql_row_to_record(row: &Row) -> RowRecord {
    row.columns_ref()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value: MySqlValue = row.get(idx).unwrap_or(MySqlValue::NULL);
            (
                column.name_str().to_string(),
                mysql_value_to_value(value, column.column_type()),
            )
        })
        .collect()
}
