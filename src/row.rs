// ABOUTME: In-memory row representation shared by dialects and codecs
// ABOUTME: Column order is preserved, equality ignores it

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

/// Fixed textual timestamp form used by both wire formats.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single column value.
///
/// Timestamps are held at second precision; [`Value::timestamp`] truncates.
/// `Json` only ever holds an object or an array, scalars map to the
/// matching variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Timestamp(NaiveDateTime),
    Json(JsonValue),
}

impl Value {
    /// Build a timestamp value, dropping sub-second precision.
    pub fn timestamp(ts: NaiveDateTime) -> Self {
        use chrono::Timelike;
        Value::Timestamp(ts.with_nanosecond(0).unwrap_or(ts))
    }

    /// Map an arbitrary JSON value onto the row domain.
    ///
    /// Objects and arrays stay `Json`; scalars become the matching variant.
    /// Integers outside `i64` fall back to `Float` when they are not `u64`,
    /// and to their decimal text when they are.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Integer(i)
                } else if n.is_u64() {
                    Value::String(n.to_string())
                } else {
                    n.as_f64().map(Value::Float).unwrap_or(Value::Null)
                }
            }
            JsonValue::String(s) => Value::String(s),
            other @ (JsonValue::Array(_) | JsonValue::Object(_)) => Value::Json(other),
        }
    }

    pub fn format_timestamp(ts: &NaiveDateTime) -> String {
        ts.format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT).ok()
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// One table row: column name to value, in column order.
///
/// Equality is order-insensitive, so a record that went through a format
/// which reorders keys still compares equal.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowRecord {
    values: IndexMap<String, Value>,
}

impl RowRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a column. A repeated column keeps its first position and the
    /// latest value.
    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        self.values.insert(column.into(), value);
    }

    pub fn with(mut self, column: impl Into<String>, value: Value) -> Self {
        self.insert(column, value);
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True if both records have the same column names in the same order.
    pub fn same_columns(&self, other: &RowRecord) -> bool {
        self.values.len() == other.values.len()
            && self.values.keys().zip(other.values.keys()).all(|(a, b)| a == b)
    }
}

impl FromIterator<(String, Value)> for RowRecord {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn test_equality_ignores_column_order() {
        let a = RowRecord::new()
            .with("id", Value::Integer(1))
            .with("name", Value::String("Alice".into()));
        let b = RowRecord::new()
            .with("name", Value::String("Alice".into()))
            .with("id", Value::Integer(1));
        assert_eq!(a, b);
        assert!(!a.same_columns(&b));
    }

    #[test]
    fn test_columns_preserve_insertion_order() {
        let row = RowRecord::new()
            .with("z", Value::Null)
            .with("a", Value::Null)
            .with("z", Value::Integer(3));
        assert_eq!(row.columns().collect::<Vec<_>>(), vec!["z", "a"]);
        assert_eq!(row.get("z"), Some(&Value::Integer(3)));
    }

    #[test]
    fn test_timestamp_truncates_subseconds() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_micro_opt(3, 4, 5, 678_900)
            .unwrap();
        let value = Value::timestamp(ts);
        match value {
            Value::Timestamp(t) => assert_eq!(Value::format_timestamp(&t), "2024-01-02 03:04:05"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_from_json_maps_scalars() {
        assert_eq!(Value::from_json(json!(null)), Value::Null);
        assert_eq!(Value::from_json(json!(true)), Value::Bool(true));
        assert_eq!(Value::from_json(json!(-7)), Value::Integer(-7));
        assert_eq!(Value::from_json(json!(1.5)), Value::Float(1.5));
        assert_eq!(
            Value::from_json(json!(u64::MAX)),
            Value::String(u64::MAX.to_string())
        );
        assert_eq!(Value::from_json(json!([1, 2])), Value::Json(json!([1, 2])));
    }
}
