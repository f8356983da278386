// ABOUTME: SQL INSERT statement encoding for the statement artifact format
// ABOUTME: Renders typed literals and parses them back with heuristic coercion

use crate::row::{RowRecord, Value};
use crate::table_name::{validate_identifier, TableName};
use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

static INSERT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*INSERT\s+INTO\s+(\S+?)\s*\((.*?)\)\s*VALUES\s*\((.*)\)\s*;?\s*$")
        .expect("valid INSERT regex")
});

/// Quote a string as a SQL literal, doubling embedded single quotes
pub fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Fixed-point text for a float that always carries a decimal point
///
/// Rust's `Display` for `f64` never uses exponent notation. Integral values
/// get a `.0` suffix so the decoder reads them back as floats.
pub fn format_float(f: f64) -> String {
    let text = f.to_string();
    if text.contains('.') {
        text
    } else {
        format!("{}.0", text)
    }
}

/// Render a value as a SQL literal for the statement artifact
///
/// - NULL → `NULL`
/// - strings → quoted, `'` doubled
/// - timestamps → quoted `YYYY-MM-DD HH:MM:SS`
/// - JSON → compact JSON text, quoted
/// - floats → fixed-point decimal; non-finite floats are quoted text
/// - integers → decimal
/// - booleans → `1` / `0`
pub fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) if f.is_finite() => format_float(*f),
        Value::Float(f) => quote_string(&f.to_string()),
        Value::String(s) => quote_string(s),
        Value::Timestamp(ts) => quote_string(&Value::format_timestamp(ts)),
        Value::Json(json) => quote_string(&json.to_string()),
    }
}

/// Remove repeated column names, keeping the first occurrence
pub fn dedupe_columns<'a, I>(columns: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = std::collections::HashSet::new();
    columns.into_iter().filter(|c| seen.insert(*c)).collect()
}

/// Check that columns can be written bare into an `INSERT` and read back
///
/// Statement artifacts keep column names unquoted, so every name must pass
/// the same identifier rule the decoder applies. Fails on the first column
/// that does not, naming it.
pub fn check_columns<'a, I>(columns: I) -> Result<()>
where
    I: IntoIterator<Item = &'a str>,
{
    for column in columns {
        validate_identifier(column).with_context(|| {
            format!(
                "Column '{}' cannot be stored in a statement artifact",
                crate::utils::sanitize_identifier(column)
            )
        })?;
    }
    Ok(())
}

/// Encode one `INSERT` statement for the given column list
///
/// Columns are de-duplicated in first-seen order. Columns missing from the
/// row are written as `NULL`.
pub fn encode_insert<'a, I>(table: &TableName, columns: I, row: &RowRecord) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let columns = dedupe_columns(columns);
    let values: Vec<String> = columns
        .iter()
        .map(|c| row.get(c).map(sql_literal).unwrap_or_else(|| "NULL".to_string()))
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES ({});",
        table,
        columns.join(", "),
        values.join(", ")
    )
}

/// Encode one `INSERT` statement using the row's own columns
pub fn encode_row(table: &TableName, row: &RowRecord) -> String {
    encode_insert(table, row.columns(), row)
}

#[derive(Debug, PartialEq)]
enum Token {
    Quoted(String),
    Bare(String),
}

fn tokenize_values(list: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = list.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        match chars.peek() {
            None => {
                if !tokens.is_empty() {
                    bail!("Trailing comma in VALUES list");
                }
                break;
            }
            Some('\'') => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some(ch) = chars.next() {
                    if ch == '\'' {
                        if chars.peek() == Some(&'\'') {
                            chars.next();
                            text.push('\'');
                        } else {
                            closed = true;
                            break;
                        }
                    } else {
                        text.push(ch);
                    }
                }
                if !closed {
                    bail!("Unterminated string literal in VALUES list");
                }
                tokens.push(Token::Quoted(text));
            }
            Some(_) => {
                let mut text = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == ',' {
                        break;
                    }
                    text.push(ch);
                    chars.next();
                }
                let text = text.trim();
                if text.is_empty() {
                    bail!("Empty value in VALUES list");
                }
                tokens.push(Token::Bare(text.to_string()));
            }
        }

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        match chars.next() {
            None => break,
            Some(',') => continue,
            Some(other) => bail!("Unexpected '{}' after value in VALUES list", other),
        }
    }

    Ok(tokens)
}

fn token_to_value(token: Token) -> Value {
    match token {
        Token::Bare(text) if text.eq_ignore_ascii_case("NULL") => Value::Null,
        Token::Bare(text) if text.contains('.') => text
            .parse::<f64>()
            .map(Value::Float)
            .unwrap_or(Value::String(text)),
        Token::Bare(text) => text
            .parse::<i64>()
            .map(Value::Integer)
            .unwrap_or(Value::String(text)),
        Token::Quoted(text) => {
            if let Some(ts) = Value::parse_timestamp(&text) {
                return Value::Timestamp(ts);
            }
            if text.starts_with('{') || text.starts_with('[') {
                if let Ok(json @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) =
                    serde_json::from_str::<serde_json::Value>(&text)
                {
                    return Value::Json(json);
                }
            }
            Value::String(text)
        }
    }
}

/// Decode one `INSERT INTO t (cols) VALUES (vals);` statement
///
/// Returns the table name and the decoded row. Quoted values become
/// timestamps or JSON when they parse as such, bare values with a decimal
/// point become floats, other bare values integers; anything that fails to
/// parse stays text.
pub fn decode_statement(statement: &str) -> Result<(TableName, RowRecord)> {
    let captures = INSERT_PATTERN
        .captures(statement)
        .context("Statement does not match INSERT INTO <table> (<columns>) VALUES (<values>)")?;

    let table = TableName::new(&captures[1]).context("Invalid table name in INSERT")?;

    let columns: Vec<&str> = captures[2].split(',').map(str::trim).collect();
    for column in &columns {
        validate_identifier(column).context("Invalid column name in INSERT")?;
    }

    let tokens = tokenize_values(&captures[3])?;
    if tokens.len() != columns.len() {
        bail!(
            "INSERT into '{}' has {} column(s) but {} value(s)",
            table,
            columns.len(),
            tokens.len()
        );
    }

    let row = columns
        .into_iter()
        .zip(tokens)
        .map(|(column, token)| (column.to_string(), token_to_value(token)))
        .collect();

    Ok((table, row))
}

/// Decode a table artifact made of INSERT statements
///
/// Statements are split on `;` outside quoted spans, so string values may
/// span lines. Rows for any other table are rejected. Errors name the
/// offending statement (1-based).
pub fn decode_table(expected: &TableName, text: &str) -> Result<Vec<RowRecord>> {
    crate::utils::split_sql_statements(text)
        .iter()
        .enumerate()
        .map(|(i, statement)| {
            let (table, row) =
                decode_statement(statement).with_context(|| format!("statement {}", i + 1))?;
            if &table != expected {
                bail!(
                    "statement {}: row targets '{}' but the artifact belongs to '{}'",
                    i + 1,
                    table,
                    expected
                );
            }
            Ok(row)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn users() -> TableName {
        TableName::new("users").unwrap()
    }

    #[test]
    fn test_literals() {
        assert_eq!(sql_literal(&Value::Null), "NULL");
        assert_eq!(sql_literal(&Value::Bool(true)), "1");
        assert_eq!(sql_literal(&Value::Bool(false)), "0");
        assert_eq!(sql_literal(&Value::Integer(-12)), "-12");
        assert_eq!(sql_literal(&Value::Float(2.0)), "2.0");
        assert_eq!(sql_literal(&Value::Float(0.25)), "0.25");
        assert_eq!(sql_literal(&Value::Float(1e21)), "1000000000000000000000.0");
        assert_eq!(sql_literal(&Value::String("it's".into())), "'it''s'");
        assert_eq!(
            sql_literal(&Value::Json(json!({"a": "b'c"}))),
            r#"'{"a":"b''c"}'"#
        );
    }

    #[test]
    fn test_encode_row_statement() {
        let row = RowRecord::new()
            .with("id", Value::Integer(1))
            .with("name", Value::String("Alice".into()))
            .with("bio", Value::Null);
        assert_eq!(
            encode_row(&users(), &row),
            "INSERT INTO users (id, name, bio) VALUES (1, 'Alice', NULL);"
        );
    }

    #[test]
    fn test_encode_insert_dedupes_columns() {
        let row = RowRecord::new()
            .with("id", Value::Integer(1))
            .with("name", Value::String("Bob".into()));
        let stmt = encode_insert(&users(), ["id", "name", "id", "email"], &row);
        assert_eq!(
            stmt,
            "INSERT INTO users (id, name, email) VALUES (1, 'Bob', NULL);"
        );
    }

    #[test]
    fn test_round_trip() {
        let ts = NaiveDate::from_ymd_opt(2023, 12, 31)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap();
        let row = RowRecord::new()
            .with("id", Value::Integer(7))
            .with("note", Value::String("a, b; 'c'\n(d)".into()))
            .with("empty", Value::String(String::new()))
            .with("price", Value::Float(19.5))
            .with("whole", Value::Float(3.0))
            .with("negative", Value::Float(-0.001))
            .with("at", Value::Timestamp(ts))
            .with("doc", Value::Json(json!({"list": [1, 2, {"x": "y, z"}]})))
            .with("missing", Value::Null);

        let stmt = encode_row(&users(), &row);
        let (table, decoded) = decode_statement(&stmt).unwrap();
        assert_eq!(table, users());
        assert_eq!(decoded, row);
    }

    #[test]
    fn test_booleans_decode_as_integers() {
        let row = RowRecord::new().with("flag", Value::Bool(true));
        let (_, decoded) = decode_statement(&encode_row(&users(), &row)).unwrap();
        assert_eq!(decoded.get("flag"), Some(&Value::Integer(1)));
    }

    #[test]
    fn test_unparseable_values_fall_back_to_text() {
        let (_, row) =
            decode_statement("INSERT INTO users (a, b, c) VALUES (1.2.3, abc, '[not json');")
                .unwrap();
        assert_eq!(row.get("a"), Some(&Value::String("1.2.3".into())));
        assert_eq!(row.get("b"), Some(&Value::String("abc".into())));
        assert_eq!(row.get("c"), Some(&Value::String("[not json".into())));
    }

    #[test]
    fn test_malformed_statements_are_rejected() {
        assert!(decode_statement("DELETE FROM users;").is_err());
        assert!(decode_statement("INSERT INTO users (a, b) VALUES (1);").is_err());
        assert!(decode_statement("INSERT INTO users (a) VALUES ('open);").is_err());
        assert!(decode_statement("INSERT INTO users (a) VALUES (1,);").is_err());
        assert!(decode_statement("INSERT INTO users (a b) VALUES (1);").is_err());
    }

    #[test]
    fn test_decode_table_multi_line_and_mismatch() {
        let text = "INSERT INTO users (id, bio) VALUES (1, 'line one;\nline two');\n\
                    INSERT INTO users (id, bio) VALUES (2, NULL);\n";
        let rows = decode_table(&users(), text).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].get("bio"),
            Some(&Value::String("line one;\nline two".into()))
        );

        let other = TableName::new("orders").unwrap();
        let err = decode_table(&other, text).unwrap_err();
        assert!(err.to_string().contains("statement 1"));
    }

    #[test]
    fn test_check_columns_matches_what_the_decoder_accepts() {
        let plain = ["id", "first_name", "order-total", "amount$"];
        assert!(check_columns(plain).is_ok());
        let row: RowRecord = plain
            .iter()
            .map(|c| (c.to_string(), Value::Integer(1)))
            .collect();
        assert!(decode_statement(&encode_row(&users(), &row)).is_ok());

        for bad in ["first name", "total(usd)", "a.b", "it's"] {
            let err = check_columns(["id", bad]).unwrap_err();
            assert!(err.to_string().contains(bad), "{}", err);

            let row = RowRecord::new()
                .with("id", Value::Integer(1))
                .with(bad, Value::String("Ann".into()));
            assert!(decode_statement(&encode_row(&users(), &row)).is_err());
        }
    }

    #[test]
    fn test_empty_artifact_decodes_to_no_rows() {
        assert!(decode_table(&users(), "").unwrap().is_empty());
    }
}
