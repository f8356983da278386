// ABOUTME: Validated table identifier shared by every stage of a run
// ABOUTME: Rejects quoting characters so names are safe in artifacts and file names

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum identifier length accepted by both MySQL (64) and PostgreSQL (63 + 1).
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// Validate a table or column identifier.
///
/// Identifiers must be non-empty, at most 64 characters, and consist of
/// alphanumeric characters, `_`, `$` or `-`. Quotes, whitespace, statement
/// delimiters and path separators are rejected, which keeps the identifier
/// safe to embed unquoted in statement artifacts and in artifact file names.
///
/// # Examples
///
/// ```
/// # use seren_snapshot::table_name::validate_identifier;
/// assert!(validate_identifier("users").is_ok());
/// assert!(validate_identifier("order-items").is_ok());
/// assert!(validate_identifier("users; DROP TABLE users;").is_err());
/// assert!(validate_identifier("users'--").is_err());
/// ```
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("Identifier cannot be empty");
    }

    if name.chars().count() > MAX_IDENTIFIER_LEN {
        bail!(
            "Identifier too long (max {} characters): {}",
            MAX_IDENTIFIER_LEN,
            crate::utils::sanitize_identifier(name)
        );
    }

    for ch in name.chars() {
        if !ch.is_alphanumeric() && !matches!(ch, '_' | '$' | '-') {
            bail!(
                "Invalid identifier '{}': contains invalid character '{}'",
                crate::utils::sanitize_identifier(name),
                ch.escape_default()
            );
        }
    }

    Ok(())
}

/// A validated, immutable table name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TableName(String);

impl TableName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_identifier(&name)?;
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TableName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for TableName {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.0
    }
}

impl AsRef<str> for TableName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Parse a list of raw names, failing on the first invalid one.
pub fn parse_table_names<I, S>(names: I) -> Result<Vec<TableName>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|name| TableName::new(name.as_ref().trim()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_table_names() {
        for name in ["users", "user_events", "UserEvents2024", "_private", "price$", "a-b"] {
            assert!(TableName::new(name).is_ok(), "'{}' should be accepted", name);
        }
    }

    #[test]
    fn test_invalid_table_names() {
        let invalid = [
            "",
            "users; DROP TABLE users;",
            "users'--",
            "\"users\"",
            "`users`",
            "users events",
            "schema.users",
            "../etc/passwd",
            "users\n",
        ];
        for name in invalid {
            assert!(TableName::new(name).is_err(), "'{}' should be rejected", name);
        }
        assert!(TableName::new("a".repeat(65)).is_err());
        assert!(TableName::new("a".repeat(64)).is_ok());
    }

    #[test]
    fn test_serde_validates_on_deserialize() {
        let ok: TableName = serde_json::from_str("\"orders\"").unwrap();
        assert_eq!(ok.as_str(), "orders");
        assert!(serde_json::from_str::<TableName>("\"bad name\"").is_err());
        assert_eq!(serde_json::to_string(&ok).unwrap(), "\"orders\"");
    }

    #[test]
    fn test_parse_table_names_trims() {
        let names = parse_table_names([" orders", "customers "]).unwrap();
        assert_eq!(names[0].as_str(), "orders");
        assert_eq!(names[1].as_str(), "customers");
    }
}
