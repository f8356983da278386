// ABOUTME: Utility functions shared by the codec, pipeline and dialects
// ABOUTME: Provides statement splitting, identifier sanitizing and retry logic

use anyhow::Result;
use std::time::Duration;

/// Sanitize an identifier (table name, column name, etc.) for display
///
/// Removes control characters and limits length to prevent log injection attacks
/// and ensure readable error messages.
///
/// **Note**: This is for display purposes only. SQL safety comes from
/// [`crate::table_name::validate_identifier`] and dialect quoting.
///
/// # Examples
///
/// ```
/// # use seren_snapshot::utils::sanitize_identifier;
/// assert_eq!(sanitize_identifier("normal_table"), "normal_table");
/// assert_eq!(sanitize_identifier("table\x00name"), "tablename");
/// assert_eq!(sanitize_identifier("table\nname"), "tablename");
///
/// // Length limit
/// let long_name = "a".repeat(200);
/// assert_eq!(sanitize_identifier(&long_name).len(), 100);
/// ```
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Split SQL text into individual statements on `;`
///
/// Semicolons inside single-quoted strings, double-quoted identifiers and
/// backtick-quoted identifiers do not end a statement. Doubled quote
/// characters (`''`) inside a quoted span are treated as an escaped quote.
/// Returned statements are trimmed, do not include the trailing `;`, and
/// empty statements are dropped. Text after the last `;` is returned as a
/// final statement if it is not blank.
///
/// # Examples
///
/// ```
/// # use seren_snapshot::utils::split_sql_statements;
/// let stmts = split_sql_statements("INSERT INTO t (a) VALUES ('x;y');\nDROP TABLE u;");
/// assert_eq!(stmts, vec!["INSERT INTO t (a) VALUES ('x;y')", "DROP TABLE u"]);
/// ```
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        match quote {
            Some(q) => {
                current.push(ch);
                if ch == q {
                    if chars.peek() == Some(&q) {
                        // Doubled quote stays inside the span
                        if let Some(next) = chars.next() {
                            current.push(next);
                        }
                    } else {
                        quote = None;
                    }
                }
            }
            None => match ch {
                '\'' | '"' | '`' => {
                    quote = Some(ch);
                    current.push(ch);
                }
                ';' => {
                    let trimmed = current.trim();
                    if !trimmed.is_empty() {
                        statements.push(trimmed.to_string());
                    }
                    current.clear();
                }
                _ => current.push(ch),
            },
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(trimmed.to_string());
    }

    statements
}

/// Retry a function with exponential backoff
///
/// Executes an async operation with automatic retry on failure. Each retry doubles
/// the delay (exponential backoff) to handle transient failures gracefully.
///
/// # Arguments
///
/// * `operation` - Async function to retry (FnMut returning Future\<Output = Result\<T\>\>)
/// * `max_retries` - Maximum number of retry attempts (0 = no retries, just initial attempt)
/// * `initial_delay` - Delay before first retry (doubles each subsequent retry)
///
/// # Returns
///
/// Returns the successful result or the last error after all retries exhausted.
pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    max_retries: u32,
    initial_delay: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = initial_delay;
    let mut last_error = None;

    for attempt in 0..=max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                last_error = Some(e);

                if attempt < max_retries {
                    tracing::warn!(
                        "Operation failed (attempt {}/{}), retrying in {:?}...",
                        attempt + 1,
                        max_retries + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Operation failed after retries")))
}
