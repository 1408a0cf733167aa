// ABOUTME: Utility functions for identifier validation, quoting, and retries
// ABOUTME: Every table and column name from a peer passes through validate_identifier

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, TransferError};

/// Longest identifier accepted in generated SQL.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate a table or column name before it is placed in generated SQL.
///
/// Accepts `^[A-Za-z_][A-Za-z0-9_]*$` up to 63 characters. Anything else is
/// rejected with `TransferError::InvalidIdentifier`, which is what keeps a
/// crafted table name from reaching a query.
///
/// # Examples
///
/// ```
/// # use table_mirror::utils::validate_identifier;
/// assert!(validate_identifier("users").is_ok());
/// assert!(validate_identifier("_private").is_ok());
/// assert!(validate_identifier("123abc").is_err());
/// assert!(validate_identifier("users; DROP TABLE users;").is_err());
/// ```
pub fn validate_identifier(identifier: &str) -> Result<()> {
    let Some(first_char) = identifier.chars().next() else {
        return Err(TransferError::InvalidIdentifier(
            "identifier cannot be empty".to_string(),
        ));
    };

    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(TransferError::InvalidIdentifier(format!(
            "'{}' exceeds maximum length of {} characters (got {})",
            sanitize_identifier(identifier),
            MAX_IDENTIFIER_LEN,
            identifier.len()
        )));
    }

    if !first_char.is_ascii_alphabetic() && first_char != '_' {
        return Err(TransferError::InvalidIdentifier(format!(
            "'{}' must start with a letter or underscore",
            sanitize_identifier(identifier)
        )));
    }

    for (i, c) in identifier.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' {
            return Err(TransferError::InvalidIdentifier(format!(
                "'{}' contains invalid character '{}' at position {}",
                sanitize_identifier(identifier),
                if c.is_control() {
                    format!("\\x{:02x}", c as u32)
                } else {
                    c.to_string()
                },
                i
            )));
        }
    }

    Ok(())
}

/// Strip control characters and cap length so peer-supplied names are safe to log.
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Quote a SQLite identifier (table, column).
///
/// Assumes the identifier has already been validated. Escapes embedded quotes
/// and wraps the identifier in double quotes.
pub fn quote_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('"');
    for ch in identifier.chars() {
        if ch == '"' {
            quoted.push('"');
        }
        quoted.push(ch);
    }
    quoted.push('"');
    quoted
}

/// Quote and comma-join a list of validated identifiers.
pub fn quote_ident_list(identifiers: &[String]) -> String {
    identifiers
        .iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Retry an async operation with exponential backoff.
///
/// Only errors for which `should_retry` returns true are retried; anything
/// else is returned immediately. Returns the last error once `max_retries`
/// additional attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    max_retries: u32,
    initial_delay: Duration,
    should_retry: impl Fn(&E) -> bool,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = initial_delay;
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < max_retries && should_retry(&e) => {
                attempt += 1;
                tracing::warn!(
                    "Operation failed (attempt {}/{}): {}, retrying in {:?}...",
                    attempt,
                    max_retries + 1,
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_validate_identifier_accepts_plain_names() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("order_items").is_ok());
        assert!(validate_identifier("_hidden").is_ok());
        assert!(validate_identifier("Table2").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_injection() {
        for bad in [
            "",
            "1users",
            "users; DROP TABLE users;",
            "users\"",
            "my-table",
            "tab\x00le",
            "users'--",
        ] {
            let err = validate_identifier(bad).unwrap_err();
            assert!(matches!(err, TransferError::InvalidIdentifier(_)), "{bad}");
        }
    }

    #[test]
    fn test_validate_identifier_length_limit() {
        assert!(validate_identifier(&"a".repeat(63)).is_ok());
        assert!(validate_identifier(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_sanitize_identifier() {
        assert_eq!(sanitize_identifier("normal_table"), "normal_table");
        assert_eq!(sanitize_identifier("table\nname"), "tablename");
        assert_eq!(sanitize_identifier(&"a".repeat(200)).len(), 100);
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(
            quote_ident_list(&["a".to_string(), "b".to_string()]),
            "\"a\", \"b\""
        );
    }

    #[tokio::test]
    async fn test_retry_with_backoff_stops_on_permanent_error() {
        let calls = AtomicU32::new(0);
        let result: std::result::Result<(), TransferError> = retry_with_backoff(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TransferError::InvalidCode)
            },
            3,
            Duration::from_millis(1),
            TransferError::is_transient,
        )
        .await;
        assert_eq!(result.unwrap_err(), TransferError::InvalidCode);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(TransferError::ConnectionTimeout)
                } else {
                    Ok(n)
                }
            },
            3,
            Duration::from_millis(1),
            TransferError::is_transient,
        )
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
