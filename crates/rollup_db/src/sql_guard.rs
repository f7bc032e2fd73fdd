//! Read-only SQL guard utilities.
//!
//! Configuration queries are operator-authored text. They are checked here before
//! the engine wraps or runs them.

use std::error::Error;
use std::fmt;

const ALLOWED_PREFIXES: &[&str] = &["SELECT", "WITH"];
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "ATTACH", "DETACH",
    "PRAGMA", "VACUUM", "REINDEX", "UPSERT",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlGuardError {
    message: String,
}

impl SqlGuardError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for SqlGuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for SqlGuardError {}

/// Validate that a SQL query is a single read-only SELECT/WITH statement.
pub fn validate_read_only(sql: &str) -> Result<(), SqlGuardError> {
    let sanitized = sanitize_sql(sql);
    let trimmed = sanitized.trim();
    if trimmed.is_empty() {
        return Err(SqlGuardError::new("Query is empty"));
    }

    validate_single_statement(&sanitized)?;

    let first = first_keyword(&sanitized)
        .ok_or_else(|| SqlGuardError::new("Query must start with SELECT or WITH"))?;
    if !ALLOWED_PREFIXES.contains(&first.as_str()) {
        return Err(SqlGuardError::new("Query must start with SELECT or WITH"));
    }

    let tokens = tokens_upper(&sanitized);
    for (idx, token) in tokens.iter().enumerate() {
        // `replace(...)` is a string function; `REPLACE INTO` is a write.
        let is_write_replace =
            token == "REPLACE" && tokens.get(idx + 1).is_some_and(|next| next == "INTO");
        if is_write_replace || FORBIDDEN_KEYWORDS.contains(&token.as_str()) {
            return Err(SqlGuardError::new(format!(
                "Query contains forbidden keyword: {}",
                token
            )));
        }
    }

    Ok(())
}

/// Wrap a read-only query as a derived table: `SELECT * FROM (<sql>) AS <alias>`.
///
/// A trailing semicolon (and anything after it, which can only be a comment) is
/// dropped. The inner query sits on its own lines so a trailing `--` comment cannot
/// swallow the wrapper. `suffix` is appended verbatim after the alias.
pub fn wrap_as_subquery(sql: &str, alias: &str, suffix: &str) -> String {
    let inner = strip_trailing_semicolon(sql);
    if suffix.trim().is_empty() {
        format!("SELECT * FROM (\n{}\n) AS {}", inner, alias)
    } else {
        format!("SELECT * FROM (\n{}\n) AS {} {}", inner, alias, suffix.trim())
    }
}

fn strip_trailing_semicolon(sql: &str) -> &str {
    let sanitized = sanitize_sql(sql);
    let code = sanitized.trim_end();
    match code.strip_suffix(';') {
        // Sanitizing keeps byte offsets, so the index is valid in `sql`.
        Some(before) => sql[..before.len()].trim(),
        None => sql.trim(),
    }
}

fn validate_single_statement(sql: &str) -> Result<(), SqlGuardError> {
    let mut semicolons = sql.match_indices(';').map(|(idx, _)| idx);
    let first = semicolons.next();
    if semicolons.next().is_some() {
        return Err(SqlGuardError::new("Multiple statements are not allowed"));
    }
    if let Some(idx) = first {
        if sql[idx + 1..].chars().any(|c| !c.is_whitespace()) {
            return Err(SqlGuardError::new("Multiple statements are not allowed"));
        }
    }
    Ok(())
}

fn first_keyword(sql: &str) -> Option<String> {
    let mut current = String::new();
    for ch in sql.chars() {
        if ch.is_ascii_alphabetic() {
            current.push(ch);
        } else if !current.is_empty() {
            break;
        }
    }
    if current.is_empty() {
        None
    } else {
        Some(current.to_ascii_uppercase())
    }
}

fn tokens_upper(sql: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in sql.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            current.push(ch);
        } else if !current.is_empty() {
            tokens.push(current.to_ascii_uppercase());
            current.clear();
        }
    }
    if !current.is_empty() {
        tokens.push(current.to_ascii_uppercase());
    }
    tokens
}

/// Blank out comments, string literals and quoted identifiers, keeping byte offsets.
fn sanitize_sql(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut in_single = false;
    let mut in_double = false;
    let mut in_line_comment = false;
    let mut in_block_comment = false;

    while let Some(ch) = chars.next() {
        if in_line_comment {
            if ch == '\n' {
                in_line_comment = false;
            }
            blank(&mut out, ch);
            continue;
        }
        if in_block_comment {
            if ch == '*' && matches!(chars.peek(), Some('/')) {
                chars.next();
                in_block_comment = false;
                out.push_str("  ");
                continue;
            }
            blank(&mut out, ch);
            continue;
        }
        if in_single {
            if ch == '\'' {
                if matches!(chars.peek(), Some('\'')) {
                    chars.next();
                    out.push_str("  ");
                    continue;
                }
                in_single = false;
            }
            blank(&mut out, ch);
            continue;
        }
        if in_double {
            if ch == '"' {
                in_double = false;
            }
            blank(&mut out, ch);
            continue;
        }

        match ch {
            '-' if matches!(chars.peek(), Some('-')) => {
                chars.next();
                in_line_comment = true;
                out.push_str("  ");
            }
            '/' if matches!(chars.peek(), Some('*')) => {
                chars.next();
                in_block_comment = true;
                out.push_str("  ");
            }
            '\'' => {
                in_single = true;
                blank(&mut out, ch);
            }
            '"' => {
                in_double = true;
                blank(&mut out, ch);
            }
            _ => out.push(ch),
        }
    }

    out
}

fn blank(out: &mut String, ch: char) {
    out.extend(std::iter::repeat(' ').take(ch.len_utf8()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_read_only_basic() {
        assert!(validate_read_only("SELECT * FROM transaction_line").is_ok());
        assert!(validate_read_only("WITH cte AS (SELECT 1) SELECT * FROM cte").is_ok());
        assert!(validate_read_only("INSERT INTO transaction_line VALUES (1)").is_err());
        assert!(validate_read_only("DELETE FROM transaction_line").is_err());
        assert!(validate_read_only("DROP TABLE transaction_line").is_err());
        assert!(
            validate_read_only("UPDATE aggregation_configuration SET end_date = NULL").is_err()
        );
        assert!(validate_read_only("PRAGMA foreign_keys = OFF").is_err());
        assert!(validate_read_only("EXPLAIN SELECT 1").is_err());
    }

    #[test]
    fn test_validate_read_only_comments_and_literals() {
        assert!(validate_read_only("SELECT 1 -- DELETE FROM x").is_ok());
        assert!(
            validate_read_only("SELECT 1 /* UPDATE */ FROM promotion_transaction_line").is_ok()
        );
        assert!(validate_read_only("SELECT 'DROP TABLE x' AS note").is_ok());
        assert!(validate_read_only(r#"SELECT t.transaction_id FROM "transaction" t"#).is_ok());
    }

    #[test]
    fn test_identifiers_containing_keywords_are_allowed() {
        assert!(
            validate_read_only("SELECT created_datetime, last_updated_datetime FROM t").is_ok()
        );
    }

    #[test]
    fn test_validate_read_only_multi_statement() {
        assert!(validate_read_only("SELECT 1; DROP TABLE x").is_err());
        assert!(validate_read_only("SELECT 1;\nSELECT 2").is_err());
        assert!(validate_read_only("SELECT 1; ").is_ok());
    }

    #[test]
    fn test_empty_query_rejected() {
        let err = validate_read_only("   -- nothing here").unwrap_err();
        assert_eq!(err.to_string(), "Query is empty");
    }

    #[test]
    fn test_write_statements_behind_cte_rejected() {
        let rejected = [
            "WITH c AS (SELECT 1) REPLACE INTO aggregation_configuration (file_name_prefix) \
             SELECT 'X' FROM c",
            "WITH c AS (SELECT 1) INSERT OR REPLACE INTO t SELECT * FROM c",
            "WITH c AS (SELECT 1) SELECT * FROM c; REPLACE INTO t VALUES (1)",
        ];
        for sql in rejected {
            assert!(validate_read_only(sql).is_err(), "{}", sql);
        }
        assert!(validate_read_only(
            "SELECT replace(store_of_intent, '0', '') FROM transaction_line"
        )
        .is_ok());
    }

    #[test]
    fn test_wrap_as_subquery() {
        assert_eq!(
            wrap_as_subquery("SELECT a FROM t;", "_q", ""),
            "SELECT * FROM (\nSELECT a FROM t\n) AS _q"
        );
        assert_eq!(
            wrap_as_subquery("SELECT a FROM t", "_q", " WHERE a > 1 "),
            "SELECT * FROM (\nSELECT a FROM t\n) AS _q WHERE a > 1"
        );
    }

    #[test]
    fn test_wrap_keeps_trailing_comments_inside() {
        assert_eq!(
            wrap_as_subquery("SELECT a FROM t -- note", "_q", "WHERE a > 1"),
            "SELECT * FROM (\nSELECT a FROM t -- note\n) AS _q WHERE a > 1"
        );
        assert_eq!(
            wrap_as_subquery("SELECT 'é;' AS a FROM t; -- note", "_q", ""),
            "SELECT * FROM (\nSELECT 'é;' AS a FROM t\n) AS _q"
        );
        assert_eq!(
            wrap_as_subquery("SELECT a FROM t /* x; */", "_q", ""),
            "SELECT * FROM (\nSELECT a FROM t /* x; */\n) AS _q"
        );
    }
}
