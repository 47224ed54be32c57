//! Identifier quoting and validation.
//!
//! Every table and column name that reaches generated SQL passes through
//! [`quote_identifier`] or [`quote_column_ref`]. Caller supplied SQL fragments
//! (aggregates, computed columns) travel as [`RawExpr`] and are inserted
//! verbatim; their safety is the caller's responsibility.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{DbError, Result};

static IDENTIFIER: OnceLock<Regex> = OnceLock::new();

fn identifier_pattern() -> &'static Regex {
    IDENTIFIER.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is a valid regex")
    })
}

/// Returns the trimmed identifier if it matches `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_identifier(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    if identifier_pattern().is_match(trimmed) {
        Ok(trimmed)
    } else {
        Err(DbError::InvalidIdentifier(name.to_string()))
    }
}

/// Wraps an identifier in backticks, doubling any embedded backtick.
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.trim().replace('`', "``"))
}

/// Quotes a column reference, handling `*` and dotted `table.column` forms.
pub fn quote_column_ref(name: &str) -> String {
    let column = name.trim();
    if column == "*" {
        return column.to_string();
    }
    match column.split_once('.') {
        Some((table, col)) if !table.is_empty() && !col.is_empty() => {
            let col = if col == "*" {
                col.to_string()
            } else {
                quote_identifier(col)
            };
            format!("{}.{}", quote_identifier(table), col)
        }
        _ => quote_identifier(column),
    }
}

/// A trusted SQL expression, inserted into generated SQL without quoting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExpr(String);

impl RawExpr {
    pub fn new(sql: impl Into<String>) -> Self {
        Self(sql.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Marks `sql` as a trusted-caller expression.
pub fn raw_expression(sql: impl Into<String>) -> RawExpr {
    RawExpr::new(sql)
}
