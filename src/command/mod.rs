//! SQL command compilation.
//!
//! # Intention
//!
//! - Every command is compiled into an immutable [`CompiledCommand`]: SQL text
//!   plus its positional arguments. Values are always bound, never spliced.
//! - Placeholder and argument counts are checked when the command is built,
//!   so a malformed command never reaches the store.
//!
//! # Architectural Boundaries
//!
//! - [`Compiler`] builds DDL and record-level DML from an [`crate::schema::EntityMapping`].
//! - [`Select`], [`UpdateWhere`] and [`DeleteWhere`] are the predicate-driven builders.
//! - Execution against a connection is a thin adapter over `rusqlite`.

mod compiler;
mod filter;
mod select;

pub use compiler::Compiler;
pub use filter::{Conjunction, Filter, QueryOperator, Where};
pub use select::{DeleteWhere, RowMapper, Select, SelectQuery, UpdateWhere};

use rusqlite::{params_from_iter, Connection, Row};
use tracing::debug;

use crate::error::{DbError, Result};
use crate::value::Value;

/// SQL text with its bound arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCommand {
    sql: String,
    args: Vec<Value>,
}

impl CompiledCommand {
    /// Builds a command, rejecting a placeholder/argument count mismatch.
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Result<Self> {
        let sql = sql.into();
        let placeholders = count_placeholders(&sql);
        if placeholders != args.len() {
            return Err(DbError::Argument(format!(
                "statement has {placeholders} placeholders but {} arguments were bound: {sql}",
                args.len()
            )));
        }
        Ok(Self { sql, args })
    }

    /// A statement without arguments.
    pub fn ddl(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Runs the statement and returns the number of affected rows.
    pub fn execute(&self, conn: &Connection) -> Result<usize> {
        debug!(sql = %self.sql, args = self.args.len(), "execute");
        Ok(conn.execute(&self.sql, params_from_iter(self.args.iter()))?)
    }

    /// Runs a query and maps every row through `map`.
    pub fn query_rows<T>(
        &self,
        conn: &Connection,
        mut map: impl FnMut(&Row<'_>) -> Result<T>,
    ) -> Result<Vec<T>> {
        debug!(sql = %self.sql, args = self.args.len(), "query");
        let mut statement = conn.prepare_cached(&self.sql)?;
        let mut rows = statement.query(params_from_iter(self.args.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(map(row)?);
        }
        Ok(out)
    }
}

/// Counts positional placeholders outside quoted literals and identifiers.
///
/// `?NNN` counts once per occurrence.
pub(crate) fn count_placeholders(sql: &str) -> usize {
    let mut count = 0;
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => {
                // doubled quote is an escape and stays inside the literal
                if chars.peek() == Some(&q) {
                    chars.next();
                } else {
                    quote = None;
                }
            }
            Some(_) => {}
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '?' => {
                    count += 1;
                    while chars.peek().is_some_and(char::is_ascii_digit) {
                        chars.next();
                    }
                }
                _ => {}
            },
        }
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_inside_quotes_are_ignored() {
        assert_eq!(count_placeholders("SELECT * FROM t WHERE a = ? AND b = ?"), 2);
        assert_eq!(count_placeholders("SELECT '?' FROM t WHERE a = ?"), 1);
        assert_eq!(count_placeholders("SELECT `we?rd` FROM t"), 0);
        assert_eq!(count_placeholders("SELECT 'it''s ?' , ?"), 1);
    }

    #[test]
    fn numbered_placeholders_count_once_each() {
        assert_eq!(count_placeholders("a = ?1 OR b = ?12"), 2);
    }

    #[test]
    fn argument_mismatch_is_rejected() {
        let err = CompiledCommand::new("SELECT ? + ?", vec![Value::Integer(1)]).unwrap_err();
        assert!(matches!(err, DbError::Argument(_)));
    }
}
