//! WHERE/HAVING predicate lists.

use crate::error::Result;
use crate::ident::{quote_column_ref, RawExpr};
use crate::value::Value;

/// Resolves predicate columns while a filter renders.
pub(crate) trait Columns {
    fn quote(&self, name: &str) -> String;

    /// Prepares a comparison argument for binding against `name`.
    fn bind(&self, name: &str, value: Value) -> Result<Value>;
}

/// Column names quoted as given, arguments bound unchanged.
struct Unmapped;

impl Columns for Unmapped {
    fn quote(&self, name: &str) -> String {
        quote_column_ref(name)
    }

    fn bind(&self, _: &str, value: Value) -> Result<Value> {
        Ok(value)
    }
}

/// Comparison applied to a single column.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOperator {
    Equal(Value),
    NotEqual(Value),
    GreaterThan(Value),
    GreaterThanOrEqual(Value),
    LessThan(Value),
    LessThanOrEqual(Value),
    Like(String),
    In(Vec<Value>),
    IsNull,
    IsNotNull,
}

/// How a predicate joins the one before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Conjunction {
    #[default]
    And,
    Or,
}

impl Conjunction {
    fn keyword(self) -> &'static str {
        match self {
            Conjunction::And => " AND ",
            Conjunction::Or => " OR ",
        }
    }
}

#[derive(Debug, Clone)]
enum Term {
    Condition { column: String, op: QueryOperator },
    Raw { expr: RawExpr, args: Vec<Value> },
    Group(Filter),
}

/// An ordered predicate list; predicates join with AND unless preceded by `or()`.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    terms: Vec<(Conjunction, Term)>,
    pending: Conjunction,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    fn push(&mut self, term: Term) {
        let joiner = std::mem::take(&mut self.pending);
        self.terms.push((joiner, term));
    }

    /// Renders the filter on its own, quoting column names as given.
    pub fn to_sql(&self) -> Result<(String, Vec<Value>)> {
        let mut sql = String::new();
        let mut args = Vec::new();
        self.render(&Unmapped, &mut sql, &mut args)?;
        Ok((sql, args))
    }

    /// Appends the SQL for this filter, resolving columns through `columns`.
    pub(crate) fn render(
        &self,
        columns: &dyn Columns,
        sql: &mut String,
        args: &mut Vec<Value>,
    ) -> Result<()> {
        let mut first = true;
        for (joiner, term) in &self.terms {
            if let Term::Group(inner) = term {
                if inner.is_empty() {
                    continue;
                }
            }
            if !first {
                sql.push_str(joiner.keyword());
            }
            first = false;
            match term {
                Term::Condition { column, op } => render_condition(columns, column, op, sql, args)?,
                Term::Raw { expr, args: bound } => {
                    sql.push('(');
                    sql.push_str(expr.as_str());
                    sql.push(')');
                    args.extend(bound.iter().cloned());
                }
                Term::Group(inner) => {
                    sql.push('(');
                    inner.render(columns, sql, args)?;
                    sql.push(')');
                }
            }
        }
        Ok(())
    }
}

fn render_condition(
    columns: &dyn Columns,
    name: &str,
    op: &QueryOperator,
    sql: &mut String,
    args: &mut Vec<Value>,
) -> Result<()> {
    let column = columns.quote(name);
    let (operator, value) = match op {
        QueryOperator::Equal(v) => ("=", v.clone()),
        QueryOperator::NotEqual(v) => ("!=", v.clone()),
        QueryOperator::GreaterThan(v) => (">", v.clone()),
        QueryOperator::GreaterThanOrEqual(v) => (">=", v.clone()),
        QueryOperator::LessThan(v) => ("<", v.clone()),
        QueryOperator::LessThanOrEqual(v) => ("<=", v.clone()),
        // patterns stay text whatever the column stores
        QueryOperator::Like(pattern) => {
            sql.push_str(&format!("{column} LIKE ?"));
            args.push(Value::Text(pattern.clone()));
            return Ok(());
        }
        QueryOperator::In(values) => {
            let marks = vec!["?"; values.len()].join(", ");
            sql.push_str(&format!("{column} IN ({marks})"));
            for value in values {
                args.push(columns.bind(name, value.clone())?);
            }
            return Ok(());
        }
        QueryOperator::IsNull => {
            sql.push_str(&format!("{column} IS NULL"));
            return Ok(());
        }
        QueryOperator::IsNotNull => {
            sql.push_str(&format!("{column} IS NOT NULL"));
            return Ok(());
        }
    };
    sql.push_str(&format!("{column} {operator} ?"));
    args.push(columns.bind(name, value)?);
    Ok(())
}

/// Fluent predicate methods shared by every filtered builder.
pub trait Where: Sized {
    fn filter_mut(&mut self) -> &mut Filter;

    /// Joins the next predicate with AND (the default).
    fn and(mut self) -> Self {
        self.filter_mut().pending = Conjunction::And;
        self
    }

    /// Joins the next predicate with OR.
    fn or(mut self) -> Self {
        self.filter_mut().pending = Conjunction::Or;
        self
    }

    fn condition(mut self, column: &str, op: QueryOperator) -> Self {
        self.filter_mut().push(Term::Condition {
            column: column.to_string(),
            op,
        });
        self
    }

    fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.condition(column, QueryOperator::Equal(value.into()))
    }

    fn ne(self, column: &str, value: impl Into<Value>) -> Self {
        self.condition(column, QueryOperator::NotEqual(value.into()))
    }

    fn gt(self, column: &str, value: impl Into<Value>) -> Self {
        self.condition(column, QueryOperator::GreaterThan(value.into()))
    }

    fn ge(self, column: &str, value: impl Into<Value>) -> Self {
        self.condition(column, QueryOperator::GreaterThanOrEqual(value.into()))
    }

    fn lt(self, column: &str, value: impl Into<Value>) -> Self {
        self.condition(column, QueryOperator::LessThan(value.into()))
    }

    fn le(self, column: &str, value: impl Into<Value>) -> Self {
        self.condition(column, QueryOperator::LessThanOrEqual(value.into()))
    }

    fn like(self, column: &str, pattern: &str) -> Self {
        self.condition(column, QueryOperator::Like(pattern.to_string()))
    }

    fn in_list<V: Into<Value>>(self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.condition(
            column,
            QueryOperator::In(values.into_iter().map(Into::into).collect()),
        )
    }

    fn is_null(self, column: &str) -> Self {
        self.condition(column, QueryOperator::IsNull)
    }

    fn is_not_null(self, column: &str) -> Self {
        self.condition(column, QueryOperator::IsNotNull)
    }

    /// A trusted SQL fragment with its own `?` arguments, wrapped in parentheses.
    fn raw<V: Into<Value>>(mut self, fragment: RawExpr, args: impl IntoIterator<Item = V>) -> Self {
        self.filter_mut().push(Term::Raw {
            expr: fragment,
            args: args.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// A parenthesised sub-filter.
    fn group(mut self, inner: Filter) -> Self {
        self.filter_mut().push(Term::Group(inner));
        self
    }
}

impl Where for Filter {
    fn filter_mut(&mut self) -> &mut Filter {
        self
    }
}
