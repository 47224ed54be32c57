//! Predicate-driven SELECT, UPDATE and DELETE builders.
//!
//! Builders consume and return `self`, so a partially built query can be
//! cloned and extended without affecting the builder it came from.

use std::fmt;
use std::sync::Arc;

use rusqlite::{Connection, Row};

use crate::error::{DbError, Result};
use crate::ident::{quote_column_ref, quote_identifier, RawExpr};
use crate::schema::{EntityMapping, Mapper, Record};
use crate::value::{store_value, Value};

use super::filter::{Columns, Filter, Where};
use super::CompiledCommand;

/// Materializes one result row.
pub type RowMapper<T> = Arc<dyn Fn(&Row<'_>) -> Result<T> + Send + Sync>;

/// Resolves a field or column name of `R` to its quoted column; other names
/// (aliases, `table.column`, `*`) are quoted as given.
fn column_ref<R>(mapping: &EntityMapping<R>, name: &str) -> String {
    match mapping.table().column(name) {
        Some(column) => quote_identifier(&column.column_name),
        None => quote_column_ref(name),
    }
}

/// Predicate arguments on mapped columns are coerced to the column's storage
/// class, so a mismatch fails at compile time instead of matching nothing.
/// Converted columns compare against the converter's storage value.
impl<R> Columns for EntityMapping<R> {
    fn quote(&self, name: &str) -> String {
        column_ref(self, name)
    }

    fn bind(&self, name: &str, value: Value) -> Result<Value> {
        match self.table().column(name) {
            Some(column) => store_value(column, value),
            None => Ok(value),
        }
    }
}

#[derive(Debug, Clone)]
enum Projection {
    Column(String),
    Expr(RawExpr),
}

/// SELECT builder over the table of `R`.
pub struct Select<R> {
    mapping: Arc<EntityMapping<R>>,
    distinct: bool,
    projection: Vec<Projection>,
    filter: Filter,
    group_by: Vec<String>,
    having: Filter,
    order_by: Vec<(String, bool)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl<R> Clone for Select<R> {
    fn clone(&self) -> Self {
        Self {
            mapping: Arc::clone(&self.mapping),
            distinct: self.distinct,
            projection: self.projection.clone(),
            filter: self.filter.clone(),
            group_by: self.group_by.clone(),
            having: self.having.clone(),
            order_by: self.order_by.clone(),
            limit: self.limit,
            offset: self.offset,
        }
    }
}

impl<R> fmt::Debug for Select<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Select")
            .field("table", &self.mapping.table().table_name)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

impl<R: Record> Select<R> {
    /// Starts `SELECT * FROM <table of R>`.
    pub fn from(mapper: &Mapper) -> Result<Self> {
        Ok(Self::with_mapping(mapper.mapping::<R>()?))
    }

    pub(crate) fn with_mapping(mapping: Arc<EntityMapping<R>>) -> Self {
        Self {
            mapping,
            distinct: false,
            projection: Vec::new(),
            filter: Filter::new(),
            group_by: Vec::new(),
            having: Filter::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    /// Replaces `*` with the given columns.
    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.projection
            .extend(columns.iter().map(|c| Projection::Column(c.to_string())));
        self
    }

    /// Adds a trusted projection expression such as `COUNT(*) AS total`.
    pub fn aggregate(mut self, expr: RawExpr) -> Self {
        self.projection.push(Projection::Expr(expr));
        self
    }

    pub fn group_by(mut self, columns: &[&str]) -> Self {
        self.group_by.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    /// Predicates on grouped rows.
    pub fn having(mut self, filter: Filter) -> Self {
        self.having = filter;
        self
    }

    pub fn order_by(mut self, column: &str) -> Self {
        self.order_by.push((column.to_string(), false));
        self
    }

    pub fn order_by_desc(mut self, column: &str) -> Self {
        self.order_by.push((column.to_string(), true));
        self
    }

    pub fn limit(mut self, count: u64) -> Self {
        self.limit = Some(count);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// The SQL and arguments this builder currently describes.
    pub fn to_command(&self) -> Result<CompiledCommand> {
        let mapping = &*self.mapping;
        let resolve = |name: &str| column_ref(mapping, name);
        let mut sql = String::from("SELECT ");
        let mut args = Vec::new();

        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        if self.projection.is_empty() {
            sql.push('*');
        } else {
            let projected: Vec<String> = self
                .projection
                .iter()
                .map(|p| match p {
                    Projection::Column(name) => resolve(name.as_str()),
                    Projection::Expr(expr) => expr.as_str().to_string(),
                })
                .collect();
            sql.push_str(&projected.join(", "));
        }
        sql.push_str(" FROM ");
        sql.push_str(&quote_identifier(mapping.table_name()));

        if !self.filter.is_empty() {
            sql.push_str(" WHERE ");
            self.filter.render(mapping, &mut sql, &mut args)?;
        }
        if !self.group_by.is_empty() {
            let grouped: Vec<String> =
                self.group_by.iter().map(|c| resolve(c.as_str())).collect();
            sql.push_str(" GROUP BY ");
            sql.push_str(&grouped.join(", "));
        }
        if !self.having.is_empty() {
            sql.push_str(" HAVING ");
            self.having.render(mapping, &mut sql, &mut args)?;
        }
        if !self.order_by.is_empty() {
            let ordering: Vec<String> = self
                .order_by
                .iter()
                .map(|(c, desc)| {
                    let direction = if *desc { "DESC" } else { "ASC" };
                    format!("{} {direction}", resolve(c.as_str()))
                })
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&ordering.join(", "));
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => {
                sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"))
            }
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }
        sql.push(';');
        CompiledCommand::new(sql, args)
    }

    /// Compiles to a query that materializes whole records of `R`.
    pub fn compile(self) -> Result<SelectQuery<R>> {
        let command = self.to_command()?;
        let mapping = self.mapping;
        Ok(SelectQuery::new(
            command,
            Arc::new(move |row: &Row<'_>| mapping.from_row(row)),
        ))
    }

    /// Compiles with a custom row mapper, e.g. for projections and aggregates.
    pub fn compile_with<T>(
        self,
        mapper: impl Fn(&Row<'_>) -> Result<T> + Send + Sync + 'static,
    ) -> Result<SelectQuery<T>> {
        Ok(SelectQuery::new(self.to_command()?, Arc::new(mapper)))
    }
}

impl<R> Where for Select<R> {
    fn filter_mut(&mut self) -> &mut Filter {
        &mut self.filter
    }
}

/// A compiled SELECT plus the function that turns rows into `T`.
pub struct SelectQuery<T> {
    command: CompiledCommand,
    mapper: RowMapper<T>,
}

impl<T> Clone for SelectQuery<T> {
    fn clone(&self) -> Self {
        Self {
            command: self.command.clone(),
            mapper: Arc::clone(&self.mapper),
        }
    }
}

impl<T> fmt::Debug for SelectQuery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectQuery")
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

impl<T> SelectQuery<T> {
    pub fn new(command: CompiledCommand, mapper: RowMapper<T>) -> Self {
        Self { command, mapper }
    }

    pub fn command(&self) -> &CompiledCommand {
        &self.command
    }

    pub fn query(&self, conn: &Connection) -> Result<Vec<T>> {
        self.command.query_rows(conn, |row| (self.mapper)(row))
    }
}

/// `UPDATE <table> SET ... WHERE ...` for rows matching a filter.
pub struct UpdateWhere<R> {
    mapping: Arc<EntityMapping<R>>,
    assignments: Vec<(String, Value)>,
    filter: Filter,
}

impl<R> Clone for UpdateWhere<R> {
    fn clone(&self) -> Self {
        Self {
            mapping: Arc::clone(&self.mapping),
            assignments: self.assignments.clone(),
            filter: self.filter.clone(),
        }
    }
}

impl<R: Record> UpdateWhere<R> {
    pub fn new(mapper: &Mapper) -> Result<Self> {
        Ok(Self::with_mapping(mapper.mapping::<R>()?))
    }

    pub(crate) fn with_mapping(mapping: Arc<EntityMapping<R>>) -> Self {
        Self {
            mapping,
            assignments: Vec::new(),
            filter: Filter::new(),
        }
    }

    /// Assigns a column, named by column or field name.
    pub fn set(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.assignments.push((column.to_string(), value.into()));
        self
    }

    pub fn compile(&self) -> Result<CompiledCommand> {
        let mapping = &*self.mapping;
        if self.assignments.is_empty() {
            return Err(DbError::Mapping(format!(
                "update of {} sets no columns",
                mapping.table_name()
            )));
        }

        let mut sets = Vec::with_capacity(self.assignments.len());
        let mut args = Vec::with_capacity(self.assignments.len());
        for (name, value) in &self.assignments {
            let column = mapping.column_by_name(name)?;
            sets.push(format!("{} = ?", quote_identifier(&column.column_name)));
            args.push(store_value(column, value.clone())?);
        }

        let mut sql = format!(
            "UPDATE {} SET {}",
            quote_identifier(mapping.table_name()),
            sets.join(", ")
        );
        if !self.filter.is_empty() {
            sql.push_str(" WHERE ");
            self.filter.render(mapping, &mut sql, &mut args)?;
        }
        sql.push(';');
        CompiledCommand::new(sql, args)
    }
}

impl<R> Where for UpdateWhere<R> {
    fn filter_mut(&mut self) -> &mut Filter {
        &mut self.filter
    }
}

/// `DELETE FROM <table> WHERE ...`; without predicates every row is deleted.
pub struct DeleteWhere<R> {
    mapping: Arc<EntityMapping<R>>,
    filter: Filter,
}

impl<R> Clone for DeleteWhere<R> {
    fn clone(&self) -> Self {
        Self {
            mapping: Arc::clone(&self.mapping),
            filter: self.filter.clone(),
        }
    }
}

impl<R: Record> DeleteWhere<R> {
    pub fn new(mapper: &Mapper) -> Result<Self> {
        Ok(Self::with_mapping(mapper.mapping::<R>()?))
    }

    pub(crate) fn with_mapping(mapping: Arc<EntityMapping<R>>) -> Self {
        Self {
            mapping,
            filter: Filter::new(),
        }
    }

    pub fn compile(&self) -> Result<CompiledCommand> {
        let mapping = &*self.mapping;
        let mut sql = format!("DELETE FROM {}", quote_identifier(mapping.table_name()));
        let mut args = Vec::new();
        if !self.filter.is_empty() {
            sql.push_str(" WHERE ");
            self.filter.render(mapping, &mut sql, &mut args)?;
        }
        sql.push(';');
        CompiledCommand::new(sql, args)
    }
}

impl<R> Where for DeleteWhere<R> {
    fn filter_mut(&mut self) -> &mut Filter {
        &mut self.filter
    }
}
