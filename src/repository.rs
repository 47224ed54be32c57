//! Type-bound data access over a [`Database`].
//!
//! # Intention
//!
//! - Every operation compiles its command on the calling thread, so mapping,
//!   identifier and argument defects are returned immediately as `Err`.
//! - What happens inside the store is reported through the returned
//!   [`DbFuture`]: writes run in their own transaction, reads do not.
//! - Update and delete of a single record report "nothing matched" as
//!   [`DbError::NotFound`] rather than silent success.

use std::collections::HashMap;
use std::sync::Arc;

use crate::command::{CompiledCommand, Compiler, DeleteWhere, Select, SelectQuery, UpdateWhere};
use crate::error::{DbError, Result};
use crate::schema::{EntityMapping, Record};
use crate::store::{Database, DbFuture};
use crate::value::Value;

/// CRUD and query access for records of type `R`.
pub struct Repository<R> {
    db: Database,
    mapping: Arc<EntityMapping<R>>,
}

impl<R> Clone for Repository<R> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            mapping: Arc::clone(&self.mapping),
        }
    }
}

impl<R: Record> Repository<R> {
    /// Resolves the mapping of `R` up front; configuration errors surface here.
    pub fn new(db: &Database) -> Result<Self> {
        Ok(Self {
            db: db.clone(),
            mapping: db.mapper().mapping::<R>()?,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn mapping(&self) -> &EntityMapping<R> {
        &self.mapping
    }

    fn compiler(&self) -> Compiler<'_> {
        Compiler::new(self.db.mapper())
    }

    /// Inserts the record and returns it with its identity field set to the new row id.
    pub fn insert(&self, mut record: R) -> Result<DbFuture<R>> {
        let command = self.compiler().insert(&record)?;
        let mapping = Arc::clone(&self.mapping);
        self.db.write(move |conn, _| {
            command.execute(conn)?;
            mapping.assign_identity(&mut record, conn.last_insert_rowid())?;
            Ok(record)
        })
    }

    pub fn update(&self, record: &R) -> Result<DbFuture<()>> {
        let command = self.compiler().update(record)?;
        self.write_one(command)
    }

    pub fn delete(&self, record: &R) -> Result<DbFuture<()>> {
        let command = self.compiler().delete(record)?;
        self.write_one(command)
    }

    /// Deletes by a single-column key.
    pub fn delete_by_id(&self, id: impl Into<Value>) -> Result<DbFuture<()>> {
        self.delete_by_key(vec![id.into()])
    }

    /// Deletes by a full (possibly composite) key in ordinal order.
    pub fn delete_by_key(&self, key: Vec<Value>) -> Result<DbFuture<()>> {
        let command = self.compiler().delete_by_key::<R>(&key)?;
        self.write_one(command)
    }

    /// A builder for `UPDATE ... WHERE ...` on this table.
    pub fn updater(&self) -> UpdateWhere<R> {
        UpdateWhere::with_mapping(Arc::clone(&self.mapping))
    }

    /// Runs a filtered update and returns the number of rows changed.
    pub fn update_where(&self, update: &UpdateWhere<R>) -> Result<DbFuture<usize>> {
        let command = update.compile()?;
        self.db.write(move |conn, _| command.execute(conn))
    }

    /// A builder for `DELETE ... WHERE ...` on this table.
    pub fn deleter(&self) -> DeleteWhere<R> {
        DeleteWhere::with_mapping(Arc::clone(&self.mapping))
    }

    /// Runs a filtered delete and returns the number of rows removed.
    pub fn delete_where(&self, delete: &DeleteWhere<R>) -> Result<DbFuture<usize>> {
        let command = delete.compile()?;
        self.db.write(move |conn, _| command.execute(conn))
    }

    /// Looks up by the first primary-key column; a missing row is [`DbError::NotFound`].
    pub fn get_by_id(&self, id: impl Into<Value>) -> Result<DbFuture<R>> {
        let command = self.compiler().get_by_id::<R>(id)?;
        let mapping = Arc::clone(&self.mapping);
        self.db.read(move |conn, _| {
            let found = command.query_rows(conn, |row| mapping.from_row(row))?;
            found.into_iter().next().ok_or_else(|| {
                DbError::NotFound(format!(
                    "no {} row for {:?}",
                    mapping.table_name(),
                    command.args()
                ))
            })
        })
    }

    /// Like [`Repository::get_by_id`] but a missing row is `None`.
    pub fn find_by_id(&self, id: impl Into<Value>) -> Result<DbFuture<Option<R>>> {
        let command = self.compiler().get_by_id::<R>(id)?;
        let mapping = Arc::clone(&self.mapping);
        self.db.read(move |conn, _| {
            let found = command.query_rows(conn, |row| mapping.from_row(row))?;
            Ok(found.into_iter().next())
        })
    }

    /// A SELECT builder on this table.
    pub fn select(&self) -> Select<R> {
        Select::with_mapping(Arc::clone(&self.mapping))
    }

    pub fn select_all(&self) -> Result<DbFuture<Vec<R>>> {
        self.select_with(self.select())
    }

    pub fn select_with(&self, select: Select<R>) -> Result<DbFuture<Vec<R>>> {
        self.query(select.compile()?)
    }

    /// Runs a compiled query with its own row mapper.
    pub fn query<T: Send + 'static>(&self, query: SelectQuery<T>) -> Result<DbFuture<Vec<T>>> {
        self.db.read(move |conn, _| query.query(conn))
    }

    /// Runs caller-written SQL and returns each row keyed by column name.
    pub fn raw_query(
        &self,
        sql: &str,
        args: Vec<Value>,
    ) -> Result<DbFuture<Vec<HashMap<String, Value>>>> {
        let command = CompiledCommand::new(sql, args)?;
        self.db.read(move |conn, _| {
            command.query_rows(conn, |row| {
                let statement: &rusqlite::Statement<'_> = row.as_ref();
                (0..statement.column_count())
                    .map(|i| -> Result<(String, Value)> {
                        let name = statement.column_name(i)?.to_string();
                        Ok((name, row.get::<_, Value>(i)?))
                    })
                    .collect()
            })
        })
    }

    /// Executes a single-row write; zero affected rows is [`DbError::NotFound`].
    fn write_one(&self, command: CompiledCommand) -> Result<DbFuture<()>> {
        let table = self.mapping.table_name().to_string();
        self.db.write(move |conn, _| match command.execute(conn)? {
            0 => Err(DbError::NotFound(format!(
                "no {table} row matches {:?}",
                command.args()
            ))),
            _ => Ok(()),
        })
    }
}
