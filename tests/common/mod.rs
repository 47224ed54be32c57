// Shared record types and database fixtures for the integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use rust_sqlite_repo::{
    Compiler, Database, DbConfig, DbSchema, Mapper, Nullable, Record, Result, TableBuilder,
    TextEnum, UnixMillis,
};
use tempfile::TempDir;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimpleEntity {
    pub id: i64,
    pub description: String,
    pub value: f64,
}

impl Record for SimpleEntity {
    fn describe(t: &mut TableBuilder<'_, Self>) {
        t.name("simple_table");
        t.field("id", |r| &r.id, |r| &mut r.id)
            .ordinal(1)
            .primary_key()
            .identity();
        t.field("description", |r| &r.description, |r| &mut r.description)
            .ordinal(2)
            .not_null();
        t.field("value", |r| &r.value, |r| &mut r.value).ordinal(3);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompositeEntity {
    pub key_part1: i64,
    pub key_part2: String,
    pub payload: Option<String>,
}

impl Record for CompositeEntity {
    fn describe(t: &mut TableBuilder<'_, Self>) {
        t.name("composite_table");
        t.field("key_part1", |r| &r.key_part1, |r| &mut r.key_part1)
            .ordinal(1)
            .primary_key();
        t.field("key_part2", |r| &r.key_part2, |r| &mut r.key_part2)
            .ordinal(2)
            .primary_key();
        t.field("payload", |r| &r.payload, |r| &mut r.payload)
            .ordinal(3);
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Todo {
    pub id: i64,
    pub title: String,
    pub done: bool,
    pub priority: i32,
    pub due: Option<NaiveDate>,
}

impl Record for Todo {
    fn describe(t: &mut TableBuilder<'_, Self>) {
        t.name("todos");
        t.field("id", |r| &r.id, |r| &mut r.id)
            .ordinal(1)
            .primary_key()
            .identity();
        t.field("title", |r| &r.title, |r| &mut r.title)
            .column("todo_title")
            .ordinal(2)
            .not_null();
        t.field("done", |r| &r.done, |r| &mut r.done).ordinal(3);
        t.field("priority", |r| &r.priority, |r| &mut r.priority);
        t.field("due", |r| &r.due, |r| &mut r.due);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EventKind {
    #[default]
    Created,
    Updated,
    Deleted,
}

impl TextEnum for EventKind {
    fn name(&self) -> &'static str {
        match self {
            EventKind::Created => "Created",
            EventKind::Updated => "Updated",
            EventKind::Deleted => "Deleted",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "Created" => Some(EventKind::Created),
            "Updated" => Some(EventKind::Updated),
            "Deleted" => Some(EventKind::Deleted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Event {
    pub id: i64,
    pub kind: EventKind,
    pub happened_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub payload: Vec<u8>,
}

impl Record for Event {
    fn describe(t: &mut TableBuilder<'_, Self>) {
        t.name("events");
        t.field("id", |r| &r.id, |r| &mut r.id)
            .ordinal(1)
            .primary_key()
            .identity();
        t.enum_field("kind", |r| &r.kind, |r| &mut r.kind)
            .ordinal(2)
            .not_null();
        t.converted::<UnixMillis>("happened_at", |r| &r.happened_at, |r| &mut r.happened_at)
            .ordinal(3)
            .not_null();
        t.converted::<Nullable<UnixMillis>>(
            "acknowledged_at",
            |r| &r.acknowledged_at,
            |r| &mut r.acknowledged_at,
        )
        .ordinal(4);
        t.field("payload", |r| &r.payload, |r| &mut r.payload).ordinal(5);
    }
}

/// Creates every test table at version 1.
pub struct TestSchema;

impl DbSchema for TestSchema {
    fn version(&self) -> u32 {
        1
    }

    fn on_create(&self, conn: &Connection, mapper: &Mapper) -> Result<()> {
        create_tables(conn, mapper)
    }
}

pub fn create_tables(conn: &Connection, mapper: &Mapper) -> Result<()> {
    let compiler = Compiler::new(mapper);
    compiler.create_table::<SimpleEntity>()?.execute(conn)?;
    compiler.create_table::<CompositeEntity>()?.execute(conn)?;
    compiler.create_table::<Todo>()?.execute(conn)?;
    compiler.create_table::<Event>()?.execute(conn)?;
    compiler
        .create_index::<Todo>("idx_todos_title", true, &["title"])?
        .execute(conn)?;
    Ok(())
}

pub fn db_path(dir: &TempDir) -> std::path::PathBuf {
    dir.path().join("test.db")
}

pub fn open_with(dir: &TempDir, config: impl FnOnce(DbConfig) -> DbConfig) -> Database {
    Database::new(
        config(DbConfig::new(db_path(dir))),
        TestSchema,
        Arc::new(Mapper::default()),
    )
    .expect("valid test configuration")
}

pub fn open(dir: &TempDir) -> Database {
    open_with(dir, |c| c)
}

pub fn todo(title: &str, priority: i32) -> Todo {
    Todo {
        title: title.to_string(),
        priority,
        ..Todo::default()
    }
}
