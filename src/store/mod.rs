//! The concurrent store executor.
//!
//! # Intention
//!
//! - One dedicated writer thread owns the only writable connection; every
//!   write runs inside its own IMMEDIATE transaction, in submission order.
//! - A fixed set of reader threads serves reads from a pool of query-only
//!   connections. A full read queue runs the work on the submitting thread.
//! - Every submission yields a [`DbFuture`] that resolves exactly once.
//!
//! # Architectural Boundaries
//!
//! - Connections never leave the executor; work receives a borrowed
//!   `rusqlite::Connection` for the duration of one call.
//! - Schema creation and upgrade run once per open, before any submitted work.

mod completion;
mod config;
mod database;

pub use completion::DbFuture;
pub use config::DbConfig;
pub use database::Database;

use rusqlite::Connection;

use crate::error::Result;
use crate::migration::Migrations;
use crate::schema::Mapper;

/// Lifecycle of a [`Database`]; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbState {
    Unopened,
    Open,
    Closing,
    Closed,
}

/// The application's schema: its version and how to build or upgrade it.
pub trait DbSchema: Send + Sync + 'static {
    /// Target schema version, at least 1.
    fn version(&self) -> u32;

    /// Extra connection setup, run on the writable connection before create/upgrade.
    fn on_configure(&self, _conn: &Connection) -> Result<()> {
        Ok(())
    }

    /// Builds the schema in an empty database.
    fn on_create(&self, conn: &Connection, mapper: &Mapper) -> Result<()>;

    /// Moves an existing database from `from` to `to`.
    fn on_upgrade(&self, conn: &Connection, mapper: &Mapper, from: u32, to: u32) -> Result<()> {
        self.migrations().apply(conn, mapper, from, to).map(|_| ())
    }

    fn migrations(&self) -> Migrations {
        Migrations::new()
    }
}

/// Observes write transactions in the order the writer runs them.
pub trait TransactionObserver: Send + Sync {
    fn on_begin(&self, _id: u64) {}

    fn on_commit(&self, _id: u64) {}

    fn on_rollback(&self, _id: u64) {}
}
