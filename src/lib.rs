//! Typed record mapping and concurrent repository access over SQLite.
//!
//! # Intention
//!
//! - Describe a plain data type once ([`Record`]) and get its table model,
//!   identifier-safe DDL/DML and row materialization from that description.
//! - Bind every value as a parameter; quote every identifier.
//! - Serialize all writes through one transactional writer while reads run
//!   concurrently, and deliver each outcome exactly once through a [`DbFuture`].
//!
//! # Architectural Boundaries
//!
//! - `schema`, `convert` and `value` know nothing about connections.
//! - `command` produces SQL and arguments; it never opens a store.
//! - `store` owns every connection and thread; `repository` is the typed
//!   façade that joins compiled commands with the executor.
//! - Record types, their domain logic and the host's lifecycle live outside
//!   this crate.

pub mod command;
pub mod convert;
pub mod error;
pub mod ident;
pub mod migration;
pub mod repository;
pub mod schema;
pub mod store;
pub mod value;

pub use command::{
    CompiledCommand, Compiler, DeleteWhere, Filter, QueryOperator, Select, SelectQuery,
    UpdateWhere, Where,
};
pub use convert::{ConverterRegistry, EnumName, Nullable, TextEnum, UnixMillis, ValueConverter};
pub use error::{DbError, Result};
pub use ident::{quote_column_ref, quote_identifier, raw_expression, validate_identifier, RawExpr};
pub use migration::{MigrationStep, Migrations};
pub use repository::Repository;
pub use schema::{ColumnModel, EntityMapping, Mapper, Record, TableBuilder, TableModel};
pub use store::{Database, DbConfig, DbFuture, DbSchema, DbState, TransactionObserver};
pub use value::{FieldValue, StorageType, Value};
