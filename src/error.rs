//! Error taxonomy for mapping, compilation and execution.
//!
//! # Intention
//!
//! - Configuration, identifier and schema defects are detected while a command
//!   is compiled and never reach the store.
//! - Everything the store rejects at runtime is carried as [`DbError::Store`]
//!   through the same channel as a successful result.

/// Result alias used across the crate.
pub type Result<T, E = DbError> = std::result::Result<T, E>;

/// Every failure the access layer can report.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Missing or invalid table/column metadata on a record type.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A table, column or index name that is not `[A-Za-z_][A-Za-z0-9_]*`.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// No mappable columns, or no primary key where one is required.
    #[error("schema error: {0}")]
    Schema(String),

    /// Placeholder/argument count mismatch or wrong number of key values.
    #[error("argument error: {0}")]
    Argument(String),

    /// A primary-key value was NULL at update/delete time.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// A value could not be written to, or read from, its column.
    #[error("mapping error: {0}")]
    Mapping(String),

    /// A user supplied converter rejected a value.
    #[error("conversion failed for column {column}: {source}")]
    Conversion {
        column: String,
        #[source]
        source: anyhow::Error,
    },

    /// Zero rows affected by update/delete, or no row for a key lookup.
    #[error("not found: {0}")]
    NotFound(String),

    /// No migration step bridges `from` to `to`.
    #[error("no migration step from version {from} to {to}")]
    MigrationGap { from: u32, to: u32 },

    /// A migration step ran and failed.
    #[error("migration {from} -> {to} failed: {source}")]
    Migration {
        from: u32,
        to: u32,
        #[source]
        source: Box<DbError>,
    },

    /// The store rejected the operation.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// A read connection could not be checked out.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// A worker thread could not be started.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The database has been closed.
    #[error("database is closed")]
    Closed,

    /// The worker dropped the operation before producing a result.
    #[error("operation abandoned: {0}")]
    Abandoned(String),
}

impl DbError {
    /// Defects in the program itself rather than in the data; retrying never helps.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DbError::Configuration(_)
                | DbError::InvalidIdentifier(_)
                | DbError::Schema(_)
                | DbError::MigrationGap { .. }
        )
    }

    pub(crate) fn conversion(column: &str, source: anyhow::Error) -> Self {
        DbError::Conversion {
            column: column.to_string(),
            source,
        }
    }
}
