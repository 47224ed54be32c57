//! Store configuration: defaults, TOML loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DbError, Result};

const JOURNAL_MODES: &[&str] = &["DELETE", "TRUNCATE", "PERSIST", "MEMORY", "WAL", "OFF"];
const SYNCHRONOUS_MODES: &[&str] = &["OFF", "NORMAL", "FULL", "EXTRA"];

/// Database file, worker pool sizing and connection pragmas.
///
/// Loadable from TOML; every field is optional there and falls back to the
/// defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Database file, created with its parent directory on first open.
    pub path: PathBuf,
    /// Reader threads (default: 4).
    pub read_threads: usize,
    /// Pending reads before submissions run on the caller (default: 256).
    pub read_queue_capacity: usize,
    pub read_thread_name_prefix: String,
    pub write_thread_name: String,
    pub completion_thread_name: String,
    /// Overrides `journal_mode` with WAL when set.
    pub enable_wal: bool,
    pub journal_mode: String,
    pub synchronous: Option<String>,
    pub foreign_keys: bool,
    /// Lock wait bound in milliseconds; 0 disables waiting.
    pub busy_timeout_ms: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("local.db"),
            read_threads: 4,
            read_queue_capacity: 256,
            read_thread_name_prefix: "db-read-".to_string(),
            write_thread_name: "db-write-1".to_string(),
            completion_thread_name: "db-completion".to_string(),
            enable_wal: true,
            journal_mode: "WAL".to_string(),
            synchronous: Some("NORMAL".to_string()),
            foreign_keys: true,
            busy_timeout_ms: 10_000,
        }
    }
}

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: DbConfig = toml::from_str(contents)
            .map_err(|e| DbError::Configuration(format!("invalid database config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DbError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn with_read_threads(mut self, threads: usize) -> Self {
        self.read_threads = threads;
        self
    }

    pub fn with_read_queue_capacity(mut self, capacity: usize) -> Self {
        self.read_queue_capacity = capacity;
        self
    }

    pub fn with_wal(mut self, enabled: bool) -> Self {
        self.enable_wal = enabled;
        self
    }

    pub fn with_journal_mode(mut self, mode: &str) -> Self {
        self.journal_mode = mode.to_string();
        self
    }

    pub fn with_synchronous(mut self, mode: Option<&str>) -> Self {
        self.synchronous = mode.map(str::to_string);
        self
    }

    pub fn with_foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    pub fn with_busy_timeout_ms(mut self, millis: u32) -> Self {
        self.busy_timeout_ms = millis;
        self
    }

    /// Journal mode actually applied.
    pub fn effective_journal_mode(&self) -> String {
        if self.enable_wal {
            "WAL".to_string()
        } else {
            self.journal_mode.to_ascii_uppercase()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(DbError::Configuration("database path is empty".to_string()));
        }
        if self.read_threads == 0 {
            return Err(DbError::Configuration("read_threads must be at least 1".to_string()));
        }
        if self.read_queue_capacity == 0 {
            return Err(DbError::Configuration(
                "read_queue_capacity must be at least 1".to_string(),
            ));
        }
        let journal = self.effective_journal_mode();
        if !JOURNAL_MODES.contains(&journal.as_str()) {
            return Err(DbError::Configuration(format!(
                "unsupported journal_mode {:?}",
                self.journal_mode
            )));
        }
        if let Some(mode) = &self.synchronous {
            if !SYNCHRONOUS_MODES.contains(&mode.to_ascii_uppercase().as_str()) {
                return Err(DbError::Configuration(format!(
                    "unsupported synchronous mode {mode:?}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DbError::Configuration(format!("cannot create {}: {e}", parent.display()))
                })?;
            }
        }
        Ok(())
    }
}
