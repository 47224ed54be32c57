//! Sequential schema upgrade steps.
//!
//! # Intention
//!
//! - Each step moves the schema exactly one version forward.
//! - The full path is resolved before anything runs, so a missing hop fails
//!   with nothing applied.

use std::fmt;

use rusqlite::Connection;
use tracing::info;

use crate::error::{DbError, Result};
use crate::schema::Mapper;

type StepFn = Box<dyn Fn(&Connection, &Mapper) -> Result<()> + Send + Sync>;

/// One `from -> to` upgrade.
pub struct MigrationStep {
    pub from: u32,
    pub to: u32,
    apply: StepFn,
}

impl MigrationStep {
    pub fn new(
        from: u32,
        to: u32,
        apply: impl Fn(&Connection, &Mapper) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            from,
            to,
            apply: Box::new(apply),
        }
    }

    pub fn apply(&self, conn: &Connection, mapper: &Mapper) -> Result<()> {
        (self.apply)(conn, mapper)
    }
}

impl fmt::Debug for MigrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MigrationStep({} -> {})", self.from, self.to)
    }
}

/// A registered set of single-version steps.
#[derive(Debug, Default)]
pub struct Migrations {
    steps: Vec<MigrationStep>,
}

impl Migrations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(
        mut self,
        from: u32,
        to: u32,
        apply: impl Fn(&Connection, &Mapper) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.steps.push(MigrationStep::new(from, to, apply));
        self
    }

    pub fn push(&mut self, step: MigrationStep) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Every step advances one version and no origin is registered twice.
    pub fn validate(&self) -> Result<()> {
        let mut origins = std::collections::HashSet::new();
        for step in &self.steps {
            if step.to != step.from.saturating_add(1) || step.to == step.from {
                return Err(DbError::Configuration(format!(
                    "migration {} -> {} must advance exactly one version",
                    step.from, step.to
                )));
            }
            if !origins.insert(step.from) {
                return Err(DbError::Configuration(format!(
                    "more than one migration starts at version {}",
                    step.from
                )));
            }
        }
        Ok(())
    }

    /// The ordered steps leading from `from` to `to`.
    pub fn plan(&self, from: u32, to: u32) -> Result<Vec<&MigrationStep>> {
        if to < from {
            return Err(DbError::Argument(format!(
                "cannot downgrade schema from version {from} to {to}"
            )));
        }
        (from..to)
            .map(|version| {
                self.steps
                    .iter()
                    .find(|s| s.from == version && s.to == version + 1)
                    .ok_or(DbError::MigrationGap {
                        from: version,
                        to: version + 1,
                    })
            })
            .collect()
    }

    /// Runs the plan from `from` to `to` and returns the version reached.
    pub fn apply(&self, conn: &Connection, mapper: &Mapper, from: u32, to: u32) -> Result<u32> {
        self.validate()?;
        for step in self.plan(from, to)? {
            info!(from = step.from, to = step.to, "applying migration");
            step.apply(conn, mapper).map_err(|e| DbError::Migration {
                from: step.from,
                to: step.to,
                source: Box::new(e),
            })?;
        }
        Ok(to)
    }
}
