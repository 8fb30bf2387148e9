//! Startup database migrations.
//!
//! Schema changes live as migration files next to each service and are applied by
//! an external migration tool. This runs `<tool> migrate:latest` and blocks until
//! it exits. Already-applied migrations are skipped by the tool itself.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use thiserror::Error;

pub const DEFAULT_MIGRATION_TOOL: &str = "./node_modules/.bin/knex";
pub const MIGRATE_LATEST: &str = "migrate:latest";

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("could not start migration tool {tool}: {source}")]
    Spawn {
        tool: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("migration tool {tool} failed with {status}")]
    Failed { tool: PathBuf, status: ExitStatus },
}

#[derive(Clone, Debug)]
pub struct MigrationRunner {
    tool: PathBuf,
}

impl Default for MigrationRunner {
    fn default() -> Self {
        Self::new(DEFAULT_MIGRATION_TOOL)
    }
}

impl MigrationRunner {
    pub fn new(tool: impl AsRef<Path>) -> Self {
        Self {
            tool: tool.as_ref().to_path_buf(),
        }
    }

    pub fn tool(&self) -> &Path {
        &self.tool
    }

    /// Apply every pending migration. Blocking, no timeout. Meant for process
    /// startup, before the server accepts connections.
    pub fn run(&self) -> Result<(), MigrationError> {
        tracing::info!(tool = %self.tool.display(), "running startup migrations");

        let status = Command::new(&self.tool)
            .arg(MIGRATE_LATEST)
            .status()
            .map_err(|source| MigrationError::Spawn {
                tool: self.tool.clone(),
                source,
            })?;

        if !status.success() {
            tracing::error!(tool = %self.tool.display(), %status, "startup migrations failed");
            return Err(MigrationError::Failed {
                tool: self.tool.clone(),
                status,
            });
        }

        Ok(())
    }
}

/// Run migrations with the default tool.
pub fn startup_migration() -> Result<(), MigrationError> {
    MigrationRunner::default().run()
}
