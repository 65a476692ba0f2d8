//! Migration runner configuration

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::path::PathBuf;
use crate::error::ConfigResult;
use crate::validation::{validate_identifier, validate_required_string, Validatable};

/// When tracking records of non-transactional backends are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// Record each migration before and after its body runs
    #[default]
    EachMigration,
    /// Buffer records and write them once the batch finishes
    EndOfBatch,
}

impl fmt::Display for FlushMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlushMode::EachMigration => f.write_str("each_migration"),
            FlushMode::EndOfBatch => f.write_str("end_of_batch"),
        }
    }
}

impl FromStr for FlushMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "each_migration" => Ok(FlushMode::EachMigration),
            "end_of_batch" => Ok(FlushMode::EndOfBatch),
            _ => Err(format!("Invalid flush policy: {}", s)),
        }
    }
}

/// Migration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    /// Tracking table, collection or hash key
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Flush policy of the non-transactional backends
    #[serde(default)]
    pub flush_policy: FlushMode,

    /// Directory `gofr migrate create` writes migration files to
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            table_name: default_table_name(),
            flush_policy: FlushMode::default(),
            directory: default_directory(),
        }
    }
}

impl Validatable for MigrationsConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_identifier(&self.table_name, "table_name", self.domain_name())?;
        validate_required_string(&self.directory.to_string_lossy(), "directory", self.domain_name())?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "migrations"
    }
}

fn default_table_name() -> String {
    "gofr_migrations".to_string()
}

fn default_directory() -> PathBuf {
    PathBuf::from("migrations")
}
