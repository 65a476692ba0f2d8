//! Domain-specific configuration modules

pub mod app;
pub mod database;
pub mod logging;
pub mod migrations;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main GoFr configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GofrConfig {
    /// Application identity
    #[serde(default)]
    pub app: app::AppConfig,

    /// Database connection
    #[serde(default)]
    pub database: database::DatabaseConfig,

    /// Migration runner settings
    #[serde(default)]
    pub migrations: migrations::MigrationsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl GofrConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.app.validate()?;
        self.database.validate()?;
        self.migrations.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = GofrConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
