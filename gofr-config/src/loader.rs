//! Configuration loading and environment variable handling

use crate::domains::database::{DatabaseConfig, DatabaseKind};
use crate::domains::logging::{LogFormat, LogLevel, LoggingConfig};
use crate::domains::migrations::{FlushMode, MigrationsConfig};
use crate::domains::GofrConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "GOFR".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<GofrConfig> {
        log::debug!("Loading configuration from {}", path.as_ref().display());
        let content = std::fs::read_to_string(path)?;
        let mut config: GofrConfig = serde_yaml::from_str(&content)?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<GofrConfig> {
        let mut config = GofrConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<GofrConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut GofrConfig) -> ConfigResult<()> {
        if let Ok(name) = self.get_env_var("APP_NAME") {
            config.app.name = name;
        }

        self.apply_database_overrides(&mut config.database)?;
        self.apply_migrations_overrides(&mut config.migrations)?;
        self.apply_logging_overrides(&mut config.logging)?;

        Ok(())
    }

    fn apply_database_overrides(&self, config: &mut DatabaseConfig) -> ConfigResult<()> {
        if let Ok(backend) = self.get_env_var("DB_BACKEND") {
            config.backend = DatabaseKind::from_str(&backend)
                .map_err(|_| ConfigError::EnvError(format!("Invalid DB_BACKEND: {}", backend)))?;
        }

        if let Ok(url) = self.get_env_var("DB_URL") {
            config.url = url;
        }

        if let Ok(max) = self.get_env_var("DB_MAX_CONNECTIONS") {
            config.max_connections = max
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid DB_MAX_CONNECTIONS: {}", e)))?;
        }

        if let Ok(timeout) = self.get_env_var("DB_CONNECTION_TIMEOUT") {
            let seconds: u64 = timeout.parse().map_err(|e| {
                ConfigError::EnvError(format!("Invalid DB_CONNECTION_TIMEOUT: {}", e))
            })?;
            config.connection_timeout = std::time::Duration::from_secs(seconds);
        }

        Ok(())
    }

    fn apply_migrations_overrides(&self, config: &mut MigrationsConfig) -> ConfigResult<()> {
        if let Ok(table) = self.get_env_var("MIGRATION_TABLE") {
            config.table_name = table;
        }

        if let Ok(policy) = self.get_env_var("MIGRATION_FLUSH_POLICY") {
            config.flush_policy = FlushMode::from_str(&policy).map_err(|_| {
                ConfigError::EnvError(format!("Invalid MIGRATION_FLUSH_POLICY: {}", policy))
            })?;
        }

        if let Ok(dir) = self.get_env_var("MIGRATION_DIR") {
            config.directory = dir.into();
        }

        Ok(())
    }

    fn apply_logging_overrides(&self, config: &mut LoggingConfig) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
