//! Embeddable `migrate` command
//!
//! An application links its compiled migration set into its own binary and
//! parses this command from its arguments:
//!
//! ```no_run
//! # use gofr::MigrateCommand;
//! # use clap::Parser;
//! # async fn run(set: gofr_migration::MigrationSet<sea_orm::DatabaseTransaction>) -> anyhow::Result<()> {
//! let command = MigrateCommand::parse();
//! let config = command.load_config()?;
//! command.execute_sql(&config, set).await?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use gofr_config::{ConfigLoader, DatabaseKind, FlushMode, GofrConfig};
use gofr_migration::{
    migrate, FlushPolicy, Method, MigrationDriver, MigrationSet, SqlConnectOptions, SqlDriver,
    TrackedDriver, TrackingStore, Version,
};
use sea_orm::DatabaseTransaction;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};

/// Run the application's migrations
#[derive(Debug, Clone, Parser)]
#[command(name = "migrate", about = "Run the application's migrations", long_about = None)]
pub struct MigrateCommand {
    /// Direction: UP or DOWN
    #[arg(long, value_name = "METHOD", default_value = "UP")]
    pub method: String,

    /// Backend the migrations target (sql, cassandra, ycql, mongo, redis)
    #[arg(long, value_name = "BACKEND")]
    pub database: Option<String>,

    /// Version to revert; repeat to revert several. DOWN only.
    #[arg(long = "tag", value_name = "VERSION")]
    pub tags: Vec<String>,

    /// Application name; defaults to the configured app name
    #[arg(long, value_name = "APP")]
    pub app: Option<String>,

    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

/// Map the configured flush mode onto the driver policy
pub fn flush_policy(mode: FlushMode) -> FlushPolicy {
    match mode {
        FlushMode::EachMigration => FlushPolicy::EachMigration,
        FlushMode::EndOfBatch => FlushPolicy::EndOfBatch,
    }
}

/// Wrap a tracking store in a driver configured from `config`
pub fn tracked_driver<S: TrackingStore>(config: &GofrConfig, store: S) -> TrackedDriver<S> {
    TrackedDriver::new(store).with_flush_policy(flush_policy(config.migrations.flush_policy))
}

impl MigrateCommand {
    /// Load configuration from `--config`, or the environment
    pub fn load_config(&self) -> Result<GofrConfig> {
        ConfigLoader::new()
            .load(self.config.as_ref())
            .context("Failed to load configuration")
    }

    pub fn method(&self) -> Result<Method> {
        Ok(Method::from_str(&self.method)?)
    }

    /// Backend named by `--database`, falling back to configuration
    pub fn backend(&self, config: &GofrConfig) -> Result<DatabaseKind> {
        match &self.database {
            Some(name) => DatabaseKind::from_str(name).map_err(|e| anyhow::anyhow!(e)),
            None => Ok(config.database.backend),
        }
    }

    pub fn app_name(&self, config: &GofrConfig) -> String {
        self.app.clone().unwrap_or_else(|| config.app.name.clone())
    }

    /// Restrict a DOWN batch to the tagged versions
    pub fn select<C: ?Sized + Send>(&self, mut set: MigrationSet<C>) -> Result<(Method, MigrationSet<C>)> {
        let method = self.method()?;
        if self.tags.is_empty() {
            return Ok((method, set));
        }
        if method == Method::Up {
            return Err(anyhow::anyhow!("--tag can only be used with DOWN migrations"));
        }

        let tags = self
            .tags
            .iter()
            .map(|t| Version::from_str(t))
            .collect::<Result<Vec<_>, _>>()?;
        set.retain_versions(&tags)?;
        debug!("Restricted DOWN batch to {} tagged versions", tags.len());
        Ok((method, set))
    }

    /// Run `set` with an application-built driver
    pub async fn execute<D>(
        &self,
        config: &GofrConfig,
        driver: &mut D,
        set: MigrationSet<D::Connection>,
    ) -> Result<Vec<Version>>
    where
        D: MigrationDriver,
    {
        let backend = self.backend(config)?;
        if backend.as_str() != driver.name() {
            return Err(anyhow::anyhow!(
                "Configured backend '{}' does not match the '{}' driver",
                backend,
                driver.name()
            ));
        }

        let app = self.app_name(config);
        let (method, set) = self.select(set)?;
        info!("Running {} migrations for app '{}' on {}", method, app, backend);

        let ran = migrate(&app, Some(driver), &set, method).await?;
        Ok(ran)
    }

    /// Run `set` against the relational database in `config`
    pub async fn execute_sql(
        &self,
        config: &GofrConfig,
        set: MigrationSet<DatabaseTransaction>,
    ) -> Result<Vec<Version>> {
        let mut driver = sql_driver(config).await?;
        self.execute(config, &mut driver, set).await
    }
}

/// Connect the relational driver described by `config`
pub async fn sql_driver(config: &GofrConfig) -> Result<SqlDriver> {
    let options = SqlConnectOptions {
        max_connections: config.database.max_connections,
        connection_timeout: config.database.connection_timeout,
    };
    let driver = SqlDriver::connect(&config.database.url, options)
        .await
        .context("Failed to connect to the migration database")?;
    Ok(driver.with_table(config.migrations.table_name.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gofr_migration::testing::{CallLog, MemoryTrackingStore, RecordingMigration};

    fn command(args: &[&str]) -> MigrateCommand {
        MigrateCommand::parse_from(std::iter::once("migrate").chain(args.iter().copied()))
    }

    fn set(log: &CallLog) -> MigrationSet<()> {
        MigrationSet::new()
            .with("1", RecordingMigration::new("one", log))
            .unwrap()
            .with("2", RecordingMigration::new("two", log))
            .unwrap()
            .with("3", RecordingMigration::new("three", log))
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let cmd = command(&[]);
        assert_eq!(cmd.method().unwrap(), Method::Up);
        assert!(cmd.tags.is_empty());
        assert_eq!(cmd.app_name(&GofrConfig::default()), "gofr-app");
    }

    #[test]
    fn test_tags_restrict_down() {
        let log = CallLog::default();
        let cmd = command(&["--method", "down", "--tag", "3", "--tag", "1"]);

        let (method, selected) = cmd.select(set(&log)).unwrap();

        assert_eq!(method, Method::Down);
        assert_eq!(selected.versions(), vec![Version::new(1), Version::new(3)]);
    }

    #[test]
    fn test_tags_rejected_for_up_and_unknown() {
        let log = CallLog::default();
        assert!(command(&["--tag", "1"]).select(set(&log)).is_err());
        assert!(command(&["--method", "DOWN", "--tag", "7"]).select(set(&log)).is_err());
        assert!(command(&["--method", "sideways"]).select(set(&log)).is_err());
    }

    #[tokio::test]
    async fn test_execute_checks_backend_against_driver() {
        let log = CallLog::default();
        let mut driver = TrackedDriver::new(MemoryTrackingStore::default());

        let err = command(&["--database", "redis"])
            .execute(&GofrConfig::default(), &mut driver, set(&log))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("does not match"));
        assert!(log.calls().is_empty());
    }

    #[test]
    fn test_flush_policy_mapping() {
        let mut config = GofrConfig::default();
        config.migrations.flush_policy = FlushMode::EndOfBatch;
        let driver = tracked_driver(&config, MemoryTrackingStore::default());
        assert_eq!(driver.flush_policy(), FlushPolicy::EndOfBatch);
    }
}
