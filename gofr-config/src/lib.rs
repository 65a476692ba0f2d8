//! Configuration for GoFr migration tooling
//!
//! Split by domain (application, database, migrations, logging), with
//! defaults, validation, YAML files and `GOFR_*` environment overrides.

pub mod error;
pub mod loader;
pub mod validation;

pub mod domains;

pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

pub use domains::{
    app::AppConfig,
    database::{DatabaseConfig, DatabaseKind},
    logging::{LogFormat, LogLevel, LoggingConfig},
    migrations::{FlushMode, MigrationsConfig},
    GofrConfig,
};

pub use domains::utils::serde_duration;
