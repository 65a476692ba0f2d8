//! Migration error types

use thiserror::Error;

use crate::record::{Method, Version};

/// Result type for migration operations
pub type MigrationResult<T> = std::result::Result<T, MigrationError>;

/// Boxed error returned by a migration body
pub type BodyError = Box<dyn std::error::Error + Send + Sync>;

/// Migration-related errors
#[derive(Debug, Error)]
pub enum MigrationError {
    /// No storage driver was supplied to the orchestrator
    #[error("no database specified")]
    NoDatabase,

    /// Application name is empty
    #[error("application name cannot be empty")]
    InvalidApp,

    /// Migration key is not a non-negative integer
    #[error("invalid migration version '{0}': expected a numeric key such as 20220329122401")]
    InvalidVersion(String),

    /// Two migrations registered under the same version
    #[error("duplicate migration version {0}")]
    DuplicateVersion(Version),

    /// A DOWN tag names a version that is not registered
    #[error("tag {0} does not match any registered migration")]
    UnknownTag(Version),

    /// Method string is neither UP nor DOWN
    #[error("invalid migration method '{0}': expected UP or DOWN")]
    InvalidMethod(String),

    /// A previous attempt for the app never recorded its end time
    #[error("dirty migration check failed for app '{app}'")]
    Dirty { app: String },

    /// Another process holds the migration lock for the app
    #[error("migration lock for app '{app}' is held by another process")]
    Locked { app: String },

    /// A finished record already exists for this version and method
    #[error("migration {method} {version} already recorded for app '{app}'")]
    AlreadyApplied {
        app: String,
        version: Version,
        method: Method,
    },

    /// The migration body returned an error
    #[error("error encountered in running the migration: {method} {version}: {source}")]
    Execution {
        version: Version,
        method: Method,
        #[source]
        source: BodyError,
    },

    /// Relational database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Errors reported by a tracking store backend
    #[error("Backend error: {0}")]
    Backend(String),

    /// JSON serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MigrationError {
    /// Wrap an error returned by a migration body
    pub fn execution(version: Version, method: Method, source: impl Into<BodyError>) -> Self {
        MigrationError::Execution {
            version,
            method,
            source: source.into(),
        }
    }

    /// Build a backend error from anything displayable
    pub fn backend(message: impl std::fmt::Display) -> Self {
        MigrationError::Backend(message.to_string())
    }

    /// Whether the app is blocked by an interrupted earlier run
    pub fn is_dirty(&self) -> bool {
        matches!(self, MigrationError::Dirty { .. })
    }

    /// Whether the failure came from a migration body rather than bookkeeping
    pub fn is_execution(&self) -> bool {
        matches!(self, MigrationError::Execution { .. })
    }

    /// Get error code for CLI output
    pub fn error_code(&self) -> &'static str {
        match self {
            MigrationError::NoDatabase => "NO_DATABASE",
            MigrationError::InvalidApp
            | MigrationError::InvalidVersion(_)
            | MigrationError::DuplicateVersion(_)
            | MigrationError::UnknownTag(_)
            | MigrationError::InvalidMethod(_) => "INVALID_INPUT",
            MigrationError::Dirty { .. } => "DIRTY",
            MigrationError::Locked { .. } => "LOCKED",
            MigrationError::AlreadyApplied { .. } => "ALREADY_APPLIED",
            MigrationError::Execution { .. } => "EXECUTION_ERROR",
            MigrationError::Database(_) | MigrationError::Backend(_) => "STORAGE_ERROR",
            MigrationError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_message() {
        let err = MigrationError::execution(
            Version::new(20200201),
            Method::Up,
            anyhow::anyhow!("table already exists"),
        );
        let message = err.to_string();
        assert!(message.starts_with("error encountered in running the migration"));
        assert!(message.contains("UP 20200201"));
        assert!(message.contains("table already exists"));
        assert!(err.is_execution());
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(MigrationError::NoDatabase.error_code(), "NO_DATABASE");
        assert_eq!(
            MigrationError::Dirty { app: "orders".to_string() }.error_code(),
            "DIRTY"
        );
        assert_eq!(MigrationError::backend("timeout").error_code(), "STORAGE_ERROR");
        assert!(MigrationError::Dirty { app: "orders".to_string() }.is_dirty());
    }

    #[test]
    fn test_no_database_message() {
        assert_eq!(MigrationError::NoDatabase.to_string(), "no database specified");
    }
}
