//! Versioned migrations for GoFr applications
//!
//! An application registers its migrations in a [`MigrationSet`] keyed by a
//! numeric version and calls [`migrate`] with a storage driver. Each version
//! is applied at most once per application and method, in ascending order
//! for UP and descending order for DOWN, and every attempt is recorded in a
//! tracking table on the target backend.
//!
//! ```no_run
//! use async_trait::async_trait;
//! use gofr_migration::{migrate, Method, Migration, MigrationSet, SqlDriver};
//! use sea_orm::{ConnectionTrait, DatabaseTransaction};
//!
//! struct CreateUsers;
//!
//! #[async_trait]
//! impl Migration<DatabaseTransaction> for CreateUsers {
//!     async fn up(&self, txn: &mut DatabaseTransaction) -> anyhow::Result<()> {
//!         txn.execute_unprepared("CREATE TABLE users (id INTEGER PRIMARY KEY)").await?;
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut driver = SqlDriver::connect("sqlite://app.db?mode=rwc", Default::default()).await?;
//! let set = MigrationSet::new().with("20240101120000", CreateUsers)?;
//! migrate("shop", Some(&mut driver), &set, Method::Up).await?;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod driver;
pub mod error;
pub mod migration;
pub mod orchestrator;
pub mod record;
pub mod tracked;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use backends::{
    CqlDriver, CqlFlavor, CqlSession, CqlStore, DocumentStore, KeyValueStore, MongoDriver, MongoStore,
    RedisDriver, RedisStore, SqlConnectOptions, SqlDriver, DEFAULT_TRACKING_TABLE,
};
pub use driver::MigrationDriver;
pub use error::{BodyError, MigrationError, MigrationResult};
pub use migration::{Migration, MigrationSet};
pub use orchestrator::migrate;
pub use record::{AppliedMigrations, Method, MigrationRecord, Version};
pub use tracked::{FlushPolicy, TrackedDriver, TrackingStore};
