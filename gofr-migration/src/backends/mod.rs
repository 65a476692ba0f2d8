//! Storage drivers for the supported backends
//!
//! The relational driver runs each migration inside a database transaction.
//! The others implement [`TrackingStore`](crate::tracked::TrackingStore) and
//! are driven by [`TrackedDriver`](crate::tracked::TrackedDriver).

pub mod cql;
pub mod mongo;
pub mod redis;
pub mod sql;

/// Table, collection or hash key holding migration records
pub const DEFAULT_TRACKING_TABLE: &str = "gofr_migrations";

pub use cql::{CqlDriver, CqlFlavor, CqlRow, CqlSession, CqlStatement, CqlStatements, CqlStore, CqlValue};
pub use mongo::{DocumentStore, MongoDriver, MongoStore, SortBy};
pub use redis::{KeyValueStore, RedisDriver, RedisStore};
pub use sql::{SqlConnectOptions, SqlDriver};
