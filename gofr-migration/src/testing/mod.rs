//! In-memory backends and recording migrations for tests
//!
//! Available to this crate's tests and, behind the `testing` feature, to
//! applications that want to exercise their migration wiring without a
//! running database.

mod cql;
mod documents;
mod driver;
mod kv;
mod migrations;
mod tracking;

pub use cql::InMemoryCqlSession;
pub use documents::InMemoryDocumentStore;
pub use driver::ScriptedDriver;
pub use kv::InMemoryKeyValueStore;
pub use migrations::{CallLog, RecordingMigration};
pub use tracking::MemoryTrackingStore;
