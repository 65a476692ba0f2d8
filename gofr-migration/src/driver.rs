//! Storage driver abstraction consumed by the orchestrator

use async_trait::async_trait;

use crate::error::MigrationResult;
use crate::migration::Migration;
use crate::record::{AppliedMigrations, Method, Version};

/// Backend-specific persistence of migration records.
///
/// A driver owns how a single attempt is recorded and undone; the
/// orchestrator owns which attempts happen and in what order. Every method
/// takes `&mut self`: one orchestration runs to completion before a driver
/// instance serves another.
#[async_trait]
pub trait MigrationDriver: Send {
    /// Handle passed to migration bodies
    type Connection: ?Sized + Send;

    /// Backend name used in log lines
    fn name(&self) -> &'static str;

    /// Called once per batch before any record of `app` is read.
    ///
    /// Drivers with a cross-process lock take it here, so the versions the
    /// orchestrator selects cannot go stale before they run. The lock is
    /// released by [`finish_migration`](Self::finish_migration).
    async fn begin(&mut self, _app: &str) -> MigrationResult<()> {
        Ok(())
    }

    /// Pre-run, invoke the body for `method`, then post-run or roll back
    async fn run(
        &mut self,
        migration: &dyn Migration<Self::Connection>,
        app: &str,
        version: Version,
        method: Method,
    ) -> MigrationResult<()>;

    /// Highest completed version for the app and method, `Version::NONE` if none
    async fn last_run_version(&mut self, app: &str, method: Method) -> MigrationResult<Version>;

    /// Every completed version for the app, split by method
    async fn applied_migrations(&mut self, app: &str) -> MigrationResult<AppliedMigrations>;

    /// Persist anything buffered during the batch and release batch resources
    async fn finish_migration(&mut self) -> MigrationResult<()>;
}
