//! Two-phase driver for backends without multi-statement transactions
//!
//! Cassandra, YCQL, MongoDB and Redis cannot wrap a migration body and its
//! bookkeeping in one atomic unit. [`TrackedDriver`] records each attempt in
//! two explicit phases instead:
//!
//! 1. *attempted*: a start record without an end time,
//! 2. *finished*: the end time, written once the body has succeeded.
//!
//! A failing body triggers a compensating delete of the phase-1 record.
//! [`FlushPolicy`] decides when the phases reach storage and therefore how
//! wide the window is in which a crash loses or strands bookkeeping.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::driver::MigrationDriver;
use crate::error::{MigrationError, MigrationResult};
use crate::migration::{self, Migration};
use crate::record::{AppliedMigrations, Method, MigrationRecord, Version};

/// When phase records are written to the tracking store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushPolicy {
    /// Write the start record before the body runs and the end time right
    /// after it. A crash mid-body leaves a dirty record that blocks later
    /// runs until resolved by hand.
    #[default]
    EachMigration,
    /// Buffer finished records in memory and bulk-insert them in
    /// `finish_migration`. A crash before the flush loses the batch's
    /// records while the bodies' side effects persist, and the next run
    /// applies those migrations again.
    EndOfBatch,
}

/// Record persistence primitives of a non-transactional backend
#[async_trait]
pub trait TrackingStore: Send {
    /// Handle passed to migration bodies
    type Connection: ?Sized + Send;

    fn name(&self) -> &'static str;

    fn connection(&mut self) -> &mut Self::Connection;

    /// Create the tracking table or collection if the backend needs one
    async fn ensure_schema(&mut self) -> MigrationResult<()> {
        Ok(())
    }

    /// Take the cross-process lock for an app, if the backend has one
    async fn acquire_lock(&mut self, _app: &str) -> MigrationResult<()> {
        Ok(())
    }

    async fn release_lock(&mut self, _app: &str) -> MigrationResult<()> {
        Ok(())
    }

    /// Whether any persisted record of the app lacks an end time
    async fn has_unfinished(&mut self, app: &str) -> MigrationResult<bool>;

    async fn insert(&mut self, records: &[MigrationRecord]) -> MigrationResult<()>;

    /// Persist the end time of a record that was inserted unfinished
    async fn mark_finished(&mut self, record: &MigrationRecord) -> MigrationResult<()>;

    async fn remove(&mut self, app: &str, version: Version, method: Method) -> MigrationResult<()>;

    /// Highest finished version for the app and method
    async fn last_finished(&mut self, app: &str, method: Method) -> MigrationResult<Option<Version>>;

    /// Every persisted record of the app
    async fn records(&mut self, app: &str) -> MigrationResult<Vec<MigrationRecord>>;
}

/// [`MigrationDriver`] over any [`TrackingStore`]
pub struct TrackedDriver<S: TrackingStore> {
    store: S,
    policy: FlushPolicy,
    schema_ready: bool,
    pending: Vec<MigrationRecord>,
    locked_apps: BTreeSet<String>,
}

impl<S: TrackingStore> TrackedDriver<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            policy: FlushPolicy::default(),
            schema_ready: false,
            pending: Vec::new(),
            locked_apps: BTreeSet::new(),
        }
    }

    pub fn with_flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Records buffered under [`FlushPolicy::EndOfBatch`] and not yet flushed
    pub fn pending(&self) -> &[MigrationRecord] {
        &self.pending
    }

    async fn ensure_schema(&mut self) -> MigrationResult<()> {
        if !self.schema_ready {
            self.store.ensure_schema().await?;
            self.schema_ready = true;
        }
        Ok(())
    }

    async fn is_dirty(&mut self, app: &str) -> MigrationResult<bool> {
        self.store.has_unfinished(app).await
    }

    /// Take the store lock for `app` unless this batch already holds it
    async fn lock(&mut self, app: &str) -> MigrationResult<()> {
        if !self.locked_apps.contains(app) {
            self.store.acquire_lock(app).await?;
            self.locked_apps.insert(app.to_string());
        }
        Ok(())
    }

    async fn is_recorded(&mut self, app: &str, version: Version, method: Method) -> MigrationResult<bool> {
        Ok(self
            .store
            .records(app)
            .await?
            .iter()
            .any(|r| r.matches(app, version, method) && r.is_finished()))
    }

    /// Phase 1: dirty check, then record the attempt
    async fn pre_run(&mut self, app: &str, version: Version, method: Method) -> MigrationResult<()> {
        self.ensure_schema().await?;
        self.lock(app).await?;

        if self.is_dirty(app).await? {
            return Err(MigrationError::Dirty { app: app.to_string() });
        }

        // another runner may have applied it after this batch was planned
        if self.is_recorded(app, version, method).await? {
            return Err(MigrationError::AlreadyApplied {
                app: app.to_string(),
                version,
                method,
            });
        }

        let record = MigrationRecord::start(app, version, method);
        match self.policy {
            FlushPolicy::EachMigration => self.store.insert(std::slice::from_ref(&record)).await,
            FlushPolicy::EndOfBatch => {
                self.pending.push(record);
                Ok(())
            }
        }
    }

    /// Phase 2: record the end time
    async fn post_run(&mut self, app: &str, version: Version, method: Method) -> MigrationResult<()> {
        match self.policy {
            FlushPolicy::EachMigration => {
                let mut record = MigrationRecord::start(app, version, method);
                record.finish();
                self.store.mark_finished(&record).await
            }
            FlushPolicy::EndOfBatch => {
                if let Some(record) = self
                    .pending
                    .iter_mut()
                    .find(|r| r.matches(app, version, method))
                {
                    record.finish();
                }
                Ok(())
            }
        }
    }

    /// Compensating delete of the phase-1 record
    async fn roll_back(&mut self, app: &str, version: Version, method: Method) {
        match self.policy {
            FlushPolicy::EachMigration => {
                if let Err(e) = self.store.remove(app, version, method).await {
                    warn!(
                        "Compensating delete of {} {} for app '{}' failed, record is left dirty: {}",
                        method, version, app, e
                    );
                }
            }
            FlushPolicy::EndOfBatch => {
                self.pending.retain(|r| !r.matches(app, version, method));
            }
        }
    }

    async fn release_locks(&mut self) -> MigrationResult<()> {
        let mut first_error = None;
        for app in std::mem::take(&mut self.locked_apps) {
            if let Err(e) = self.store.release_lock(&app).await {
                warn!("Failed to release migration lock for app '{}': {}", app, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl<S: TrackingStore> MigrationDriver for TrackedDriver<S> {
    type Connection = S::Connection;

    fn name(&self) -> &'static str {
        self.store.name()
    }

    async fn begin(&mut self, app: &str) -> MigrationResult<()> {
        self.ensure_schema().await?;
        self.lock(app).await
    }

    async fn run(
        &mut self,
        migration: &dyn Migration<Self::Connection>,
        app: &str,
        version: Version,
        method: Method,
    ) -> MigrationResult<()> {
        self.pre_run(app, version, method).await?;

        let outcome = migration::apply(migration, method, self.store.connection()).await;
        if let Err(e) = outcome {
            self.roll_back(app, version, method).await;
            return Err(MigrationError::execution(version, method, e));
        }

        if let Err(e) = self.post_run(app, version, method).await {
            self.roll_back(app, version, method).await;
            return Err(e);
        }

        debug!("{} {} recorded for app '{}' on {}", method, version, app, self.store.name());
        Ok(())
    }

    async fn last_run_version(&mut self, app: &str, method: Method) -> MigrationResult<Version> {
        self.ensure_schema().await?;
        Ok(self
            .store
            .last_finished(app, method)
            .await?
            .unwrap_or(Version::NONE))
    }

    async fn applied_migrations(&mut self, app: &str) -> MigrationResult<AppliedMigrations> {
        self.ensure_schema().await?;
        let records = self.store.records(app).await?;
        Ok(AppliedMigrations::from_records(&records))
    }

    async fn finish_migration(&mut self) -> MigrationResult<()> {
        let flushed = if self.pending.is_empty() {
            Ok(())
        } else {
            let finished: Vec<_> = self.pending.iter().filter(|r| r.is_finished()).cloned().collect();
            debug!("Flushing {} migration records to {}", finished.len(), self.store.name());
            let result = self.store.insert(&finished).await;
            if result.is_ok() {
                self.pending.clear();
            }
            result
        };

        let released = self.release_locks().await;
        flushed.and(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::migrate;
    use crate::testing::{CallLog, MemoryTrackingStore, RecordingMigration};
    use crate::MigrationSet;

    fn set_a_b(log: &CallLog, fail_b: bool) -> MigrationSet<()> {
        let mut set = MigrationSet::new();
        set.insert("20200101", RecordingMigration::new("A", log)).unwrap();
        let b = if fail_b {
            RecordingMigration::failing("B", log)
        } else {
            RecordingMigration::new("B", log)
        };
        set.insert("20200201", b).unwrap();
        set
    }

    #[tokio::test]
    async fn test_each_migration_writes_through() {
        let log = CallLog::default();
        let set = set_a_b(&log, false);
        let store = MemoryTrackingStore::default();
        let mut driver = TrackedDriver::new(store.clone());

        migrate("orders", Some(&mut driver), &set, Method::Up).await.unwrap();

        let records = store.snapshot().await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.is_finished()));
        assert!(driver.pending().is_empty());
        assert_eq!(
            driver.last_run_version("orders", Method::Up).await.unwrap(),
            Version::new(20200201)
        );
    }

    #[tokio::test]
    async fn test_failure_deletes_start_record() {
        let log = CallLog::default();
        let set = set_a_b(&log, true);
        let store = MemoryTrackingStore::default();
        let mut driver = TrackedDriver::new(store.clone());

        let err = migrate("orders", Some(&mut driver), &set, Method::Up)
            .await
            .unwrap_err();

        assert!(err.is_execution());
        let records = store.snapshot().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].version, Version::new(20200101));
        assert_eq!(
            driver.last_run_version("orders", Method::Up).await.unwrap(),
            Version::new(20200101)
        );
    }

    #[tokio::test]
    async fn test_end_of_batch_buffers_until_finish() {
        let log = CallLog::default();
        let set = set_a_b(&log, false);
        let store = MemoryTrackingStore::default();
        let mut driver = TrackedDriver::new(store.clone()).with_flush_policy(FlushPolicy::EndOfBatch);

        let a = set.get(Version::new(20200101)).unwrap();
        driver.run(a, "orders", Version::new(20200101), Method::Up).await.unwrap();
        assert!(store.snapshot().await.is_empty());
        assert_eq!(driver.pending().len(), 1);

        driver.finish_migration().await.unwrap();
        assert_eq!(store.snapshot().await.len(), 1);
        assert!(driver.pending().is_empty());
    }

    #[tokio::test]
    async fn test_end_of_batch_lost_records_are_reapplied() {
        let log = CallLog::default();
        let set = set_a_b(&log, false);
        let store = MemoryTrackingStore::default();

        {
            // process dies after the bodies ran but before the flush
            let mut driver = TrackedDriver::new(store.clone()).with_flush_policy(FlushPolicy::EndOfBatch);
            for (version, migration) in set.iter() {
                driver.run(migration, "orders", version, Method::Up).await.unwrap();
            }
        }

        let mut driver = TrackedDriver::new(store.clone()).with_flush_policy(FlushPolicy::EndOfBatch);
        migrate("orders", Some(&mut driver), &set, Method::Up).await.unwrap();

        assert_eq!(log.calls(), vec!["A.up", "B.up", "A.up", "B.up"]);
    }

    #[tokio::test]
    async fn test_end_of_batch_failure_keeps_earlier_records() {
        let log = CallLog::default();
        let set = set_a_b(&log, true);
        let store = MemoryTrackingStore::default();
        let mut driver = TrackedDriver::new(store.clone()).with_flush_policy(FlushPolicy::EndOfBatch);

        assert!(migrate("orders", Some(&mut driver), &set, Method::Up).await.is_err());

        let records = store.snapshot().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].version, Version::new(20200101));
    }

    #[tokio::test]
    async fn test_unfinished_record_is_dirty() {
        let log = CallLog::default();
        let set = set_a_b(&log, false);
        let store = MemoryTrackingStore::default();
        store
            .seed(MigrationRecord::start("orders", Version::new(20191231), Method::Up))
            .await;
        let mut driver = TrackedDriver::new(store.clone());

        let err = migrate("orders", Some(&mut driver), &set, Method::Up)
            .await
            .unwrap_err();

        assert!(err.is_dirty());
        assert!(log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_locks_are_released_on_finish() {
        let log = CallLog::default();
        let set = set_a_b(&log, true);
        let store = MemoryTrackingStore::default();
        let mut driver = TrackedDriver::new(store.clone());

        let _ = migrate("orders", Some(&mut driver), &set, Method::Up).await;

        assert_eq!(store.lock_events().await, vec!["acquire:orders", "release:orders"]);
    }

    #[tokio::test]
    async fn test_lock_is_taken_before_history_is_read() {
        let log = CallLog::default();
        let set = set_a_b(&log, false);
        let store = MemoryTrackingStore::default();
        let mut driver = TrackedDriver::new(store.clone());

        migrate("orders", Some(&mut driver), &set, Method::Up).await.unwrap();

        let events = store.events().await;
        assert_eq!(events[..2], ["acquire:orders", "last_finished:orders"]);
        assert_eq!(events.last().map(String::as_str), Some("release:orders"));
        assert_eq!(events.iter().filter(|e| e.starts_with("acquire:")).count(), 1);
    }

    #[tokio::test]
    async fn test_finished_record_is_not_run_again() {
        let log = CallLog::default();
        let set = set_a_b(&log, false);
        let store = MemoryTrackingStore::default();
        let mut applied = MigrationRecord::start("orders", Version::new(20200101), Method::Up);
        applied.finish();
        store.seed(applied).await;
        let mut driver = TrackedDriver::new(store.clone());

        let a = set.get(Version::new(20200101)).unwrap();
        let err = driver
            .run(a, "orders", Version::new(20200101), Method::Up)
            .await
            .unwrap_err();

        assert!(matches!(err, MigrationError::AlreadyApplied { .. }));
        assert_eq!(err.error_code(), "ALREADY_APPLIED");
        assert!(log.calls().is_empty());
        assert_eq!(store.snapshot().await.len(), 1);
    }
}
