use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::driver::MigrationDriver;
use crate::error::{MigrationError, MigrationResult};
use crate::migration::{self, Migration};
use crate::record::{AppliedMigrations, Method, MigrationRecord, Version};

/// Driver keeping finished records in memory, with scripted failures
#[derive(Debug, Default)]
pub struct ScriptedDriver {
    conn: (),
    records: Vec<MigrationRecord>,
    dirty_apps: BTreeSet<String>,
    fail_begin: bool,
    fail_finish: bool,
    finish_calls: usize,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend a finished attempt is already recorded
    pub fn with_completed(mut self, app: &str, version: i64, method: Method) -> Self {
        let mut record = MigrationRecord::start(app, Version::new(version), method);
        record.finish();
        self.records.push(record);
        self
    }

    /// Report an unfinished record for `app` on every pre-run
    pub fn dirty(mut self, app: &str) -> Self {
        self.dirty_apps.insert(app.to_string());
        self
    }

    /// Refuse to start a batch, as a driver whose lock is taken would
    pub fn failing_begin(mut self) -> Self {
        self.fail_begin = true;
        self
    }

    pub fn failing_finish(mut self) -> Self {
        self.fail_finish = true;
        self
    }

    pub fn finish_calls(&self) -> usize {
        self.finish_calls
    }

    pub fn records(&self) -> &[MigrationRecord] {
        &self.records
    }
}

#[async_trait]
impl MigrationDriver for ScriptedDriver {
    type Connection = ();

    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn begin(&mut self, app: &str) -> MigrationResult<()> {
        if self.fail_begin {
            return Err(MigrationError::Locked { app: app.to_string() });
        }
        Ok(())
    }

    async fn run(
        &mut self,
        migration: &dyn Migration<()>,
        app: &str,
        version: Version,
        method: Method,
    ) -> MigrationResult<()> {
        if self.dirty_apps.contains(app) {
            return Err(MigrationError::Dirty { app: app.to_string() });
        }

        let mut record = MigrationRecord::start(app, version, method);
        migration::apply(migration, method, &mut self.conn)
            .await
            .map_err(|e| MigrationError::execution(version, method, e))?;
        record.finish();
        self.records.push(record);
        Ok(())
    }

    async fn last_run_version(&mut self, app: &str, method: Method) -> MigrationResult<Version> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.app == app && r.method == method)
            .map(|r| r.version)
            .max()
            .unwrap_or(Version::NONE))
    }

    async fn applied_migrations(&mut self, app: &str) -> MigrationResult<AppliedMigrations> {
        Ok(AppliedMigrations::from_records(
            self.records.iter().filter(|r| r.app == app),
        ))
    }

    async fn finish_migration(&mut self) -> MigrationResult<()> {
        self.finish_calls += 1;
        if self.fail_finish {
            return Err(MigrationError::backend("scripted finish failure"));
        }
        Ok(())
    }
}
