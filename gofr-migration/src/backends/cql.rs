//! Cassandra and YCQL tracking store
//!
//! Both backends speak CQL and differ only in the tracking table DDL, so one
//! store is parameterised over a [`CqlSession`] and a [`CqlFlavor`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::{MigrationError, MigrationResult};
use crate::record::{version_from_row, Method, MigrationRecord, Version};
use crate::tracked::{TrackedDriver, TrackingStore};

use super::DEFAULT_TRACKING_TABLE;

/// Value bound to or read from a CQL statement
#[derive(Debug, Clone, PartialEq)]
pub enum CqlValue {
    Text(String),
    BigInt(i64),
    Timestamp(DateTime<Utc>),
    Null,
}

/// One result row, columns in select order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CqlRow(pub Vec<CqlValue>);

impl CqlRow {
    fn column(&self, index: usize) -> MigrationResult<&CqlValue> {
        self.0
            .get(index)
            .ok_or_else(|| MigrationError::backend(format!("missing column {} in CQL row", index)))
    }

    pub fn text(&self, index: usize) -> MigrationResult<&str> {
        match self.column(index)? {
            CqlValue::Text(value) => Ok(value),
            other => Err(MigrationError::backend(format!("expected text, found {:?}", other))),
        }
    }

    pub fn big_int(&self, index: usize) -> MigrationResult<Option<i64>> {
        match self.column(index)? {
            CqlValue::BigInt(value) => Ok(Some(*value)),
            CqlValue::Null => Ok(None),
            other => Err(MigrationError::backend(format!("expected bigint, found {:?}", other))),
        }
    }

    pub fn timestamp(&self, index: usize) -> MigrationResult<Option<DateTime<Utc>>> {
        match self.column(index)? {
            CqlValue::Timestamp(value) => Ok(Some(*value)),
            CqlValue::Null => Ok(None),
            other => Err(MigrationError::backend(format!("expected timestamp, found {:?}", other))),
        }
    }
}

/// Statement and bound values queued in a [`CqlSession::batch`]
#[derive(Debug, Clone, PartialEq)]
pub struct CqlStatement {
    pub query: String,
    pub values: Vec<CqlValue>,
}

/// Minimal CQL capability an application provides over its client library
#[async_trait]
pub trait CqlSession: Send + Sync {
    /// Execute a statement that returns no rows
    async fn exec(&self, statement: &str, values: Vec<CqlValue>) -> MigrationResult<()>;

    /// Execute the statements as one logged batch: all apply or none do
    async fn batch(&self, statements: Vec<CqlStatement>) -> MigrationResult<()>;

    /// Execute a query and collect its rows
    async fn query(&self, statement: &str, values: Vec<CqlValue>) -> MigrationResult<Vec<CqlRow>>;
}

/// Which CQL dialect the tracking table is created for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CqlFlavor {
    Cassandra,
    /// YugabyteDB YCQL; the tracking table is created with transactions enabled
    Ycql,
}

/// Unset end times are stored as the epoch, since CQL cannot filter on null
pub const UNSET_END_TIME: DateTime<Utc> = DateTime::UNIX_EPOCH;

/// Statements issued against the tracking table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CqlStatements {
    pub create_table: String,
    pub count_unfinished: String,
    pub insert: String,
    pub mark_finished: String,
    pub delete: String,
    pub last_finished: String,
    pub select_app: String,
}

impl CqlStatements {
    pub fn new(table: &str, flavor: CqlFlavor) -> Self {
        let mut create_table = format!(
            "CREATE TABLE IF NOT EXISTS {table} (app text, version bigint, start_time timestamp, \
             end_time timestamp, method text, PRIMARY KEY (app, version, method))"
        );
        if flavor == CqlFlavor::Ycql {
            create_table.push_str(" WITH transactions = { 'enabled' : true }");
        }

        Self {
            create_table,
            count_unfinished: format!(
                "SELECT COUNT(*) FROM {table} WHERE app = ? AND end_time = ? ALLOW FILTERING"
            ),
            insert: format!(
                "INSERT INTO {table} (app, version, start_time, end_time, method) VALUES (?, ?, ?, ?, ?)"
            ),
            mark_finished: format!(
                "UPDATE {table} SET end_time = ? WHERE app = ? AND version = ? AND method = ?"
            ),
            delete: format!("DELETE FROM {table} WHERE app = ? AND version = ? AND method = ?"),
            last_finished: format!(
                "SELECT MAX(version) FROM {table} WHERE app = ? AND method = ? AND end_time > ? ALLOW FILTERING"
            ),
            select_app: format!(
                "SELECT version, method, start_time, end_time FROM {table} WHERE app = ?"
            ),
        }
    }
}

/// Tracking store over a CQL session
pub struct CqlStore<S: CqlSession> {
    session: S,
    flavor: CqlFlavor,
    statements: CqlStatements,
}

impl<S: CqlSession> CqlStore<S> {
    pub fn new(session: S, flavor: CqlFlavor) -> Self {
        Self {
            session,
            flavor,
            statements: CqlStatements::new(DEFAULT_TRACKING_TABLE, flavor),
        }
    }

    pub fn cassandra(session: S) -> Self {
        Self::new(session, CqlFlavor::Cassandra)
    }

    pub fn ycql(session: S) -> Self {
        Self::new(session, CqlFlavor::Ycql)
    }

    pub fn with_table(mut self, table: &str) -> Self {
        self.statements = CqlStatements::new(table, self.flavor);
        self
    }

    pub fn flavor(&self) -> CqlFlavor {
        self.flavor
    }

    pub fn statements(&self) -> &CqlStatements {
        &self.statements
    }

    pub fn session(&self) -> &S {
        &self.session
    }
}

/// Driver alias for the CQL backends
pub type CqlDriver<S> = TrackedDriver<CqlStore<S>>;

impl<S: CqlSession> TrackedDriver<CqlStore<S>> {
    pub fn cassandra(session: S) -> Self {
        TrackedDriver::new(CqlStore::cassandra(session))
    }

    pub fn ycql(session: S) -> Self {
        TrackedDriver::new(CqlStore::ycql(session))
    }
}

fn end_time_value(end_time: Option<DateTime<Utc>>) -> CqlValue {
    CqlValue::Timestamp(end_time.unwrap_or(UNSET_END_TIME))
}

fn insert_values(record: &MigrationRecord) -> Vec<CqlValue> {
    vec![
        CqlValue::Text(record.app.clone()),
        CqlValue::BigInt(record.version.get()),
        CqlValue::Timestamp(record.start_time),
        end_time_value(record.end_time),
        CqlValue::Text(record.method.as_str().to_string()),
    ]
}

#[async_trait]
impl<S: CqlSession> TrackingStore for CqlStore<S> {
    type Connection = S;

    fn name(&self) -> &'static str {
        match self.flavor {
            CqlFlavor::Cassandra => "cassandra",
            CqlFlavor::Ycql => "ycql",
        }
    }

    fn connection(&mut self) -> &mut S {
        &mut self.session
    }

    async fn ensure_schema(&mut self) -> MigrationResult<()> {
        self.session.exec(&self.statements.create_table, Vec::new()).await
    }

    async fn has_unfinished(&mut self, app: &str) -> MigrationResult<bool> {
        let rows = self
            .session
            .query(
                &self.statements.count_unfinished,
                vec![CqlValue::Text(app.to_string()), CqlValue::Timestamp(UNSET_END_TIME)],
            )
            .await?;
        let count = match rows.first() {
            Some(row) => row.big_int(0)?.unwrap_or(0),
            None => 0,
        };
        Ok(count > 0)
    }

    async fn insert(&mut self, records: &[MigrationRecord]) -> MigrationResult<()> {
        match records {
            [] => Ok(()),
            [record] => {
                self.session
                    .exec(&self.statements.insert, insert_values(record))
                    .await
            }
            _ => {
                let statements = records
                    .iter()
                    .map(|record| CqlStatement {
                        query: self.statements.insert.clone(),
                        values: insert_values(record),
                    })
                    .collect();
                self.session.batch(statements).await
            }
        }
    }

    async fn mark_finished(&mut self, record: &MigrationRecord) -> MigrationResult<()> {
        self.session
            .exec(
                &self.statements.mark_finished,
                vec![
                    end_time_value(record.end_time),
                    CqlValue::Text(record.app.clone()),
                    CqlValue::BigInt(record.version.get()),
                    CqlValue::Text(record.method.as_str().to_string()),
                ],
            )
            .await
    }

    async fn remove(&mut self, app: &str, version: Version, method: Method) -> MigrationResult<()> {
        self.session
            .exec(
                &self.statements.delete,
                vec![
                    CqlValue::Text(app.to_string()),
                    CqlValue::BigInt(version.get()),
                    CqlValue::Text(method.as_str().to_string()),
                ],
            )
            .await
    }

    async fn last_finished(&mut self, app: &str, method: Method) -> MigrationResult<Option<Version>> {
        let rows = self
            .session
            .query(
                &self.statements.last_finished,
                vec![
                    CqlValue::Text(app.to_string()),
                    CqlValue::Text(method.as_str().to_string()),
                    CqlValue::Timestamp(UNSET_END_TIME),
                ],
            )
            .await?;
        match rows.first() {
            Some(row) => row.big_int(0)?.map(version_from_row).transpose(),
            None => Ok(None),
        }
    }

    async fn records(&mut self, app: &str) -> MigrationResult<Vec<MigrationRecord>> {
        let rows = self
            .session
            .query(&self.statements.select_app, vec![CqlValue::Text(app.to_string())])
            .await?;

        rows.iter()
            .map(|row| {
                let version = row
                    .big_int(0)?
                    .ok_or_else(|| MigrationError::backend("null version in tracking table"))?;
                let start_time = row
                    .timestamp(2)?
                    .ok_or_else(|| MigrationError::backend("null start_time in tracking table"))?;
                Ok(MigrationRecord {
                    app: app.to_string(),
                    version: version_from_row(version)?,
                    method: row.text(1)?.parse()?,
                    start_time,
                    end_time: row.timestamp(3)?.filter(|t| *t != UNSET_END_TIME),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MigrationDriver;
    use crate::orchestrator::migrate;
    use crate::testing::{CallLog, InMemoryCqlSession, RecordingMigration};
    use crate::tracked::FlushPolicy;
    use crate::MigrationSet;

    fn migrations(log: &CallLog, fail_second: bool) -> MigrationSet<InMemoryCqlSession> {
        let mut set = MigrationSet::new();
        set.insert("20200101", RecordingMigration::new("A", log)).unwrap();
        let second = if fail_second {
            RecordingMigration::failing("B", log)
        } else {
            RecordingMigration::new("B", log)
        };
        set.insert("20200201", second).unwrap();
        set
    }

    #[test]
    fn test_ycql_table_enables_transactions() {
        let cassandra = CqlStatements::new("gofr_migrations", CqlFlavor::Cassandra);
        let ycql = CqlStatements::new("gofr_migrations", CqlFlavor::Ycql);

        assert!(!cassandra.create_table.contains("transactions"));
        assert!(ycql.create_table.ends_with("WITH transactions = { 'enabled' : true }"));
        assert_eq!(cassandra.insert, ycql.insert);
        assert!(cassandra.count_unfinished.contains("ALLOW FILTERING"));
    }

    #[tokio::test]
    async fn test_cassandra_end_to_end() {
        let log = CallLog::default();
        let set = migrations(&log, false);
        let session = InMemoryCqlSession::new();
        let mut driver = CqlDriver::cassandra(session.clone());

        let ran = migrate("orders", Some(&mut driver), &set, Method::Up).await.unwrap();

        assert_eq!(ran.len(), 2);
        assert_eq!(log.calls(), vec!["A.up", "B.up"]);
        assert_eq!(
            driver.last_run_version("orders", Method::Up).await.unwrap(),
            Version::new(20200201)
        );
        let rows = session.rows().await;
        assert!(rows.iter().all(|r| r.end_time.is_some()));
    }

    #[tokio::test]
    async fn test_ycql_compensating_delete() {
        let log = CallLog::default();
        let set = migrations(&log, true);
        let session = InMemoryCqlSession::new();
        let mut driver = CqlDriver::ycql(session.clone());

        let err = migrate("orders", Some(&mut driver), &set, Method::Up)
            .await
            .unwrap_err();

        assert!(err.is_execution());
        let rows = session.rows().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].version, Version::new(20200101));
        assert!(session
            .executed()
            .await
            .iter()
            .any(|s| s.starts_with("DELETE FROM gofr_migrations")));
        assert_eq!(
            driver.last_run_version("orders", Method::Up).await.unwrap(),
            Version::new(20200101)
        );
    }

    #[tokio::test]
    async fn test_unfinished_row_blocks_migrations() {
        let log = CallLog::default();
        let set = migrations(&log, false);
        let session = InMemoryCqlSession::new();
        session
            .seed(MigrationRecord::start("orders", Version::new(20191201), Method::Up))
            .await;
        let mut driver = CqlDriver::cassandra(session);

        let err = migrate("orders", Some(&mut driver), &set, Method::Up)
            .await
            .unwrap_err();

        assert!(err.is_dirty());
        assert!(log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_down_after_up() {
        let log = CallLog::default();
        let set = migrations(&log, false);
        let session = InMemoryCqlSession::new();
        let mut driver = CqlDriver::cassandra(session.clone());

        migrate("orders", Some(&mut driver), &set, Method::Up).await.unwrap();
        migrate("orders", Some(&mut driver), &set, Method::Down).await.unwrap();
        migrate("orders", Some(&mut driver), &set, Method::Down).await.unwrap();

        assert_eq!(log.calls(), vec!["A.up", "B.up", "B.down", "A.down"]);
        let applied = driver.applied_migrations("orders").await.unwrap();
        assert_eq!(applied.down.len(), 2);
    }

    #[tokio::test]
    async fn test_end_of_batch_flushes_once() {
        let log = CallLog::default();
        let set = migrations(&log, false);
        let session = InMemoryCqlSession::new();
        let mut driver = CqlDriver::cassandra(session.clone()).with_flush_policy(FlushPolicy::EndOfBatch);

        migrate("orders", Some(&mut driver), &set, Method::Up).await.unwrap();

        let statements = session.executed().await;
        assert!(!statements.iter().any(|s| s.starts_with("UPDATE")));
        assert_eq!(
            statements.iter().filter(|s| s.starts_with("INSERT")).count(),
            2
        );
        assert_eq!(session.batches().await, 1);
        assert_eq!(session.rows().await.len(), 2);
    }

    #[tokio::test]
    async fn test_rejected_flush_writes_no_rows() {
        let log = CallLog::default();
        let set = migrations(&log, false);
        let session = InMemoryCqlSession::new().rejecting_batches();
        let mut driver = CqlDriver::cassandra(session.clone()).with_flush_policy(FlushPolicy::EndOfBatch);

        let err = migrate("orders", Some(&mut driver), &set, Method::Up)
            .await
            .unwrap_err();

        assert!(matches!(err, MigrationError::Backend(_)));
        assert_eq!(log.calls(), vec!["A.up", "B.up"]);
        assert!(session.rows().await.is_empty());
        assert_eq!(driver.pending().len(), 2);
    }
}
