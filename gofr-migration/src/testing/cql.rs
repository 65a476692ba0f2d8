use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::backends::cql::{
    CqlFlavor, CqlRow, CqlSession, CqlStatement, CqlStatements, CqlValue, UNSET_END_TIME,
};
use crate::backends::DEFAULT_TRACKING_TABLE;
use crate::error::{MigrationError, MigrationResult};
use crate::record::{Method, MigrationRecord, Version};

#[derive(Debug, Clone, Default)]
struct State {
    rows: Vec<MigrationRecord>,
    executed: Vec<String>,
    batches: usize,
}

/// CQL session that understands the tracking table statements.
///
/// Any other `exec` is logged and accepted, so migration bodies can issue
/// their own DDL against it.
#[derive(Debug, Clone)]
pub struct InMemoryCqlSession {
    statements: CqlStatements,
    state: Arc<Mutex<State>>,
    reject_batches: bool,
}

impl Default for InMemoryCqlSession {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCqlSession {
    pub fn new() -> Self {
        Self {
            statements: CqlStatements::new(DEFAULT_TRACKING_TABLE, CqlFlavor::Cassandra),
            state: Arc::new(Mutex::new(State::default())),
            reject_batches: false,
        }
    }

    pub async fn rows(&self) -> Vec<MigrationRecord> {
        self.state.lock().await.rows.clone()
    }

    /// Every statement passed to `exec` or `query`, in order
    pub async fn executed(&self) -> Vec<String> {
        self.state.lock().await.executed.clone()
    }

    pub async fn seed(&self, record: MigrationRecord) {
        self.state.lock().await.rows.push(record);
    }

    /// Number of batches applied
    pub async fn batches(&self) -> usize {
        self.state.lock().await.batches
    }

    /// Fail every `batch` call without applying any of its statements
    pub fn rejecting_batches(mut self) -> Self {
        self.reject_batches = true;
        self
    }

    fn apply(&self, state: &mut State, statement: &str, values: Vec<CqlValue>) -> MigrationResult<()> {
        state.executed.push(statement.to_string());
        let row = CqlRow(values);

        if statement == self.statements.insert {
            let (app, version, method) = key(&row, 0, 1, 4)?;
            let start_time = row
                .timestamp(2)?
                .ok_or_else(|| MigrationError::backend("null start_time"))?;
            let end_time = end_time(&row, 3)?;
            state.rows.retain(|r| !r.matches(&app, version, method));
            state.rows.push(MigrationRecord {
                app,
                version,
                method,
                start_time,
                end_time,
            });
        } else if statement == self.statements.mark_finished {
            let (app, version, method) = key(&row, 1, 2, 3)?;
            let end_time = end_time(&row, 0)?;
            if let Some(existing) = state.rows.iter_mut().find(|r| r.matches(&app, version, method)) {
                existing.end_time = end_time;
            }
        } else if statement == self.statements.delete {
            let (app, version, method) = key(&row, 0, 1, 2)?;
            state.rows.retain(|r| !r.matches(&app, version, method));
        }
        Ok(())
    }
}

fn key(row: &CqlRow, app: usize, version: usize, method: usize) -> MigrationResult<(String, Version, Method)> {
    let version = row
        .big_int(version)?
        .ok_or_else(|| MigrationError::backend("null version"))?;
    Ok((row.text(app)?.to_string(), Version::new(version), row.text(method)?.parse()?))
}

fn end_time(row: &CqlRow, index: usize) -> MigrationResult<Option<chrono::DateTime<chrono::Utc>>> {
    Ok(row.timestamp(index)?.filter(|t| *t != UNSET_END_TIME))
}

#[async_trait]
impl CqlSession for InMemoryCqlSession {
    async fn exec(&self, statement: &str, values: Vec<CqlValue>) -> MigrationResult<()> {
        let mut state = self.state.lock().await;
        self.apply(&mut state, statement, values)
    }

    async fn batch(&self, statements: Vec<CqlStatement>) -> MigrationResult<()> {
        if self.reject_batches {
            return Err(MigrationError::backend("batch rejected"));
        }
        let mut state = self.state.lock().await;

        let mut staged = state.clone();
        for statement in statements {
            self.apply(&mut staged, &statement.query, statement.values)?;
        }
        staged.batches += 1;
        *state = staged;
        Ok(())
    }

    async fn query(&self, statement: &str, values: Vec<CqlValue>) -> MigrationResult<Vec<CqlRow>> {
        let mut state = self.state.lock().await;
        state.executed.push(statement.to_string());
        let params = CqlRow(values);
        let app = params.text(0)?.to_string();

        if statement == self.statements.count_unfinished {
            let count = state
                .rows
                .iter()
                .filter(|r| r.app == app && !r.is_finished())
                .count();
            Ok(vec![CqlRow(vec![CqlValue::BigInt(count as i64)])])
        } else if statement == self.statements.last_finished {
            let method: Method = params.text(1)?.parse()?;
            let max = state
                .rows
                .iter()
                .filter(|r| r.app == app && r.method == method && r.is_finished())
                .map(|r| r.version.get())
                .max();
            Ok(vec![CqlRow(vec![max.map_or(CqlValue::Null, CqlValue::BigInt)])])
        } else if statement == self.statements.select_app {
            Ok(state
                .rows
                .iter()
                .filter(|r| r.app == app)
                .map(|r| {
                    CqlRow(vec![
                        CqlValue::BigInt(r.version.get()),
                        CqlValue::Text(r.method.as_str().to_string()),
                        CqlValue::Timestamp(r.start_time),
                        CqlValue::Timestamp(r.end_time.unwrap_or(UNSET_END_TIME)),
                    ])
                })
                .collect())
        } else {
            Err(MigrationError::backend(format!("unsupported query: {}", statement)))
        }
    }
}
