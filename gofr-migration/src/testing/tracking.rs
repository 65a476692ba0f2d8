use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::MigrationResult;
use crate::record::{Method, MigrationRecord, Version};
use crate::tracked::TrackingStore;

#[derive(Debug, Default)]
struct State {
    records: Vec<MigrationRecord>,
    events: Vec<String>,
}

/// [`TrackingStore`] over a shared vector; clones see the same records
#[derive(Debug, Clone, Default)]
pub struct MemoryTrackingStore {
    conn: (),
    state: Arc<Mutex<State>>,
}

impl MemoryTrackingStore {
    pub async fn snapshot(&self) -> Vec<MigrationRecord> {
        self.state.lock().await.records.clone()
    }

    pub async fn seed(&self, record: MigrationRecord) {
        self.state.lock().await.records.push(record);
    }

    /// `acquire:<app>` and `release:<app>` in call order
    pub async fn lock_events(&self) -> Vec<String> {
        self.events()
            .await
            .into_iter()
            .filter(|e| e.starts_with("acquire:") || e.starts_with("release:"))
            .collect()
    }

    /// Lock calls, history reads and inserts as `<call>:<app>`, in call order
    pub async fn events(&self) -> Vec<String> {
        self.state.lock().await.events.clone()
    }
}

#[async_trait]
impl TrackingStore for MemoryTrackingStore {
    type Connection = ();

    fn name(&self) -> &'static str {
        "memory"
    }

    fn connection(&mut self) -> &mut () {
        &mut self.conn
    }

    async fn acquire_lock(&mut self, app: &str) -> MigrationResult<()> {
        self.state.lock().await.events.push(format!("acquire:{}", app));
        Ok(())
    }

    async fn release_lock(&mut self, app: &str) -> MigrationResult<()> {
        self.state.lock().await.events.push(format!("release:{}", app));
        Ok(())
    }

    async fn has_unfinished(&mut self, app: &str) -> MigrationResult<bool> {
        Ok(self
            .state
            .lock()
            .await
            .records
            .iter()
            .any(|r| r.app == app && !r.is_finished()))
    }

    async fn insert(&mut self, records: &[MigrationRecord]) -> MigrationResult<()> {
        let mut state = self.state.lock().await;
        for record in records {
            state.events.push(format!("insert:{}", record.app));
        }
        state.records.extend_from_slice(records);
        Ok(())
    }

    async fn mark_finished(&mut self, record: &MigrationRecord) -> MigrationResult<()> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state
            .records
            .iter_mut()
            .find(|r| r.matches(&record.app, record.version, record.method))
        {
            existing.end_time = record.end_time;
        }
        Ok(())
    }

    async fn remove(&mut self, app: &str, version: Version, method: Method) -> MigrationResult<()> {
        self.state
            .lock()
            .await
            .records
            .retain(|r| !r.matches(app, version, method));
        Ok(())
    }

    async fn last_finished(&mut self, app: &str, method: Method) -> MigrationResult<Option<Version>> {
        let mut state = self.state.lock().await;
        state.events.push(format!("last_finished:{}", app));
        Ok(state
            .records
            .iter()
            .filter(|r| r.app == app && r.method == method && r.is_finished())
            .map(|r| r.version)
            .max())
    }

    async fn records(&mut self, app: &str) -> MigrationResult<Vec<MigrationRecord>> {
        let mut state = self.state.lock().await;
        state.events.push(format!("records:{}", app));
        Ok(state
            .records
            .iter()
            .filter(|r| r.app == app)
            .cloned()
            .collect())
    }
}
