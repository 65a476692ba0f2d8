use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::backends::redis::KeyValueStore;
use crate::error::MigrationResult;

#[derive(Debug, Default)]
struct State {
    hashes: HashMap<String, HashMap<String, String>>,
    counters: HashMap<String, i64>,
}

/// Key-value store with Redis hash and counter semantics
#[derive(Debug, Clone, Default)]
pub struct InMemoryKeyValueStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter key, `None` once deleted
    pub async fn counter(&self, key: &str) -> Option<i64> {
        self.state.lock().await.counters.get(key).copied()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn hget(&self, key: &str, field: &str) -> MigrationResult<Option<String>> {
        Ok(self
            .state
            .lock()
            .await
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned())
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> MigrationResult<()> {
        self.state
            .lock()
            .await
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn incr(&self, key: &str) -> MigrationResult<i64> {
        let mut state = self.state.lock().await;
        let counter = state.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn decr(&self, key: &str) -> MigrationResult<i64> {
        let mut state = self.state.lock().await;
        let counter = state.counters.entry(key.to_string()).or_insert(0);
        *counter -= 1;
        Ok(*counter)
    }

    async fn del(&self, key: &str) -> MigrationResult<()> {
        let mut state = self.state.lock().await;
        state.counters.remove(key);
        state.hashes.remove(key);
        Ok(())
    }
}
