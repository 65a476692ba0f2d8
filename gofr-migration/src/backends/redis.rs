//! Redis tracking store
//!
//! Redis has no secondary indexes, so all records of an app live as one JSON
//! array in the `gofr_migrations` hash under the app's field, and every query
//! deserializes and scans that list.
//!
//! Concurrent runs for the same app are serialized with a counter key: the
//! first `INCR` to return 1 owns the lock until `finish_migration` deletes
//! the key. The lock is taken when the batch begins, before the applied
//! history is read. The key carries no expiry, so a process that dies while
//! holding it leaves the app locked until the key is removed by hand.

use async_trait::async_trait;
use tracing::debug;

use crate::error::{MigrationError, MigrationResult};
use crate::record::{Method, MigrationRecord, Version};
use crate::tracked::{TrackedDriver, TrackingStore};

use super::DEFAULT_TRACKING_TABLE;

/// Suffix of the per-app lock counter key
pub const LOCK_SUFFIX: &str = "gofr_migrations_lock";

/// Key-value capability an application provides over its Redis client
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn hget(&self, key: &str, field: &str) -> MigrationResult<Option<String>>;

    async fn hset(&self, key: &str, field: &str, value: String) -> MigrationResult<()>;

    async fn incr(&self, key: &str) -> MigrationResult<i64>;

    async fn decr(&self, key: &str) -> MigrationResult<i64>;

    async fn del(&self, key: &str) -> MigrationResult<()>;
}

/// Tracking store over a Redis hash
pub struct RedisStore<K: KeyValueStore> {
    client: K,
    hash_key: String,
}

impl<K: KeyValueStore> RedisStore<K> {
    pub fn new(client: K) -> Self {
        Self {
            client,
            hash_key: DEFAULT_TRACKING_TABLE.to_string(),
        }
    }

    pub fn with_hash_key(mut self, key: impl Into<String>) -> Self {
        self.hash_key = key.into();
        self
    }

    /// Counter key guarding migrations of `app`
    pub fn lock_key(app: &str) -> String {
        format!("{}:{}", app, LOCK_SUFFIX)
    }

    async fn load(&self, app: &str) -> MigrationResult<Vec<MigrationRecord>> {
        match self.client.hget(&self.hash_key, app).await? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, app: &str, records: &[MigrationRecord]) -> MigrationResult<()> {
        let raw = serde_json::to_string(records)?;
        self.client.hset(&self.hash_key, app, raw).await
    }
}

pub type RedisDriver<K> = TrackedDriver<RedisStore<K>>;

impl<K: KeyValueStore> TrackedDriver<RedisStore<K>> {
    pub fn redis(client: K) -> Self {
        TrackedDriver::new(RedisStore::new(client))
    }
}

#[async_trait]
impl<K: KeyValueStore> TrackingStore for RedisStore<K> {
    type Connection = K;

    fn name(&self) -> &'static str {
        "redis"
    }

    fn connection(&mut self) -> &mut K {
        &mut self.client
    }

    async fn acquire_lock(&mut self, app: &str) -> MigrationResult<()> {
        let key = Self::lock_key(app);
        let holders = self.client.incr(&key).await?;
        if holders != 1 {
            self.client.decr(&key).await?;
            return Err(MigrationError::Locked { app: app.to_string() });
        }
        debug!("Acquired migration lock {}", key);
        Ok(())
    }

    async fn release_lock(&mut self, app: &str) -> MigrationResult<()> {
        self.client.del(&Self::lock_key(app)).await
    }

    async fn has_unfinished(&mut self, app: &str) -> MigrationResult<bool> {
        Ok(self.load(app).await?.iter().any(|r| !r.is_finished()))
    }

    async fn insert(&mut self, records: &[MigrationRecord]) -> MigrationResult<()> {
        let mut apps: Vec<&str> = records.iter().map(|r| r.app.as_str()).collect();
        apps.sort_unstable();
        apps.dedup();

        for app in apps {
            let mut stored = self.load(app).await?;
            for record in records.iter().filter(|r| r.app == app) {
                stored.retain(|r| !r.matches(app, record.version, record.method));
                stored.push(record.clone());
            }
            stored.sort_by_key(|r| r.version);
            self.save(app, &stored).await?;
        }
        Ok(())
    }

    async fn mark_finished(&mut self, record: &MigrationRecord) -> MigrationResult<()> {
        let mut stored = self.load(&record.app).await?;
        match stored
            .iter_mut()
            .find(|r| r.matches(&record.app, record.version, record.method))
        {
            Some(existing) => existing.end_time = record.end_time,
            None => {
                return Err(MigrationError::backend(format!(
                    "no start record for {} {} of app '{}'",
                    record.method, record.version, record.app
                )))
            }
        }
        self.save(&record.app, &stored).await
    }

    async fn remove(&mut self, app: &str, version: Version, method: Method) -> MigrationResult<()> {
        let mut stored = self.load(app).await?;
        stored.retain(|r| !r.matches(app, version, method));
        self.save(app, &stored).await
    }

    async fn last_finished(&mut self, app: &str, method: Method) -> MigrationResult<Option<Version>> {
        Ok(self
            .load(app)
            .await?
            .iter()
            .filter(|r| r.method == method && r.is_finished())
            .map(|r| r.version)
            .max())
    }

    async fn records(&mut self, app: &str) -> MigrationResult<Vec<MigrationRecord>> {
        self.load(app).await
    }
}
