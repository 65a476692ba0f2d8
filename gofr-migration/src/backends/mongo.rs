//! MongoDB tracking store

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::MigrationResult;
use crate::record::{Method, MigrationRecord, Version};
use crate::tracked::{TrackedDriver, TrackingStore};

use super::DEFAULT_TRACKING_TABLE;

/// Sort direction for [`DocumentStore::find_one`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortBy {
    pub field: String,
    pub descending: bool,
}

impl SortBy {
    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// Document database capability an application provides over its client.
///
/// Filters follow MongoDB query syntax as JSON: plain values match by
/// equality, `null` matches a null or missing field, and `{"$ne": v}`
/// matches anything but `v`. Updates use `{"$set": {...}}`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn find_one(
        &self,
        collection: &str,
        filter: Value,
        sort: Option<SortBy>,
    ) -> MigrationResult<Option<Value>>;

    async fn find(&self, collection: &str, filter: Value) -> MigrationResult<Vec<Value>>;

    async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> MigrationResult<()>;

    async fn update_one(&self, collection: &str, filter: Value, update: Value) -> MigrationResult<()>;

    async fn delete_one(&self, collection: &str, filter: Value) -> MigrationResult<()>;
}

/// Tracking store over a document collection
pub struct MongoStore<D: DocumentStore> {
    database: D,
    collection: String,
}

impl<D: DocumentStore> MongoStore<D> {
    pub fn new(database: D) -> Self {
        Self {
            database,
            collection: DEFAULT_TRACKING_TABLE.to_string(),
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

pub type MongoDriver<D> = TrackedDriver<MongoStore<D>>;

impl<D: DocumentStore> TrackedDriver<MongoStore<D>> {
    pub fn mongo(database: D) -> Self {
        TrackedDriver::new(MongoStore::new(database))
    }
}

fn key_filter(app: &str, version: Version, method: Method) -> Value {
    json!({ "app": app, "version": version, "method": method })
}

#[async_trait]
impl<D: DocumentStore> TrackingStore for MongoStore<D> {
    type Connection = D;

    fn name(&self) -> &'static str {
        "mongo"
    }

    fn connection(&mut self) -> &mut D {
        &mut self.database
    }

    async fn has_unfinished(&mut self, app: &str) -> MigrationResult<bool> {
        let found = self
            .database
            .find_one(
                &self.collection,
                json!({ "app": app, "end_time": null }),
                Some(SortBy::descending("version")),
            )
            .await?;
        Ok(found.is_some())
    }

    async fn insert(&mut self, records: &[MigrationRecord]) -> MigrationResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let documents = records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.database.insert_many(&self.collection, documents).await
    }

    async fn mark_finished(&mut self, record: &MigrationRecord) -> MigrationResult<()> {
        self.database
            .update_one(
                &self.collection,
                key_filter(&record.app, record.version, record.method),
                json!({ "$set": { "end_time": record.end_time } }),
            )
            .await
    }

    async fn remove(&mut self, app: &str, version: Version, method: Method) -> MigrationResult<()> {
        self.database
            .delete_one(&self.collection, key_filter(app, version, method))
            .await
    }

    async fn last_finished(&mut self, app: &str, method: Method) -> MigrationResult<Option<Version>> {
        let found = self
            .database
            .find_one(
                &self.collection,
                json!({ "app": app, "method": method, "end_time": { "$ne": null } }),
                Some(SortBy::descending("version")),
            )
            .await?;
        match found {
            Some(document) => {
                let record: MigrationRecord = serde_json::from_value(document)?;
                Ok(Some(record.version))
            }
            None => Ok(None),
        }
    }

    async fn records(&mut self, app: &str) -> MigrationResult<Vec<MigrationRecord>> {
        let documents = self
            .database
            .find(&self.collection, json!({ "app": app }))
            .await?;
        documents
            .into_iter()
            .map(|document| serde_json::from_value(document).map_err(Into::into))
            .collect()
    }
}
