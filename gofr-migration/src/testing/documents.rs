use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::backends::mongo::{DocumentStore, SortBy};
use crate::error::{MigrationError, MigrationResult};

/// Document store over in-memory collections
///
/// Supports the filter subset the tracking store issues: equality, `null`
/// for null-or-missing, and `$ne`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    collections: Arc<Mutex<HashMap<String, Vec<Value>>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn documents(&self, collection: &str) -> Vec<Value> {
        self.collections
            .lock()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

fn field_matches(actual: Option<&Value>, condition: &Value) -> bool {
    let actual = actual.unwrap_or(&Value::Null);
    match condition {
        Value::Object(ops) if ops.contains_key("$ne") => ops.get("$ne").map_or(true, |ne| actual != ne),
        expected => actual == expected,
    }
}

fn matches(document: &Value, filter: &Value) -> bool {
    match filter.as_object() {
        Some(conditions) => conditions
            .iter()
            .all(|(field, condition)| field_matches(document.get(field), condition)),
        None => true,
    }
}

fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a.and_then(Value::as_i64), b.and_then(Value::as_i64)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.map(Value::to_string).cmp(&b.map(Value::to_string)),
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find_one(
        &self,
        collection: &str,
        filter: Value,
        sort: Option<SortBy>,
    ) -> MigrationResult<Option<Value>> {
        let mut found = self.find(collection, filter).await?;
        if let Some(sort) = sort {
            found.sort_by(|a, b| {
                let ordering = compare(a.get(&sort.field), b.get(&sort.field));
                if sort.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }
        Ok(found.into_iter().next())
    }

    async fn find(&self, collection: &str, filter: Value) -> MigrationResult<Vec<Value>> {
        Ok(self
            .collections
            .lock()
            .await
            .get(collection)
            .map(|docs| docs.iter().filter(|d| matches(d, &filter)).cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Value>) -> MigrationResult<()> {
        self.collections
            .lock()
            .await
            .entry(collection.to_string())
            .or_default()
            .extend(documents);
        Ok(())
    }

    async fn update_one(&self, collection: &str, filter: Value, update: Value) -> MigrationResult<()> {
        let fields = update
            .get("$set")
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| MigrationError::backend("only $set updates are supported"))?;

        let mut collections = self.collections.lock().await;
        if let Some(document) = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|d| matches(d, &filter)))
        {
            if let Some(target) = document.as_object_mut() {
                target.extend(fields);
            }
        }
        Ok(())
    }

    async fn delete_one(&self, collection: &str, filter: Value) -> MigrationResult<()> {
        let mut collections = self.collections.lock().await;
        if let Some(docs) = collections.get_mut(collection) {
            if let Some(index) = docs.iter().position(|d| matches(d, &filter)) {
                docs.remove(index);
            }
        }
        Ok(())
    }
}
