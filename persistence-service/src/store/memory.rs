//! In-memory `Store` and `StoreConnector` used by tests.
//!
//! Filters are top-level equality matches; updates understand `$set`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{Map, Value};

use common::errors::{AppError, AppResult};
use common::models::Connection;
use common::utils::JsonCodec;

use super::{project, Store, StoreConnector};

/// Host name the connector treats as unreachable.
pub const UNREACHABLE_HOST: &str = "unreachable";

type Namespace = (String, String);

#[derive(Default)]
pub struct MemoryStore {
    /// Connection id this store was opened for.
    pub connection_id: String,
    data: Mutex<HashMap<Namespace, Vec<Map<String, Value>>>>,
    next_id: AtomicU64,
    reachable: bool,
    released: AtomicBool,
    pub insert_many_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn new(connection_id: &str, reachable: bool) -> Self {
        Self {
            connection_id: connection_id.to_string(),
            reachable,
            ..Default::default()
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Documents currently stored in `database.collection`.
    pub fn documents(&self, database: &str, collection: &str) -> Vec<Map<String, Value>> {
        self.data
            .lock()
            .unwrap()
            .get(&(database.to_string(), collection.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    fn key(database: &str, collection: &str) -> Namespace {
        (database.to_string(), collection.to_string())
    }

    fn insert(&self, database: &str, collection: &str, document: Value) -> AppResult<Value> {
        let mut document = match document {
            Value::Object(map) => map,
            _ => return Err(AppError::InvalidArgument("document must be a JSON object".into())),
        };
        let id = document
            .entry("_id")
            .or_insert_with(|| {
                Value::String(format!("id-{}", self.next_id.fetch_add(1, Ordering::SeqCst)))
            })
            .clone();
        self.data
            .lock()
            .unwrap()
            .entry(Self::key(database, collection))
            .or_default()
            .push(document);
        Ok(id)
    }

    fn matching(
        &self,
        database: &str,
        collection: &str,
        query: &str,
    ) -> AppResult<Vec<Map<String, Value>>> {
        let filter = JsonCodec::decode_object("query", query)?;
        let data = self.data.lock().unwrap();
        let documents = data.get(&Self::key(database, collection)).ok_or_else(|| {
            AppError::NamespaceNotFound(format!("No collection found with name {}", collection))
        })?;
        Ok(documents
            .iter()
            .filter(|d| matches(d, &filter))
            .cloned()
            .collect())
    }

    fn modify<F>(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        limit: Option<usize>,
        mut apply: F,
    ) -> AppResult<()>
    where
        F: FnMut(&mut Map<String, Value>),
    {
        let filter = JsonCodec::decode_object("query", query)?;
        let mut data = self.data.lock().unwrap();
        if let Some(documents) = data.get_mut(&Self::key(database, collection)) {
            documents
                .iter_mut()
                .filter(|d| matches(d, &filter))
                .take(limit.unwrap_or(usize::MAX))
                .for_each(&mut apply);
        }
        Ok(())
    }

    fn remove(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        limit: Option<usize>,
    ) -> AppResult<()> {
        let filter = JsonCodec::decode_object("query", query)?;
        let mut data = self.data.lock().unwrap();
        if let Some(documents) = data.get_mut(&Self::key(database, collection)) {
            let mut budget = limit.unwrap_or(usize::MAX);
            documents.retain(|d| {
                if budget > 0 && matches(d, &filter) {
                    budget -= 1;
                    false
                } else {
                    true
                }
            });
        }
        Ok(())
    }
}

fn matches(document: &Map<String, Value>, filter: &Map<String, Value>) -> bool {
    filter.iter().all(|(k, v)| document.get(k) == Some(v))
}

fn apply_set(document: &mut Map<String, Value>, update: &Map<String, Value>) {
    if let Some(Value::Object(set)) = update.get("$set") {
        for (k, v) in set {
            document.insert(k.clone(), v.clone());
        }
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> AppResult<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(AppError::BackendUnavailable("server selection timeout".into()))
        }
    }

    async fn create_database(&self, _name: &str) -> AppResult<()> {
        Err(AppError::Unsupported("created on first insert".into()))
    }

    async fn delete_database(&self, name: &str) -> AppResult<()> {
        self.data.lock().unwrap().retain(|(db, _), _| db != name);
        Ok(())
    }

    async fn create_collection(&self, _database: &str, _name: &str) -> AppResult<()> {
        Err(AppError::Unsupported("created on first insert".into()))
    }

    async fn delete_collection(&self, database: &str, name: &str) -> AppResult<()> {
        self.data.lock().unwrap().remove(&Self::key(database, name));
        Ok(())
    }

    async fn count(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        _options: &str,
    ) -> AppResult<i64> {
        match self.matching(database, collection, query) {
            Ok(found) => Ok(found.len() as i64),
            Err(AppError::NamespaceNotFound(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        document: Value,
        _options: &str,
    ) -> AppResult<Value> {
        self.insert(database, collection, document)
    }

    async fn insert_many(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Value>,
        _options: &str,
    ) -> AppResult<Vec<Value>> {
        self.insert_many_calls.fetch_add(1, Ordering::SeqCst);
        documents
            .into_iter()
            .map(|d| self.insert(database, collection, d))
            .collect()
    }

    async fn find(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        fields: &[String],
        _options: &str,
    ) -> AppResult<Vec<Value>> {
        Ok(self
            .matching(database, collection, query)?
            .into_iter()
            .map(|d| project(d, fields))
            .collect())
    }

    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        fields: &[String],
        _options: &str,
    ) -> AppResult<Value> {
        self.matching(database, collection, query)?
            .into_iter()
            .next()
            .map(|d| project(d, fields))
            .ok_or_else(|| AppError::DocumentNotFound(format!("{}.{}", database, collection)))
    }

    async fn update(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        value: &str,
        _options: &str,
    ) -> AppResult<()> {
        let update = JsonCodec::decode_object("value", value)?;
        self.modify(database, collection, query, None, |d| apply_set(d, &update))
    }

    async fn update_one(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        value: &str,
        _options: &str,
    ) -> AppResult<()> {
        let update = JsonCodec::decode_object("value", value)?;
        self.modify(database, collection, query, Some(1), |d| apply_set(d, &update))
    }

    async fn replace_one(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        value: &str,
        _options: &str,
    ) -> AppResult<()> {
        let replacement = JsonCodec::decode_object("value", value)?;
        self.modify(database, collection, query, Some(1), |d| {
            let id = d.get("_id").cloned();
            *d = replacement.clone();
            if let Some(id) = id {
                d.insert("_id".to_string(), id);
            }
        })
    }

    async fn delete(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        _options: &str,
    ) -> AppResult<()> {
        self.remove(database, collection, query, None)
    }

    async fn delete_one(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        _options: &str,
    ) -> AppResult<()> {
        self.remove(database, collection, query, Some(1))
    }

    async fn disconnect(&self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Connector handing out `MemoryStore`s and remembering every one it opened.
#[derive(Default)]
pub struct MemoryConnector {
    opened: Mutex<Vec<Arc<MemoryStore>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores opened so far, oldest first.
    pub fn opened(&self) -> Vec<Arc<MemoryStore>> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self, connection: &Connection) -> AppResult<Arc<dyn Store>> {
        if !connection.options.is_empty() {
            JsonCodec::decode_object("connection options", &connection.options)?;
        }
        let store = Arc::new(MemoryStore::new(
            &connection.id,
            connection.host != UNREACHABLE_HOST,
        ));
        self.opened.lock().unwrap().push(store.clone());
        Ok(store)
    }
}
