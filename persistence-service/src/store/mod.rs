//! Store capability contract.
//!
//! Every backend adapter implements [`Store`]. The backend is chosen once, at
//! registration time, from the connection's [`StoreType`] tag by a
//! [`StoreConnector`]; after that the gateway only talks to `dyn Store`.
//!
//! Filters, values and options arrive as the caller's JSON strings and are
//! decoded by the adapter, since their shape is backend specific. Malformed
//! input must come back as `AppError::InvalidArgument`, never a panic.
//!
//! Cancellation: every operation is a future; dropping it (client went away,
//! request timed out) drops the in-flight backend call with it.

pub mod mongo;

#[cfg(test)]
pub mod memory;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};

use common::errors::AppResult;
use common::models::{Connection, StoreType};

use self::mongo::MongoStore;

/// Operations every backend adapter provides.
#[async_trait]
pub trait Store: Send + Sync {
    /// Checks the backend is reachable.
    async fn ping(&self) -> AppResult<()>;

    async fn create_database(&self, name: &str) -> AppResult<()>;

    async fn delete_database(&self, name: &str) -> AppResult<()>;

    async fn create_collection(&self, database: &str, name: &str) -> AppResult<()>;

    async fn delete_collection(&self, database: &str, name: &str) -> AppResult<()>;

    /// Number of documents matching `query`.
    async fn count(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        options: &str,
    ) -> AppResult<i64>;

    /// Inserts one document, returning the backend-assigned id.
    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        document: Value,
        options: &str,
    ) -> AppResult<Value>;

    /// Inserts documents, returning their ids in input order.
    async fn insert_many(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Value>,
        options: &str,
    ) -> AppResult<Vec<Value>>;

    /// All matching documents, projected through `fields` (see [`project`]).
    async fn find(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        fields: &[String],
        options: &str,
    ) -> AppResult<Vec<Value>>;

    /// First matching document, projected through `fields`.
    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        fields: &[String],
        options: &str,
    ) -> AppResult<Value>;

    /// Applies `value` to every matching document.
    async fn update(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        value: &str,
        options: &str,
    ) -> AppResult<()>;

    async fn update_one(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        value: &str,
        options: &str,
    ) -> AppResult<()>;

    async fn replace_one(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        value: &str,
        options: &str,
    ) -> AppResult<()>;

    async fn delete(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        options: &str,
    ) -> AppResult<()>;

    async fn delete_one(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        options: &str,
    ) -> AppResult<()>;

    /// Releases the underlying network resources.
    async fn disconnect(&self);
}

/// Opens a live store for a connection.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, connection: &Connection) -> AppResult<Arc<dyn Store>>;
}

/// Connector selecting the adapter from the connection's store type.
pub struct BackendConnector {
    default_timeout: Duration,
}

impl BackendConnector {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

#[async_trait]
impl StoreConnector for BackendConnector {
    async fn connect(&self, connection: &Connection) -> AppResult<Arc<dyn Store>> {
        match connection.store {
            StoreType::Mongo => {
                let store = MongoStore::connect(
                    &connection.host,
                    connection.effective_port(),
                    &connection.user,
                    &connection.password,
                    &connection.database,
                    connection.timeout_or(self.default_timeout),
                    &connection.options,
                )
                .await?;
                Ok(Arc::new(store))
            }
        }
    }
}

/// Shapes one result document.
///
/// With no `fields` the whole document is returned. Otherwise the result is
/// an array holding one value per requested field, in request order, with
/// `null` for fields the document lacks.
pub fn project(document: Map<String, Value>, fields: &[String]) -> Value {
    if fields.is_empty() {
        return Value::Object(document);
    }
    Value::Array(
        fields
            .iter()
            .map(|field| document.get(field).cloned().unwrap_or(Value::Null))
            .collect(),
    )
}
