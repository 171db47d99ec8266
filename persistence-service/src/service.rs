//! 持久化网关调度模块
//!
//! Resolves the connection id through the registry, invokes the store, and
//! annotates every failure with the operation that produced it.
//!
//! `CreateConnection`, `InsertOne` and `InsertMany` also write the
//! configuration record; that write is an explicit step of each of those
//! operations so on-disk state tracks the registry.

use std::sync::Arc;

use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::Value;

use common::errors::{AppError, AppResult, RpcError, RpcResultExt};
use common::models::{
    BoolResult, CollectionRequest, Connection, ConnectionItem, CountResult, DatabaseRequest,
    FilterRequest, FindBatch, FindOneResult, InsertManyRequest, InsertManyResult,
    InsertOneRequest, InsertOneResult, MutateRequest, PingResult, QueryRequest,
};
use common::utils::JsonCodec;

use crate::registry::Registry;
use crate::streaming;

pub type RpcResult<T> = Result<T, RpcError>;

/// 持久化网关服务
pub struct PersistenceService {
    registry: Arc<Registry>,
}

impl PersistenceService {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// 注册连接
    ///
    /// The configuration is written even when the backend does not answer;
    /// the connect error is still returned.
    pub async fn create_connection(&self, connection: Connection) -> RpcResult<BoolResult> {
        let registered = self.registry.register(connection).await;
        self.registry.persist().await.in_rpc("CreateConnection")?;
        registered.in_rpc("CreateConnection")?;
        Ok(BoolResult { result: true })
    }

    /// 删除连接。未知 id 同样返回成功。
    pub async fn delete_connection(&self, id: &str) -> RpcResult<BoolResult> {
        if self.registry.deregister(id).await {
            self.registry.persist().await.in_rpc("DeleteConnection")?;
        }
        Ok(BoolResult { result: true })
    }

    pub async fn list_connections(&self) -> Vec<ConnectionItem> {
        self.registry.list().await
    }

    pub async fn get_connection(&self, id: &str) -> RpcResult<ConnectionItem> {
        let connection = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| AppError::ConnectionNotFound(id.to_string()))
            .in_rpc("GetConnection")?;
        let connected = self.registry.has_handle(id).await;
        Ok(ConnectionItem::new(connection, connected))
    }

    pub async fn ping(&self, id: &str) -> RpcResult<PingResult> {
        let store = self.registry.lookup(id).await.in_rpc("Ping")?;
        store.ping().await.in_rpc("Ping")?;
        Ok(PingResult {
            result: "pong".to_string(),
        })
    }

    pub async fn create_database(&self, id: &str, req: DatabaseRequest) -> RpcResult<BoolResult> {
        let store = self.registry.lookup(id).await.in_rpc("CreateDatabase")?;
        store
            .create_database(&req.database)
            .await
            .in_rpc("CreateDatabase")?;
        Ok(BoolResult { result: true })
    }

    pub async fn delete_database(&self, id: &str, database: &str) -> RpcResult<BoolResult> {
        let store = self.registry.lookup(id).await.in_rpc("DeleteDatabase")?;
        store.delete_database(database).await.in_rpc("DeleteDatabase")?;
        Ok(BoolResult { result: true })
    }

    pub async fn create_collection(
        &self,
        id: &str,
        req: CollectionRequest,
    ) -> RpcResult<BoolResult> {
        let store = self.registry.lookup(id).await.in_rpc("CreateCollection")?;
        store
            .create_collection(&req.database, &req.collection)
            .await
            .in_rpc("CreateCollection")?;
        Ok(BoolResult { result: true })
    }

    pub async fn delete_collection(
        &self,
        id: &str,
        database: &str,
        collection: &str,
    ) -> RpcResult<BoolResult> {
        let store = self.registry.lookup(id).await.in_rpc("DeleteCollection")?;
        store
            .delete_collection(database, collection)
            .await
            .in_rpc("DeleteCollection")?;
        Ok(BoolResult { result: true })
    }

    pub async fn count(&self, id: &str, req: FilterRequest) -> RpcResult<CountResult> {
        let store = self.registry.lookup(id).await.in_rpc("Count")?;
        let result = store
            .count(&req.database, &req.collection, &req.query, &req.options)
            .await
            .in_rpc("Count")?;
        Ok(CountResult { result })
    }

    pub async fn insert_one(&self, id: &str, req: InsertOneRequest) -> RpcResult<InsertOneResult> {
        let store = self.registry.lookup(id).await.in_rpc("InsertOne")?;
        self.registry.persist().await.in_rpc("InsertOne")?;

        let document = JsonCodec::decode_object("document", &req.json_str).in_rpc("InsertOne")?;
        let inserted = store
            .insert_one(
                &req.database,
                &req.collection,
                Value::Object(document),
                &req.options,
            )
            .await
            .in_rpc("InsertOne")?;

        Ok(InsertOneResult {
            id: JsonCodec::encode(&inserted).in_rpc("InsertOne")?,
        })
    }

    /// 流式批量插入
    ///
    /// Every message names its own connection id. Ids come back in stream
    /// order; the first failing message aborts the call.
    pub async fn insert_many<S>(&self, messages: S) -> RpcResult<InsertManyResult>
    where
        S: Stream<Item = AppResult<InsertManyRequest>>,
    {
        self.registry.persist().await.in_rpc("InsertMany")?;
        let ids = streaming::insert_many(&self.registry, messages)
            .await
            .in_rpc("InsertMany")?;
        Ok(InsertManyResult {
            ids: JsonCodec::encode(&ids).in_rpc("InsertMany")?,
        })
    }

    /// 查询，结果按批次返回
    ///
    /// Errors surface before the first batch; once batches flow, each one is
    /// already encoded from the fetched results.
    pub async fn find(
        &self,
        id: &str,
        req: QueryRequest,
    ) -> RpcResult<BoxStream<'static, AppResult<FindBatch>>> {
        let store = self.registry.lookup(id).await.in_rpc("Find")?;
        let results = store
            .find(
                &req.database,
                &req.collection,
                &req.query,
                &req.fields,
                &req.options,
            )
            .await
            .in_rpc("Find")?;
        tracing::debug!(id = %id, results = results.len(), "find results fetched");
        Ok(streaming::find_batches(results).boxed())
    }

    pub async fn find_one(&self, id: &str, req: QueryRequest) -> RpcResult<FindOneResult> {
        let store = self.registry.lookup(id).await.in_rpc("FindOne")?;
        let found = store
            .find_one(
                &req.database,
                &req.collection,
                &req.query,
                &req.fields,
                &req.options,
            )
            .await
            .in_rpc("FindOne")?;
        Ok(FindOneResult {
            json_str: JsonCodec::encode(&found).in_rpc("FindOne")?,
        })
    }

    pub async fn update(&self, id: &str, req: MutateRequest) -> RpcResult<BoolResult> {
        let store = self.registry.lookup(id).await.in_rpc("Update")?;
        store
            .update(&req.database, &req.collection, &req.query, &req.value, &req.options)
            .await
            .in_rpc("Update")?;
        Ok(BoolResult { result: true })
    }

    pub async fn update_one(&self, id: &str, req: MutateRequest) -> RpcResult<BoolResult> {
        let store = self.registry.lookup(id).await.in_rpc("UpdateOne")?;
        store
            .update_one(&req.database, &req.collection, &req.query, &req.value, &req.options)
            .await
            .in_rpc("UpdateOne")?;
        Ok(BoolResult { result: true })
    }

    pub async fn replace_one(&self, id: &str, req: MutateRequest) -> RpcResult<BoolResult> {
        let store = self.registry.lookup(id).await.in_rpc("ReplaceOne")?;
        store
            .replace_one(&req.database, &req.collection, &req.query, &req.value, &req.options)
            .await
            .in_rpc("ReplaceOne")?;
        Ok(BoolResult { result: true })
    }

    pub async fn delete(&self, id: &str, req: FilterRequest) -> RpcResult<BoolResult> {
        let store = self.registry.lookup(id).await.in_rpc("Delete")?;
        store
            .delete(&req.database, &req.collection, &req.query, &req.options)
            .await
            .in_rpc("Delete")?;
        Ok(BoolResult { result: true })
    }

    pub async fn delete_one(&self, id: &str, req: FilterRequest) -> RpcResult<BoolResult> {
        let store = self.registry.lookup(id).await.in_rpc("DeleteOne")?;
        store
            .delete_one(&req.database, &req.collection, &req.query, &req.options)
            .await
            .in_rpc("DeleteOne")?;
        Ok(BoolResult { result: true })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{stream, TryStreamExt};
    use serde_json::json;

    use crate::config_store::MemoryConfigStore;
    use crate::registry::tests::{connection, registry_with};
    use crate::store::memory::{MemoryConnector, UNREACHABLE_HOST};

    fn service() -> (PersistenceService, Arc<MemoryConfigStore>) {
        let config_store = Arc::new(MemoryConfigStore::new());
        let registry = registry_with(Arc::new(MemoryConnector::new()), config_store.clone());
        (PersistenceService::new(Arc::new(registry)), config_store)
    }

    fn query(q: Value, fields: &[&str]) -> QueryRequest {
        QueryRequest {
            database: "db".into(),
            collection: "items".into(),
            query: q.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            options: String::new(),
        }
    }

    fn insert(json: Value) -> InsertOneRequest {
        InsertOneRequest {
            database: "db".into(),
            collection: "items".into(),
            json_str: json.to_string(),
            options: String::new(),
        }
    }

    #[tokio::test]
    async fn test_create_connection_persists_even_when_unreachable() {
        let (service, config_store) = service();

        let err = service
            .create_connection(connection("c1", UNREACHABLE_HOST))
            .await
            .unwrap_err();

        assert_eq!(err.function, "CreateConnection");
        assert!(matches!(err.source, AppError::BackendUnavailable(_)));
        assert_eq!(config_store.save_count(), 1);
        assert!(config_store.record().unwrap().connections.contains_key("c1"));

        let ping = service.ping("c1").await.unwrap_err();
        assert!(matches!(ping.source, AppError::ConnectionNotFound(_)));
        assert_eq!(ping.function, "Ping");
    }

    #[tokio::test]
    async fn test_persist_happens_exactly_on_mutating_calls() {
        let (service, config_store) = service();
        service.create_connection(connection("c1", "db")).await.unwrap();
        assert_eq!(config_store.save_count(), 1);

        service.insert_one("c1", insert(json!({ "a": 1 }))).await.unwrap();
        assert_eq!(config_store.save_count(), 2);

        let message = InsertManyRequest {
            id: "c1".into(),
            database: "db".into(),
            collection: "items".into(),
            json_str: json!([{ "a": 2 }]).to_string(),
            options: String::new(),
        };
        service
            .insert_many(stream::iter(vec![Ok(message)]))
            .await
            .unwrap();
        assert_eq!(config_store.save_count(), 3);

        service.count("c1", FilterRequest {
            database: "db".into(),
            collection: "items".into(),
            query: String::new(),
            options: String::new(),
        })
        .await
        .unwrap();
        service.find_one("c1", query(json!({ "a": 1 }), &[])).await.unwrap();
        service.ping("c1").await.unwrap();
        assert_eq!(config_store.save_count(), 3);

        // unknown ids leave the record alone
        service.delete_connection("missing").await.unwrap();
        assert_eq!(config_store.save_count(), 3);
        service.delete_connection("c1").await.unwrap();
        assert_eq!(config_store.save_count(), 4);
    }

    #[tokio::test]
    async fn test_delete_connection_twice_succeeds() {
        let (service, _) = service();
        service.create_connection(connection("c1", "db")).await.unwrap();

        assert!(service.delete_connection("c1").await.unwrap().result);
        assert!(service.delete_connection("c1").await.unwrap().result);
        assert!(service.list_connections().await.is_empty());
    }

    #[tokio::test]
    async fn test_insert_then_find_one_with_projection() {
        let (service, _) = service();
        service.create_connection(connection("c1", "db")).await.unwrap();

        let inserted = service
            .insert_one("c1", insert(json!({ "_id": 7, "name": "bolt", "qty": 3 })))
            .await
            .unwrap();
        assert_eq!(inserted.id, "7");

        let found = service
            .find_one("c1", query(json!({ "_id": 7 }), &["qty", "name", "missing"]))
            .await
            .unwrap();
        let values: Value = serde_json::from_str(&found.json_str).unwrap();
        assert_eq!(values, json!([3, "bolt", null]));
    }

    #[tokio::test]
    async fn test_find_one_without_match() {
        let (service, _) = service();
        service.create_connection(connection("c1", "db")).await.unwrap();
        service.insert_one("c1", insert(json!({ "a": 1 }))).await.unwrap();

        let err = service
            .find_one("c1", query(json!({ "a": 2 }), &[]))
            .await
            .unwrap_err();
        assert_eq!(err.source.code(), "DOCUMENT_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_malformed_filter_is_annotated() {
        let (service, _) = service();
        service.create_connection(connection("c1", "db")).await.unwrap();

        let mut request = query(json!({}), &[]);
        request.query = "{not json".into();
        let err = match service.find("c1", request).await {
            Ok(_) => panic!("malformed filter accepted"),
            Err(e) => e,
        };

        assert_eq!(err.function, "Find");
        assert!(err.file.ends_with("service.rs"));
        assert!(matches!(err.source, AppError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_find_streams_all_results_in_batches() {
        let (service, _) = service();
        service.create_connection(connection("c1", "db")).await.unwrap();
        for i in 0..150 {
            service.insert_one("c1", insert(json!({ "n": i, "kind": "x" }))).await.unwrap();
        }

        let batches: Vec<FindBatch> = service
            .find("c1", query(json!({ "kind": "x" }), &["n"]))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(batches.len(), 2);
        let first: Vec<Value> = serde_json::from_str(&batches[0].json_str).unwrap();
        assert_eq!(first.len(), 100);
        assert_eq!(first[0], json!([0]));
    }

    #[tokio::test]
    async fn test_update_and_delete_operations() {
        let (service, _) = service();
        service.create_connection(connection("c1", "db")).await.unwrap();
        for name in ["a", "b", "b"] {
            service.insert_one("c1", insert(json!({ "name": name }))).await.unwrap();
        }
        let mutate = |query: Value, value: Value| MutateRequest {
            database: "db".into(),
            collection: "items".into(),
            query: query.to_string(),
            value: value.to_string(),
            options: String::new(),
        };
        let filter = |query: Value| FilterRequest {
            database: "db".into(),
            collection: "items".into(),
            query: query.to_string(),
            options: String::new(),
        };

        service
            .update("c1", mutate(json!({ "name": "b" }), json!({ "$set": { "seen": true } })))
            .await
            .unwrap();
        let seen = service.count("c1", filter(json!({ "seen": true }))).await.unwrap();
        assert_eq!(seen.result, 2);

        service
            .replace_one("c1", mutate(json!({ "name": "a" }), json!({ "name": "c" })))
            .await
            .unwrap();
        service.delete_one("c1", filter(json!({ "name": "b" }))).await.unwrap();
        assert_eq!(service.count("c1", filter(json!({}))).await.unwrap().result, 2);

        service.delete("c1", filter(json!({}))).await.unwrap();
        assert_eq!(service.count("c1", filter(json!({}))).await.unwrap().result, 0);
    }

    #[tokio::test]
    async fn test_explicit_collection_creation_is_unsupported() {
        let (service, _) = service();
        service.create_connection(connection("c1", "db")).await.unwrap();

        let err = service
            .create_collection("c1", CollectionRequest {
                database: "db".into(),
                collection: "items".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.source.code(), "UNSUPPORTED");
        assert_eq!(err.function, "CreateCollection");
    }

    #[tokio::test]
    async fn test_drop_collection_and_database() {
        let (service, _) = service();
        service.create_connection(connection("c1", "db")).await.unwrap();
        service.insert_one("c1", insert(json!({ "a": 1 }))).await.unwrap();

        let err = service
            .create_database("c1", DatabaseRequest { database: "db".into() })
            .await
            .unwrap_err();
        assert_eq!(err.source.code(), "UNSUPPORTED");

        service.delete_collection("c1", "db", "items").await.unwrap();
        let err = service.find_one("c1", query(json!({}), &[])).await.unwrap_err();
        assert_eq!(err.source.code(), "NAMESPACE_NOT_FOUND");

        service.insert_one("c1", insert(json!({ "a": 1 }))).await.unwrap();
        service.delete_database("c1", "db").await.unwrap();
        let filter = FilterRequest {
            database: "db".into(),
            collection: "items".into(),
            query: String::new(),
            options: String::new(),
        };
        assert_eq!(service.count("c1", filter).await.unwrap().result, 0);
    }
}
