//! MongoDB store adapter.
//!
//! Filters, values and documents are read as Extended JSON (so `{"$oid": ..}`
//! and friends round-trip) and results are written back as relaxed Extended
//! JSON. Options blobs deserialize straight into the driver's option structs.

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{
    ClientOptions, CountOptions, Credential, DeleteOptions, FindOneOptions, FindOptions,
    InsertManyOptions, InsertOneOptions, ReplaceOptions, UpdateOptions,
};
use mongodb::{Client, Collection};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use common::errors::{AppError, AppResult};
use common::utils::JsonCodec;

use super::{project, Store};

const DEFAULT_HOST: &str = "localhost";
const MAX_DATABASE_NAME_LEN: usize = 64;
const FORBIDDEN_DATABASE_CHARS: &[char] = &['/', '\\', '.', ' ', '"', '$', '*', '<', '>', ':', '|', '?', '\0'];

/// Connection options accepted in a connection's `options` blob.
///
/// `uri` replaces the connection's host and port. Credentials carried by
/// `uri` win over the discrete user and password.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct MongoConnectOptions {
    /// Full connection string.
    uri: Option<String>,
    app_name: Option<String>,
    replica_set: Option<String>,
    direct_connection: Option<bool>,
    /// Authentication database for whichever credential ends up in use.
    auth_source: Option<String>,
    max_pool_size: Option<u32>,
}

/// Driver options for a connection, plus the uri they were parsed from.
async fn client_options(
    host: &str,
    port: u16,
    user: &str,
    password: &str,
    timeout: Duration,
    options: &str,
) -> AppResult<(ClientOptions, String)> {
    let connect_options =
        parse_options::<MongoConnectOptions>("connection", options)?.unwrap_or_default();

    let uri = match connect_options.uri {
        Some(uri) => uri,
        None => {
            let host = if host.is_empty() { DEFAULT_HOST } else { host };
            format!("mongodb://{}:{}", host, port)
        }
    };
    let mut client_options = ClientOptions::parse(&uri)
        .await
        .map_err(|e| AppError::InvalidArgument(format!("invalid connection settings: {}", e)))?;

    if connect_options.app_name.is_some() {
        client_options.app_name = connect_options.app_name;
    }
    if connect_options.replica_set.is_some() {
        client_options.repl_set_name = connect_options.replica_set;
    }
    if connect_options.direct_connection.is_some() {
        client_options.direct_connection = connect_options.direct_connection;
    }
    if connect_options.max_pool_size.is_some() {
        client_options.max_pool_size = connect_options.max_pool_size;
    }

    if client_options.credential.is_none() && !user.is_empty() {
        client_options.credential = Some(
            Credential::builder()
                .username(user.to_string())
                .password(password.to_string())
                .build(),
        );
    }
    if let Some(source) = connect_options.auth_source {
        match client_options.credential.as_mut() {
            Some(credential) => credential.source = Some(source),
            None => {
                return Err(AppError::InvalidArgument(
                    "auth_source given without a user".to_string(),
                ))
            }
        }
    }

    client_options.connect_timeout = Some(timeout);
    client_options.server_selection_timeout = Some(timeout);
    Ok((client_options, uri))
}

/// `Store` backed by a MongoDB client.
pub struct MongoStore {
    client: Client,
}

impl MongoStore {
    /// Builds a client for the given server.
    ///
    /// No round trip happens here; reachability is checked by `ping`. A
    /// non-empty `database` must be a name MongoDB can create.
    pub async fn connect(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
        database: &str,
        timeout: Duration,
        options: &str,
    ) -> AppResult<Self> {
        let (client_options, uri) =
            client_options(host, port, user, password, timeout, options).await?;

        if !database.is_empty() {
            validate_database_name(database)?;
        }

        let client = Client::with_options(client_options)
            .map_err(|e| AppError::BackendUnavailable(e.to_string()))?;

        tracing::debug!(uri = %redact(&uri), "mongo client created");
        Ok(Self { client })
    }

    fn collection(&self, database: &str, collection: &str) -> Collection<Document> {
        self.client.database(database).collection(collection)
    }

    /// Fails with a readable error when the database or collection is absent.
    async fn ensure_namespace(&self, database: &str, collection: &str) -> AppResult<()> {
        let databases = self
            .client
            .list_database_names()
            .filter(doc! { "name": database })
            .await
            .map_err(backend_error)?;
        if databases.is_empty() {
            return Err(AppError::NamespaceNotFound(format!(
                "No database found with name {}",
                database
            )));
        }

        let collections = self
            .client
            .database(database)
            .list_collection_names()
            .filter(doc! { "name": collection })
            .await
            .map_err(backend_error)?;
        if collections.is_empty() {
            return Err(AppError::NamespaceNotFound(format!(
                "No collection found with name {}",
                collection
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn ping(&self) -> AppResult<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| AppError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn create_database(&self, _name: &str) -> AppResult<()> {
        Err(AppError::Unsupported(
            "MongoDB will create your database at first insert".to_string(),
        ))
    }

    async fn delete_database(&self, name: &str) -> AppResult<()> {
        self.client
            .database(name)
            .drop()
            .await
            .map_err(backend_error)
    }

    async fn create_collection(&self, _database: &str, _name: &str) -> AppResult<()> {
        Err(AppError::Unsupported(
            "MongoDB will create your collection at first insert".to_string(),
        ))
    }

    async fn delete_collection(&self, database: &str, name: &str) -> AppResult<()> {
        self.collection(database, name)
            .drop()
            .await
            .map_err(backend_error)
    }

    async fn count(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        options: &str,
    ) -> AppResult<i64> {
        let filter = parse_document("query", query)?;
        let options = parse_options::<CountOptions>("count", options)?;

        let count = self
            .collection(database, collection)
            .count_documents(filter)
            .with_options(options)
            .await
            .map_err(backend_error)?;
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn insert_one(
        &self,
        database: &str,
        collection: &str,
        document: Value,
        options: &str,
    ) -> AppResult<Value> {
        let document = to_document("document", document)?;
        let options = parse_options::<InsertOneOptions>("insert", options)?;

        let result = self
            .collection(database, collection)
            .insert_one(document)
            .with_options(options)
            .await
            .map_err(backend_error)?;
        Ok(result.inserted_id.into_relaxed_extjson())
    }

    async fn insert_many(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Value>,
        options: &str,
    ) -> AppResult<Vec<Value>> {
        let options = parse_options::<InsertManyOptions>("insert", options)?;
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let documents = documents
            .into_iter()
            .map(|d| to_document("document", d))
            .collect::<AppResult<Vec<_>>>()?;

        let result = self
            .collection(database, collection)
            .insert_many(documents)
            .with_options(options)
            .await
            .map_err(backend_error)?;

        // inserted_ids is keyed by input position
        let mut ids: Vec<(usize, Bson)> = result.inserted_ids.into_iter().collect();
        ids.sort_by_key(|(index, _)| *index);
        Ok(ids
            .into_iter()
            .map(|(_, id)| id.into_relaxed_extjson())
            .collect())
    }

    async fn find(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        fields: &[String],
        options: &str,
    ) -> AppResult<Vec<Value>> {
        let filter = parse_document("query", query)?;
        let options = parse_options::<FindOptions>("find", options)?;
        self.ensure_namespace(database, collection).await?;

        let mut cursor = self
            .collection(database, collection)
            .find(filter)
            .with_options(options)
            .await
            .map_err(backend_error)?;

        let mut results = Vec::new();
        while let Some(document) = cursor.try_next().await.map_err(backend_error)? {
            results.push(render(document, fields));
        }
        Ok(results)
    }

    async fn find_one(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        fields: &[String],
        options: &str,
    ) -> AppResult<Value> {
        let filter = parse_document("query", query)?;
        let options = parse_options::<FindOneOptions>("find", options)?;
        self.ensure_namespace(database, collection).await?;

        let document = self
            .collection(database, collection)
            .find_one(filter)
            .with_options(options)
            .await
            .map_err(backend_error)?
            .ok_or_else(|| AppError::DocumentNotFound(format!("{}.{}", database, collection)))?;
        Ok(render(document, fields))
    }

    async fn update(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        value: &str,
        options: &str,
    ) -> AppResult<()> {
        let filter = parse_document("query", query)?;
        let update = parse_document("value", value)?;
        let options = parse_options::<UpdateOptions>("update", options)?;

        self.collection(database, collection)
            .update_many(filter, update)
            .with_options(options)
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn update_one(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        value: &str,
        options: &str,
    ) -> AppResult<()> {
        let filter = parse_document("query", query)?;
        let update = parse_document("value", value)?;
        let options = parse_options::<UpdateOptions>("update", options)?;

        self.collection(database, collection)
            .update_one(filter, update)
            .with_options(options)
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn replace_one(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        value: &str,
        options: &str,
    ) -> AppResult<()> {
        let filter = parse_document("query", query)?;
        let replacement = parse_document("value", value)?;
        let options = parse_options::<ReplaceOptions>("replace", options)?;

        self.collection(database, collection)
            .replace_one(filter, replacement)
            .with_options(options)
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn delete(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        options: &str,
    ) -> AppResult<()> {
        let filter = parse_document("query", query)?;
        let options = parse_options::<DeleteOptions>("delete", options)?;

        self.collection(database, collection)
            .delete_many(filter)
            .with_options(options)
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn delete_one(
        &self,
        database: &str,
        collection: &str,
        query: &str,
        options: &str,
    ) -> AppResult<()> {
        let filter = parse_document("query", query)?;
        let options = parse_options::<DeleteOptions>("delete", options)?;

        self.collection(database, collection)
            .delete_one(filter)
            .with_options(options)
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn disconnect(&self) {
        self.client.clone().shutdown().immediate(true).await;
    }
}

fn backend_error(e: mongodb::error::Error) -> AppError {
    AppError::BackendOperationFailed(e.to_string())
}

/// Parses an options blob; empty means driver defaults.
fn parse_options<T: DeserializeOwned>(what: &str, options: &str) -> AppResult<Option<T>> {
    if options.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(options)
        .map(Some)
        .map_err(|e| AppError::InvalidArgument(format!("malformed {} options: {}", what, e)))
}

fn parse_document(what: &str, s: &str) -> AppResult<Document> {
    let map = JsonCodec::decode_object(what, s)?;
    to_document(what, Value::Object(map))
}

fn to_document(what: &str, value: Value) -> AppResult<Document> {
    match Bson::try_from(value) {
        Ok(Bson::Document(document)) => Ok(document),
        Ok(other) => Err(AppError::InvalidArgument(format!(
            "{} must be a JSON object, got {:?}",
            what,
            other.element_type()
        ))),
        Err(e) => Err(AppError::InvalidArgument(format!("malformed {}: {}", what, e))),
    }
}

fn render(document: Document, fields: &[String]) -> Value {
    match Bson::Document(document).into_relaxed_extjson() {
        Value::Object(map) => project(map, fields),
        other => other,
    }
}

fn validate_database_name(name: &str) -> AppResult<()> {
    if name.len() >= MAX_DATABASE_NAME_LEN {
        return Err(AppError::InvalidArgument(format!(
            "No database with name {} can exist on this store: name too long",
            name
        )));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_DATABASE_CHARS.contains(c)) {
        return Err(AppError::InvalidArgument(format!(
            "No database with name {} can exist on this store: invalid character {:?}",
            name, c
        )));
    }
    Ok(())
}

/// Strips userinfo from a connection string for logging.
fn redact(uri: &str) -> String {
    match (uri.find("://"), uri.rfind('@')) {
        (Some(scheme), Some(at)) if at > scheme => {
            format!("{}://***@{}", &uri[..scheme], &uri[at + 1..])
        }
        _ => uri.to_string(),
    }
}
