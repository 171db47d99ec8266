//! Connection registry.
//!
//! Keeps two maps over the same id space: persisted connection settings and
//! the live store handles opened from them. A handle only ever exists for an
//! id that currently has settings; settings may exist without a handle (the
//! connect failed, or the process restarted and nobody reconnected yet).
//!
//! Each map has its own lock and no lock is held across a backend call, so a
//! slow connect on one id never stalls calls on another. When both maps are
//! taken, `connections` is locked before `handles`.
//!
//! `persist` holds its own lock from snapshot to save, so saves land in
//! snapshot order and a stale snapshot never overwrites a newer one.
//!
//! Two concurrent `register` calls for the *same* id race: each map keeps
//! whichever write lands last, and the two maps may end up describing
//! different registrations. Callers that re-register an id concurrently must
//! serialize themselves.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use validator::Validate;

use common::errors::{AppError, AppResult};
use common::models::{Connection, ConnectionItem};

use crate::config_store::{ConfigStore, ServiceRecord};
use crate::store::{Store, StoreConnector};

/// Identity written alongside the connections in the configuration record.
#[derive(Debug, Clone)]
pub struct ServiceIdentity {
    pub name: String,
    pub port: u16,
    pub protocol: String,
    pub allow_all_origins: bool,
    /// Comma separated.
    pub allowed_origins: String,
}

/// Owns connection settings and live store handles.
pub struct Registry {
    identity: ServiceIdentity,
    connector: Arc<dyn StoreConnector>,
    config_store: Arc<dyn ConfigStore>,
    connections: RwLock<HashMap<String, Connection>>,
    handles: RwLock<HashMap<String, Arc<dyn Store>>>,
    persist_lock: Mutex<()>,
}

impl Registry {
    pub fn new(
        identity: ServiceIdentity,
        connector: Arc<dyn StoreConnector>,
        config_store: Arc<dyn ConfigStore>,
    ) -> Self {
        Self {
            identity,
            connector,
            config_store,
            connections: RwLock::new(HashMap::new()),
            handles: RwLock::new(HashMap::new()),
            persist_lock: Mutex::new(()),
        }
    }

    /// Restores connection settings from the configuration record.
    ///
    /// Handles are not reopened; each connection has to be registered again
    /// before it can serve operations. A missing record is written fresh.
    pub async fn load(&self) -> AppResult<usize> {
        match self.config_store.load().await? {
            Some(record) => {
                let count = record.connections.len();
                *self.connections.write().await = record.connections.into_iter().collect();
                tracing::info!(count, "connections restored from configuration (not connected)");
                Ok(count)
            }
            None => {
                tracing::info!("no saved configuration found, writing a fresh one");
                self.persist().await?;
                Ok(0)
            }
        }
    }

    /// Writes the connection settings (never the handles) to durable storage.
    pub async fn persist(&self) -> AppResult<()> {
        let _guard = self.persist_lock.lock().await;
        let connections: BTreeMap<String, Connection> = self
            .connections
            .read()
            .await
            .iter()
            .map(|(id, c)| (id.clone(), c.clone()))
            .collect();

        let record = ServiceRecord {
            name: self.identity.name.clone(),
            port: self.identity.port,
            protocol: self.identity.protocol.clone(),
            allow_all_origins: self.identity.allow_all_origins,
            allowed_origins: self.identity.allowed_origins.clone(),
            connections,
        };
        self.config_store.save(&record).await
    }

    /// Records `connection` and opens a handle for it.
    ///
    /// The settings are recorded whether or not the backend answers. The
    /// handle is stored only once the backend has answered a ping; any
    /// handle previously registered under the id is released first.
    pub async fn register(&self, connection: Connection) -> AppResult<()> {
        connection.validate()?;
        let id = connection.id.clone();

        let previous = {
            let mut connections = self.connections.write().await;
            let mut handles = self.handles.write().await;
            connections.insert(id.clone(), connection.clone());
            handles.remove(&id)
        };
        if let Some(previous) = previous {
            tracing::info!(id = %id, "releasing replaced store handle");
            previous.disconnect().await;
        }

        let store = self.connector.connect(&connection).await.map_err(|e| {
            tracing::warn!(id = %id, error = %e, "connect failed, connection saved without a handle");
            match e {
                AppError::InvalidArgument(_) | AppError::Validation(_) => e,
                other => AppError::BackendUnavailable(other.to_string()),
            }
        })?;

        if let Err(e) = store.ping().await {
            tracing::warn!(id = %id, error = %e, "ping failed, connection saved without a handle");
            store.disconnect().await;
            return Err(match e {
                AppError::BackendUnavailable(_) => e,
                other => AppError::BackendUnavailable(other.to_string()),
            });
        }

        let displaced = {
            let connections = self.connections.read().await;
            if !connections.contains_key(&id) {
                // deregistered while we were connecting
                Some(store)
            } else {
                self.handles.write().await.insert(id.clone(), store)
            }
        };
        if let Some(displaced) = displaced {
            displaced.disconnect().await;
        }

        tracing::info!(id = %id, name = %connection.name, store = %connection.store, "connection registered");
        Ok(())
    }

    /// Live handle for `id`.
    pub async fn lookup(&self, id: &str) -> AppResult<Arc<dyn Store>> {
        self.handles
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::ConnectionNotFound(id.to_string()))
    }

    /// Forgets `id` and releases its handle. Unknown ids are not an error.
    ///
    /// Returns whether anything was removed.
    pub async fn deregister(&self, id: &str) -> bool {
        let (had_connection, handle) = {
            let mut connections = self.connections.write().await;
            let mut handles = self.handles.write().await;
            (connections.remove(id).is_some(), handles.remove(id))
        };

        let had_handle = handle.is_some();
        if let Some(handle) = handle {
            handle.disconnect().await;
        }

        if had_connection || had_handle {
            tracing::info!(id = %id, "connection removed");
        }
        had_connection || had_handle
    }

    /// Registered connections with their handle state, ordered by id.
    pub async fn list(&self) -> Vec<ConnectionItem> {
        let connections = self.connections.read().await;
        let handles = self.handles.read().await;
        let mut items: Vec<ConnectionItem> = connections
            .values()
            .map(|c| ConnectionItem::new(c.clone(), handles.contains_key(&c.id)))
            .collect();
        items.sort_by(|a, b| a.id.cmp(&b.id));
        items
    }

    /// Settings registered under `id`.
    pub async fn get(&self, id: &str) -> Option<Connection> {
        self.connections.read().await.get(id).cloned()
    }

    pub async fn has_handle(&self, id: &str) -> bool {
        self.handles.read().await.contains_key(id)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config_store::MemoryConfigStore;
    use crate::store::memory::{MemoryConnector, UNREACHABLE_HOST};
    use common::models::StoreType;

    pub(crate) fn connection(id: &str, host: &str) -> Connection {
        Connection {
            id: id.to_string(),
            name: format!("{} connection", id),
            host: host.to_string(),
            port: 27017,
            user: "app".to_string(),
            password: "pw".to_string(),
            store: StoreType::Mongo,
            database: String::new(),
            timeout: 1,
            options: String::new(),
        }
    }

    pub(crate) fn registry_with(
        connector: Arc<MemoryConnector>,
        config_store: Arc<MemoryConfigStore>,
    ) -> Registry {
        Registry::new(
            ServiceIdentity {
                name: "persistence-service".into(),
                port: 10005,
                protocol: "http".into(),
                allow_all_origins: true,
                allowed_origins: String::new(),
            },
            connector,
            config_store,
        )
    }

    fn registry() -> (Registry, Arc<MemoryConnector>, Arc<MemoryConfigStore>) {
        let connector = Arc::new(MemoryConnector::new());
        let config_store = Arc::new(MemoryConfigStore::new());
        (
            registry_with(connector.clone(), config_store.clone()),
            connector,
            config_store,
        )
    }

    #[tokio::test]
    async fn test_register_then_lookup() {
        let (registry, _, _) = registry();
        registry.register(connection("c1", "db")).await.unwrap();

        assert!(registry.lookup("c1").await.is_ok());
        assert!(registry.has_handle("c1").await);
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_unreachable_backend_keeps_settings_but_no_handle() {
        let (registry, connector, _) = registry();

        let err = registry
            .register(connection("c1", UNREACHABLE_HOST))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BackendUnavailable(_)));

        assert!(registry.get("c1").await.is_some());
        assert!(!registry.has_handle("c1").await);
        assert!(matches!(
            registry.lookup("c1").await.err().unwrap(),
            AppError::ConnectionNotFound(_)
        ));
        // the store that failed its ping was released
        assert!(connector.opened()[0].is_released());
    }

    #[tokio::test]
    async fn test_malformed_options_are_invalid_argument() {
        let (registry, _, _) = registry();
        let mut conn = connection("c1", "db");
        conn.options = "{broken".into();

        let err = registry.register(conn).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidArgument(_)));
        assert!(!registry.has_handle("c1").await);
    }

    #[tokio::test]
    async fn test_invalid_connection_is_rejected_before_recording() {
        let (registry, _, _) = registry();
        let err = registry.register(connection("", "db")).await.unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_reregister_replaces_and_releases_old_handle() {
        let (registry, connector, _) = registry();
        registry.register(connection("c1", "db-a")).await.unwrap();
        registry.register(connection("c1", "db-b")).await.unwrap();

        let opened = connector.opened();
        assert_eq!(opened.len(), 2);
        assert!(opened[0].is_released());
        assert!(!opened[1].is_released());
        assert_eq!(registry.get("c1").await.unwrap().host, "db-b");
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_reregister_with_unreachable_drops_old_handle() {
        let (registry, connector, _) = registry();
        registry.register(connection("c1", "db")).await.unwrap();
        assert!(registry
            .register(connection("c1", UNREACHABLE_HOST))
            .await
            .is_err());

        assert!(connector.opened()[0].is_released());
        assert!(!registry.has_handle("c1").await);
    }

    #[tokio::test]
    async fn test_deregister_is_idempotent_and_releases() {
        let (registry, connector, _) = registry();
        assert!(!registry.deregister("never").await);
        assert!(!registry.deregister("never").await);

        registry.register(connection("c1", "db")).await.unwrap();
        assert!(registry.deregister("c1").await);
        assert!(connector.opened()[0].is_released());
        assert!(registry.get("c1").await.is_none());
        assert!(!registry.deregister("c1").await);
    }

    #[tokio::test]
    async fn test_persist_and_reload_has_no_handles() {
        let connector = Arc::new(MemoryConnector::new());
        let config_store = Arc::new(MemoryConfigStore::new());

        let first = registry_with(connector.clone(), config_store.clone());
        let original = connection("c1", "db");
        first.register(original.clone()).await.unwrap();
        first.persist().await.unwrap();

        // a new process over the same durable record
        let second = registry_with(connector, config_store.clone());
        assert_eq!(second.load().await.unwrap(), 1);

        assert_eq!(second.get("c1").await.unwrap(), original);
        assert!(!second.has_handle("c1").await);
        let listed = second.list().await;
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].connected);
        assert!(second.lookup("c1").await.is_err());

        second.register(original).await.unwrap();
        assert!(second.lookup("c1").await.is_ok());
    }

    /// Holds the first save back so a later persist can overtake it.
    struct SlowFirstSave {
        inner: MemoryConfigStore,
        delayed: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl ConfigStore for SlowFirstSave {
        async fn load(&self) -> AppResult<Option<ServiceRecord>> {
            self.inner.load().await
        }

        async fn save(&self, record: &ServiceRecord) -> AppResult<()> {
            if !self.delayed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
            self.inner.save(record).await
        }
    }

    #[tokio::test]
    async fn test_overlapping_persists_keep_latest_snapshot() {
        let config_store = Arc::new(SlowFirstSave {
            inner: MemoryConfigStore::new(),
            delayed: std::sync::atomic::AtomicBool::new(false),
        });
        let registry = Arc::new(Registry::new(
            ServiceIdentity {
                name: "persistence-service".into(),
                port: 10005,
                protocol: "http".into(),
                allow_all_origins: true,
                allowed_origins: String::new(),
            },
            Arc::new(MemoryConnector::new()),
            config_store.clone(),
        ));
        registry.register(connection("c1", "db")).await.unwrap();

        let slow = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.persist().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        registry.register(connection("c2", "db")).await.unwrap();
        registry.persist().await.unwrap();
        slow.await.unwrap().unwrap();

        let record = config_store.inner.record().unwrap();
        assert_eq!(record.connections.len(), 2);
        assert_eq!(config_store.inner.save_count(), 2);
    }

    #[tokio::test]
    async fn test_load_without_record_writes_fresh_one() {
        let (registry, _, config_store) = registry();
        assert_eq!(registry.load().await.unwrap(), 0);

        let record = config_store.record().unwrap();
        assert_eq!(record.port, 10005);
        assert!(record.allow_all_origins);
        assert!(record.connections.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_registers_for_different_ids() {
        let (registry, connector, _) = registry();
        let registry = Arc::new(registry);

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .register(connection(&format!("c{}", i), "db"))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(registry.connection_count().await, 16);

        for i in 0..16 {
            let id = format!("c{}", i);
            registry
                .lookup(&id)
                .await
                .unwrap()
                .insert_one("db", "owner", serde_json::json!({ "owner": id }), "")
                .await
                .unwrap();
        }

        // every handle was opened for, and only serves, its own id
        let opened = connector.opened();
        assert_eq!(opened.len(), 16);
        for store in opened {
            let documents = store.documents("db", "owner");
            assert_eq!(documents.len(), 1);
            assert_eq!(documents[0]["owner"], serde_json::json!(store.connection_id));
        }
    }
}
