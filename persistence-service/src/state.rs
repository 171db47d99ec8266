//! Application state for persistence service.

use std::sync::Arc;

use common::config::AppConfig;
use common::errors::AppResult;

use crate::config_store::JsonFileStore;
use crate::registry::{Registry, ServiceIdentity};
use crate::store::BackendConnector;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub registry: Arc<Registry>,
}

impl AppState {
    /// Builds the registry and restores saved connections (without handles).
    pub async fn new(config: AppConfig) -> AppResult<Self> {
        let identity = ServiceIdentity {
            name: config.service_name.clone(),
            port: config.port,
            protocol: "http".to_string(),
            allow_all_origins: config.allow_all_origins(),
            allowed_origins: config.allowed_origins.join(","),
        };
        let registry = Registry::new(
            identity,
            Arc::new(BackendConnector::new(config.connect_timeout())),
            Arc::new(JsonFileStore::new(config.config_path.clone())),
        );
        registry.load().await?;

        Ok(Self::with_registry(config, Arc::new(registry)))
    }

    pub fn with_registry(config: AppConfig, registry: Arc<Registry>) -> Self {
        Self { config, registry }
    }
}
