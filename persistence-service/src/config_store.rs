//! Durable configuration record.
//!
//! One record per process: service identity plus every registered
//! connection. Live store handles are never part of it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use common::errors::{AppError, AppResult};
use common::models::Connection;

/// Persisted process configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    pub port: u16,
    pub protocol: String,
    #[serde(default)]
    pub allow_all_origins: bool,
    /// Comma separated list of CORS origins, used when not allowing all.
    #[serde(default)]
    pub allowed_origins: String,
    #[serde(default)]
    pub connections: BTreeMap<String, Connection>,
}

/// Read/write access to the configuration record.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Returns `None` when nothing has been saved yet.
    async fn load(&self) -> AppResult<Option<ServiceRecord>>;

    /// Overwrites the stored record.
    async fn save(&self, record: &ServiceRecord) -> AppResult<()>;
}

/// Record kept as a pretty-printed JSON file.
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl ConfigStore for JsonFileStore {
    async fn load(&self) -> AppResult<Option<ServiceRecord>> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::Persistence(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        serde_json::from_str(&contents).map(Some).map_err(|e| {
            AppError::Persistence(format!("failed to parse {}: {}", self.path.display(), e))
        })
    }

    async fn save(&self, record: &ServiceRecord) -> AppResult<()> {
        let serialized = serde_json::to_string_pretty(record)
            .map_err(|e| AppError::Persistence(format!("failed to serialize record: {}", e)))?;

        // concurrent saves share the temp file
        let _guard = self.write_lock.lock().await;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| AppError::Persistence(format!("failed to create {}: {}", dir.display(), e)))?;
        }

        let temp = self.temp_path();
        fs::write(&temp, serialized)
            .await
            .map_err(|e| AppError::Persistence(format!("failed to write {}: {}", temp.display(), e)))?;
        fs::rename(&temp, &self.path)
            .await
            .map_err(|e| AppError::Persistence(format!("failed to save {}: {}", self.path.display(), e)))?;

        tracing::debug!(path = %self.path.display(), connections = record.connections.len(), "configuration saved");
        Ok(())
    }
}

/// Record held in memory; counts saves so tests can assert when they happen.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryConfigStore {
    record: std::sync::Mutex<Option<ServiceRecord>>,
    saves: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn record(&self) -> Option<ServiceRecord> {
        self.record.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load(&self) -> AppResult<Option<ServiceRecord>> {
        Ok(self.record())
    }

    async fn save(&self, record: &ServiceRecord) -> AppResult<()> {
        *self.record.lock().unwrap() = Some(record.clone());
        self.saves.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}
