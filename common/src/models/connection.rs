//! Connection configuration models.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

/// Backend technology behind a connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    /// MongoDB document store.
    Mongo,
}

impl StoreType {
    /// Returns the default port for this store type.
    pub fn default_port(&self) -> u16 {
        match self {
            StoreType::Mongo => 27017,
        }
    }
}

impl std::fmt::Display for StoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreType::Mongo => write!(f, "mongo"),
        }
    }
}

/// Persisted connection configuration.
///
/// Identity is `id`; registering an existing id replaces the entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
pub struct Connection {
    /// Caller-assigned unique identifier.
    #[validate(length(min = 1, message = "Connection id is required"))]
    pub id: String,
    /// Connection display name.
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,
    /// Store host.
    #[serde(default)]
    pub host: String,
    /// Store port; 0 selects the store type's default.
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    /// Backend technology.
    pub store: StoreType,
    /// Database that must be usable at connect time (empty for none).
    #[serde(default)]
    pub database: String,
    /// Connect timeout in seconds; 0 selects the service default.
    #[serde(default)]
    pub timeout: u64,
    /// Backend-specific JSON options; overrides the discrete fields when set.
    #[serde(default)]
    pub options: String,
}

impl Connection {
    /// Port to dial, falling back to the store default.
    pub fn effective_port(&self) -> u16 {
        if self.port == 0 {
            self.store.default_port()
        } else {
            self.port
        }
    }

    /// Connect timeout, falling back to `default` when unset.
    pub fn timeout_or(&self, default: Duration) -> Duration {
        if self.timeout == 0 {
            default
        } else {
            Duration::from_secs(self.timeout)
        }
    }
}

/// Connection as returned by listing calls (no password).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConnectionItem {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub store: StoreType,
    pub database: String,
    pub timeout: u64,
    /// Whether a live handle is currently open for this connection.
    pub connected: bool,
}

impl ConnectionItem {
    pub fn new(connection: Connection, connected: bool) -> Self {
        Self {
            id: connection.id,
            name: connection.name,
            host: connection.host,
            port: connection.port,
            user: connection.user,
            store: connection.store,
            database: connection.database,
            timeout: connection.timeout,
            connected,
        }
    }
}
