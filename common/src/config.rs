//! Service configuration.
//!
//! Values come from the environment (optionally seeded from a `.env` file by
//! the binary) with defaults suitable for local development.

use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 10005;
const DEFAULT_CONFIG_PATH: &str = "config.json";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Runtime configuration for a gateway process.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Service name, also recorded in the persisted configuration record.
    pub service_name: String,
    /// Listen address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Location of the persisted configuration record.
    pub config_path: PathBuf,
    /// Connect timeout used when a connection does not specify one.
    pub connect_timeout_secs: u64,
    /// Upper bound on a unary request.
    pub request_timeout_secs: u64,
    /// Origins allowed by CORS. Empty allows any origin.
    pub allowed_origins: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "persistence-service".to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            allowed_origins: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Loads configuration for `service` from the process environment.
    pub fn load_with_service(service: &str) -> Self {
        Self::from_lookup(service, |key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(service: &str, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse_u64 = |key: &str, default: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        Self {
            service_name: service.to_string(),
            host: lookup("SERVER_HOST").unwrap_or(defaults.host),
            port: lookup("SERVER_PORT")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.port),
            config_path: lookup("PERSISTENCE_CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.config_path),
            connect_timeout_secs: parse_u64("CONNECT_TIMEOUT_SECS", defaults.connect_timeout_secs),
            request_timeout_secs: parse_u64("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
            allowed_origins: lookup("CORS_ALLOWED_ORIGINS")
                .map(|v| split_origins(&v))
                .unwrap_or(defaults.allowed_origins),
        }
    }

    /// `host:port` listen address.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn allow_all_origins(&self) -> bool {
        self.allowed_origins.is_empty()
    }
}

/// Splits a comma separated origin list, dropping blanks.
pub fn split_origins(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_string)
        .collect()
}
