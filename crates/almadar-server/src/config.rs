//! RON configuration for the HTTP server

use crate::error::{Result, ServerError};
use almadar_core::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:8000")
    pub listen: String,
    /// Reported by `/health`
    pub environment: String,
    /// Directory of orbital schema files loaded at startup
    pub schema_dir: Option<PathBuf>,
    /// native_db file; records stay in memory when absent
    pub database: Option<PathBuf>,
    /// Evaluator and processor settings
    pub runtime: RuntimeConfig,
    /// Webhook integrators: service name -> URL
    pub integrators: BTreeMap<String, String>,
    /// Per-request timeout for webhook calls
    pub webhook_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8000".to_string(),
            environment: "development".to_string(),
            schema_dir: None,
            database: None,
            runtime: RuntimeConfig::default(),
            integrators: BTreeMap::new(),
            webhook_timeout_ms: 10_000,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a RON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ServerError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_ron(&content)
    }

    /// Parse configuration from RON text
    pub fn from_ron(content: &str) -> Result<Self> {
        ron::from_str(content).map_err(|e| ServerError::Config(e.to_string()))
    }

    /// Apply `ALMADAR_LISTEN` and `ALMADAR_ENV` from the process environment
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(listen) = lookup("ALMADAR_LISTEN").filter(|v| !v.is_empty()) {
            self.listen = listen;
        }
        if let Some(env) = lookup("ALMADAR_ENV").filter(|v| !v.is_empty()) {
            self.environment = env;
        }
        self
    }

    /// Parsed listen address
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid listen address '{}': {}", self.listen, e)))
    }
}
