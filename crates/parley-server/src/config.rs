//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`parley.toml`, `/etc/parley/parley.toml`,
//!   `~/.config/parley/parley.toml`)
//! - Environment variables (`PARLEY_PORT`, `PARLEY_STORAGE__BACKEND`, ...),
//!   which override the file
//! - `PORT`, as the fallback for the listen port

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::info;

/// Default search paths for the configuration file.
const CONFIG_PATHS: [&str; 3] = [
    "parley.toml",
    "/etc/parley/parley.toml",
    "~/.config/parley/parley.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Dispatch queue configuration.
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Chat history endpoint configuration.
    #[serde(default)]
    pub history: HistoryConfig,

    /// Message persistence.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Dispatch queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Messages that may wait for the dispatcher before senders block.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

/// Chat history configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Messages returned when no limit is given.
    #[serde(default = "default_history_limit")]
    pub default_limit: usize,

    /// Upper bound on the requested limit.
    #[serde(default = "default_history_max")]
    pub max_limit: usize,
}

/// Storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Bounded in-process history, lost on restart.
    Memory,
    /// SQLite database file.
    Sqlite,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Which backend to use.
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,

    /// Database file for the SQLite backend.
    #[serde(default = "default_storage_path")]
    pub path: String,

    /// Records kept by the memory backend.
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080)
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_queue_capacity() -> usize {
    parley_core::hub::DEFAULT_QUEUE_CAPACITY
}

fn default_history_limit() -> usize {
    50
}

fn default_history_max() -> usize {
    500
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Memory
}

fn default_storage_path() -> String {
    "parley.db".to_string()
}

fn default_memory_capacity() -> usize {
    parley_core::store::DEFAULT_MEMORY_CAPACITY
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            dispatch: DispatchConfig::default(),
            history: HistoryConfig::default(),
            storage: StorageConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            default_limit: default_history_limit(),
            max_limit: default_history_max(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_storage_path(),
            memory_capacity: default_memory_capacity(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl HistoryConfig {
    /// Resolve a requested limit against the configured default and maximum.
    #[must_use]
    pub fn clamp(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .min(self.max_limit)
    }
}

impl Config {
    /// Load configuration from the first file found, overlaid with
    /// `PARLEY_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// environment override has the wrong type.
    pub fn load() -> Result<Self> {
        let file = CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists());

        if let Some(path) = &file {
            info!("Loading configuration from {}", path.display());
        }

        Self::layered(file.as_deref(), Self::environment())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Environment source: `PARLEY_` prefix, `__` between nested keys.
    fn environment() -> config::Environment {
        config::Environment::with_prefix("PARLEY")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn layered(file: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path));
        }

        builder
            .add_source(env)
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if `host:port` is not a valid socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }
}
