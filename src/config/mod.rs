//! Configuration module for Foundry
//!
//! Layers, lowest to highest priority: built-in defaults, an optional TOML
//! file, then `FOUNDRY__SECTION__KEY` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "FOUNDRY";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Job execution engine configuration
    #[serde(default)]
    pub engine: EngineConfig,

    /// Task backend configuration
    #[serde(default)]
    pub backend: BackendConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: true,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database
    pub path: Option<String>,
}

impl DatabaseConfig {
    pub fn get_path(&self) -> PathBuf {
        if let Some(path) = &self.path {
            PathBuf::from(path)
        } else {
            get_data_dir().join("foundry.db")
        }
    }
}

/// Job execution engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of concurrent workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Capacity of the in-process job queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Timeout for a single backend call in seconds
    #[serde(default = "default_backend_timeout")]
    pub backend_timeout_secs: u64,

    /// Interval between sweeps for pending jobs in milliseconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// How long to keep retrying storage errors when finishing a job
    #[serde(default = "default_storage_retry_deadline")]
    pub storage_retry_deadline_secs: u64,
}

fn default_workers() -> usize {
    4
}
fn default_queue_capacity() -> usize {
    256
}
fn default_backend_timeout() -> u64 {
    300
}
fn default_sweep_interval() -> u64 {
    5000
}
fn default_storage_retry_deadline() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            backend_timeout_secs: default_backend_timeout(),
            sweep_interval_ms: default_sweep_interval(),
            storage_retry_deadline_secs: default_storage_retry_deadline(),
        }
    }
}

/// Task backend configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    /// URL the task requests are POSTed to
    pub endpoint: Option<String>,

    /// Name of the environment variable holding the bearer token
    pub api_key_env: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directives used when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_filter() -> String {
    "foundry=info,tower_http=debug".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

impl Config {
    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Get the data directory for Foundry
pub fn get_data_dir() -> PathBuf {
    if let Some(data_dir) = dirs::data_dir() {
        data_dir.join("foundry")
    } else {
        // Fallback to home directory
        dirs::home_dir()
            .map(|h| h.join(".foundry"))
            .unwrap_or_else(|| PathBuf::from(".foundry"))
    }
}

/// Get the config directory for Foundry
pub fn get_config_dir() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        config_dir.join("foundry")
    } else {
        get_data_dir()
    }
}

/// Config file location: `$FOUNDRY_CONFIG`, else `<config dir>/foundry/config.toml`
pub fn config_file_path() -> PathBuf {
    std::env::var_os("FOUNDRY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| get_config_dir().join("config.toml"))
}

/// Load configuration from the default file location and the environment
pub fn load_config() -> Result<Config, config::ConfigError> {
    load_config_from(&config_file_path())
}

/// Load configuration from a specific file (which may be absent) and the environment
pub fn load_config_from(path: &Path) -> Result<Config, config::ConfigError> {
    load_layers(path, ENV_PREFIX)
}

fn load_layers(path: &Path, env_prefix: &str) -> Result<Config, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}

/// Save configuration to the default file location
pub fn save_config(config: &Config) -> anyhow::Result<PathBuf> {
    let config_path = config_file_path();
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    std::fs::write(&config_path, config.to_toml()?)?;
    Ok(config_path)
}
