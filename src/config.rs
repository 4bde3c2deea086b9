//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::ApiConfig;
use crate::routing::{RouterConfig, SelectionPolicy};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Empty allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

impl From<&ServerConfig> for ApiConfig {
    fn from(server: &ServerConfig) -> Self {
        ApiConfig {
            host: server.host.clone(),
            port: server.port,
            cors_origins: server.cors_origins.clone(),
        }
    }
}

/// Routing and relay configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,

    #[serde(default = "default_queue_capacity")]
    pub backend_queue_capacity: usize,

    #[serde(default)]
    pub selection: SelectionPolicy,

    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    #[serde(default = "default_emit_disconnect")]
    pub emit_disconnect: bool,
}

fn default_handshake_timeout() -> u64 {
    5000 // 5 seconds
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_max_message_bytes() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_emit_disconnect() -> bool {
    true
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout(),
            backend_queue_capacity: default_queue_capacity(),
            selection: SelectionPolicy::default(),
            max_message_bytes: default_max_message_bytes(),
            emit_disconnect: default_emit_disconnect(),
        }
    }
}

impl From<&RoutingConfig> for RouterConfig {
    fn from(routing: &RoutingConfig) -> Self {
        RouterConfig {
            handshake_timeout: Duration::from_millis(routing.handshake_timeout_ms),
            // A zero-capacity channel cannot be created
            backend_queue_capacity: routing.backend_queue_capacity.max(1),
            selection: routing.selection,
            max_message_bytes: routing.max_message_bytes,
            emit_disconnect: routing.emit_disconnect,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("tunnelhub").join("config.toml")),
            Some(PathBuf::from("/etc/tunnelhub/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Router settings derived from the routing section
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig::from(&self.routing)
    }

    /// Server settings derived from the server section
    pub fn api_config(&self) -> ApiConfig {
        ApiConfig::from(&self.server)
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server overrides
        if let Some(host) = lookup("TUNNELHUB_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("TUNNELHUB_PORT") {
            match port.parse() {
                Ok(p) => self.server.port = p,
                Err(_) => tracing::warn!("Ignoring invalid TUNNELHUB_PORT: {}", port),
            }
        }

        // Routing overrides
        if let Some(timeout) = lookup("TUNNELHUB_HANDSHAKE_TIMEOUT_MS") {
            match timeout.parse() {
                Ok(ms) => self.routing.handshake_timeout_ms = ms,
                Err(_) => tracing::warn!(
                    "Ignoring invalid TUNNELHUB_HANDSHAKE_TIMEOUT_MS: {}",
                    timeout
                ),
            }
        }
        if let Some(selection) = lookup("TUNNELHUB_SELECTION") {
            match selection.parse() {
                Ok(policy) => self.routing.selection = policy,
                Err(e) => tracing::warn!("Ignoring TUNNELHUB_SELECTION: {}", e),
            }
        }

        // Logging overrides
        if let Some(level) = lookup("TUNNELHUB_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("TUNNELHUB_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Tunnelhub Configuration
#
# Environment variables override these settings:
# - TUNNELHUB_HOST
# - TUNNELHUB_PORT
# - TUNNELHUB_HANDSHAKE_TIMEOUT_MS
# - TUNNELHUB_SELECTION
# - TUNNELHUB_LOG_LEVEL
# - TUNNELHUB_LOG_FORMAT

[server]
# Host to bind to
host = "0.0.0.0"

# Port to listen on
port = 8090

# Allowed CORS origins (empty allows any)
cors_origins = []

[routing]
# How long a backend has to approve a connection (ms)
handshake_timeout_ms = 5000

# Envelopes a backend may have queued before new ones are refused
backend_queue_capacity = 10000

# Backend selection: first_match or round_robin
selection = "first_match"

# Largest client message relayed (bytes)
max_message_bytes = 1048576

# Tell the backend when an approved client disconnects
emit_disconnect = true

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
