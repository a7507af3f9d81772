//! Configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use tether_db::{ConnectionParams, DEFAULT_DATABASE_URI};
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database and migration settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// SQL debug panel settings.
    #[serde(default)]
    pub debug: DebugConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database URI, e.g. `sqlite:///app.db` or `sqlite:///:memory:`.
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Driver options applied to every pooled connection.
    #[serde(default)]
    pub connection_params: ConnectionParams,

    /// Model names left out of [`Tether::models`](crate::Tether::models).
    #[serde(default)]
    pub models_ignore: Vec<String>,

    /// Disables per-request connection handling. Forced on for in-memory
    /// databases.
    #[serde(default)]
    pub manual: bool,

    /// Directory holding migration files.
    #[serde(default = "default_migrations")]
    pub migrations: String,

    /// Only models declared under this module path are listed. Empty means
    /// no filter.
    #[serde(default)]
    pub models_module: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "tether_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Debug panel configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DebugConfig {
    /// Captures SQL and mounts the `/_debug` routes.
    #[serde(default)]
    pub enabled: bool,

    /// Key used to sign replayable queries. Required when enabled.
    #[serde(default)]
    pub secret_key: Option<String>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_uri() -> String {
    DEFAULT_DATABASE_URI.to_string()
}

fn default_migrations() -> String {
    "migrations".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            connection_params: ConnectionParams::default(),
            models_ignore: Vec::new(),
            manual: false,
            migrations: default_migrations(),
            models_module: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides (see [`apply_overrides`]).
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies overrides looked up by variable name:
/// - `TETHER_HOST`, `TETHER_PORT` override `server.*`
/// - `TETHER_DATABASE_URI` overrides `database.uri`
/// - `TETHER_MODELS_IGNORE` overrides `database.models_ignore` (comma list)
/// - `TETHER_MANUAL` overrides `database.manual`
/// - `TETHER_MIGRATIONS` overrides `database.migrations`
/// - `TETHER_MODELS_MODULE` overrides `database.models_module`
/// - `TETHER_LOG_LEVEL`, `TETHER_LOG_JSON` override `logging.*`
/// - `TETHER_DEBUG`, `TETHER_SECRET_KEY` override `debug.*`
///
/// Boolean variables are true when set to `true` or `1`. Unparseable host
/// and port values are ignored.
pub fn apply_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let flag = |value: String| value == "true" || value == "1";

    if let Some(host) = lookup("TETHER_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Some(port) = lookup("TETHER_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Some(uri) = lookup("TETHER_DATABASE_URI") {
        config.database.uri = uri;
    }
    if let Some(ignore) = lookup("TETHER_MODELS_IGNORE") {
        config.database.models_ignore = ignore
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(manual) = lookup("TETHER_MANUAL") {
        config.database.manual = flag(manual);
    }
    if let Some(migrations) = lookup("TETHER_MIGRATIONS") {
        config.database.migrations = migrations;
    }
    if let Some(module) = lookup("TETHER_MODELS_MODULE") {
        config.database.models_module = module;
    }
    if let Some(level) = lookup("TETHER_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = lookup("TETHER_LOG_JSON") {
        config.logging.json = flag(json);
    }
    if let Some(enabled) = lookup("TETHER_DEBUG") {
        config.debug.enabled = flag(enabled);
    }
    if let Some(secret) = lookup("TETHER_SECRET_KEY") {
        config.debug.secret_key = Some(secret);
    }
}
