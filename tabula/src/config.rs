//! Configuration management using Figment
//!
//! Configuration is loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: `TABULA_`, nested keys separated by `__`)
//! 2. Current working directory: ./tabula.toml
//! 3. XDG config directory: ~/.config/tabula/{app_name}/tabula.toml
//! 4. System directory: /etc/tabula/{app_name}/tabula.toml
//! 5. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;

/// Config file name searched in every location
pub const CONFIG_FILE: &str = "tabula.toml";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "TABULA_";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Application-level settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// Database connection
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Migration sources
    #[serde(default)]
    pub migrations: MigrationsConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Application name, used for the XDG config lookup and log context
    #[serde(default = "default_name")]
    pub name: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

/// Supported database management systems
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dbms {
    /// SQLite through sqlx
    #[default]
    Sqlite,
    /// In-process store, nothing persisted
    Memory,
}

impl fmt::Display for Dbms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite => write!(f, "sqlite"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Which backend to build
    #[serde(default)]
    pub dbms: Dbms,

    /// Connection URL (ignored by the memory backend)
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum pool connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum idle pool connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,

    /// Connection retries before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay between retries in seconds, doubled on every attempt
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Log every statement at debug level
    #[serde(default)]
    pub debug: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            dbms: Dbms::default(),
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout_secs: default_connection_timeout(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay(),
            debug: false,
        }
    }
}

impl DatabaseConfig {
    /// An in-memory SQLite database
    pub fn sqlite_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_retries: 0,
            ..Self::default()
        }
    }

    /// The in-process memory backend
    pub fn memory() -> Self {
        Self {
            dbms: Dbms::Memory,
            url: String::new(),
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Connection acquire timeout
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    /// Base retry delay
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

/// Migration file settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Directory holding `<name>.up.sql` / `<name>.down.sql` files
    #[serde(default = "default_migrations_dir")]
    pub directory: PathBuf,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: default_migrations_dir(),
        }
    }
}

fn default_name() -> String {
    "tabula".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_database_url() -> String {
    "sqlite://tabula.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    0
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    1
}

fn default_migrations_dir() -> PathBuf {
    PathBuf::from("migrations")
}

impl Config {
    /// Load configuration from all sources
    ///
    /// Searches for config files in this order (first found wins):
    /// 1. Current working directory: ./tabula.toml
    /// 2. XDG config directory: ~/.config/tabula/{app_name}/tabula.toml
    /// 3. System directory: /etc/tabula/{app_name}/tabula.toml
    ///
    /// Environment variables (`TABULA_` prefix) override all file-based configs.
    pub fn load() -> Result<Self> {
        let app_name = std::env::current_exe()
            .ok()
            .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(default_name);

        Self::load_for_app(&app_name)
    }

    /// Load configuration for a specific application name
    pub fn load_for_app(app_name: &str) -> Result<Self> {
        let config_paths = Self::find_config_paths(app_name);

        tracing::debug!("Searching for config files in order:");
        for path in &config_paths {
            tracing::debug!("  - {}", path.display());
        }

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // Lowest priority first so that higher priority files override
        for path in config_paths.iter().rev() {
            if path.exists() {
                tracing::info!("Loading configuration from: {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        let config = figment.merge(Self::env()).extract()?;
        Ok(config)
    }

    /// Load configuration from a specific file, bypassing the search path.
    ///
    /// Environment variables still override the file.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Self::env())
            .extract()?;

        Ok(config)
    }

    fn env() -> Env {
        Env::prefixed(ENV_PREFIX).split("__")
    }

    /// Candidate config file paths, highest priority first
    fn find_config_paths(app_name: &str) -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE)];

        let xdg_dirs = xdg::BaseDirectories::with_prefix("tabula");
        if let Some(path) = xdg_dirs.find_config_file(Path::new(app_name).join(CONFIG_FILE)) {
            paths.push(path);
        }

        paths.push(PathBuf::from("/etc/tabula").join(app_name).join(CONFIG_FILE));

        paths
    }
}
