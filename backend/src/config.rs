//! Engine configuration file support.
//!
//! Configuration is read from `pinning.toml` and may be overridden through
//! environment variables, so a container can reuse one file across stages.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::db::repository::RepositoryError;
use crate::db::{PostgresConfig, RepositoryType};
use crate::models::PinningWindow;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("No pinning.toml found in standard locations")]
    NotFound,

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PinningConfig {
    #[serde(default)]
    pub repository: RepositorySettings,
    #[serde(default)]
    pub postgres: PostgresSettings,
    #[serde(default)]
    pub feed: FeedSettings,
    #[serde(default)]
    pub pinning: PinningSettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub catalog: CatalogSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

/// Repository type settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySettings {
    #[serde(rename = "type", default = "default_repo_type")]
    pub repo_type: String,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            repo_type: default_repo_type(),
        }
    }
}

fn default_repo_type() -> String {
    "local".to_string()
}

/// Postgres connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresSettings {
    #[serde(default)]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for PostgresSettings {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout: default_connect_timeout(),
            idle_timeout: default_idle_timeout(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_max_connections() -> u32 {
    4
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_idle_timeout() -> u64 {
    600
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    100
}

/// Preferences feed settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSettings {
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_search_path")]
    pub search_path: String,
    /// Query parameter carrying the watermark.
    #[serde(default = "default_since_param")]
    pub since_param: String,
    /// Request timeout. No timeout when unset.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            search_path: default_search_path(),
            since_param: default_since_param(),
            timeout_secs: None,
        }
    }
}

fn default_search_path() -> String {
    "/preferences/search/findViews".to_string()
}

fn default_since_param() -> String {
    "lastUpdate".to_string()
}

impl FeedSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Pinning behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinningSettings {
    /// Full width of the pinning window in minutes.
    #[serde(default = "default_minutes")]
    pub minutes: u32,
    /// Statements queued before a batcher flushes on its own.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Key of the cross-process advisory lock.
    #[serde(default = "default_lock_key")]
    pub lock_key: i64,
    #[serde(default = "default_mapping_file")]
    pub mapping_file: PathBuf,
}

impl Default for PinningSettings {
    fn default() -> Self {
        Self {
            minutes: default_minutes(),
            batch_size: default_batch_size(),
            lock_key: default_lock_key(),
            mapping_file: default_mapping_file(),
        }
    }
}

fn default_minutes() -> u32 {
    1
}

fn default_batch_size() -> usize {
    500
}

fn default_lock_key() -> i64 {
    0x5049_4e53
}

fn default_mapping_file() -> PathBuf {
    PathBuf::from("layers.csv")
}

impl PinningSettings {
    pub fn window(&self) -> PinningWindow {
        PinningWindow::from_minutes(self.minutes)
    }
}

/// Periodic triggers run by the server binary. Disabled when unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleSettings {
    #[serde(default)]
    pub incremental_interval_secs: Option<u64>,
    #[serde(default)]
    pub reset_interval_secs: Option<u64>,
}

/// Static layer catalog entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSettings {
    #[serde(default)]
    pub layers: Vec<CatalogLayer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogLayer {
    pub workspace: String,
    pub name: String,
    pub table: String,
    pub temporal_attribute: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl PinningConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn from_toml_str(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load configuration from the default location.
    ///
    /// Searches for `pinning.toml` in:
    /// 1. Current directory
    /// 2. `backend/` directory
    /// 3. Parent directory
    pub fn from_default_location() -> Result<Self, ConfigError> {
        let search_paths = [
            PathBuf::from("pinning.toml"),
            PathBuf::from("backend/pinning.toml"),
            PathBuf::from("../pinning.toml"),
        ];

        for path in search_paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(ConfigError::NotFound)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by environment variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL") {
            self.postgres.database_url = url;
        }
        if let Some(url) = lookup("PINNING_FEED_URL") {
            self.feed.base_url = url;
        }
        if let Some(repo_type) = lookup("REPOSITORY_TYPE") {
            self.repository.repo_type = repo_type;
        }
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        if let Some(minutes) = lookup("PINNING_MINUTES") {
            self.pinning.minutes = parse_override("PINNING_MINUTES", &minutes)?;
        }
        if let Some(port) = lookup("PORT") {
            self.server.port = parse_override("PORT", &port)?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pinning.minutes == 0 {
            return Err(ConfigError::Invalid {
                key: "pinning.minutes".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.pinning.batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "pinning.batch_size".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Get the repository type from configuration.
    pub fn repository_type(&self) -> Result<RepositoryType, String> {
        RepositoryType::from_str(&self.repository.repo_type)
    }

    /// Convert to PostgresConfig if this is a Postgres configuration.
    #[cfg(feature = "postgres-repo")]
    pub fn to_postgres_config(&self) -> Result<Option<PostgresConfig>, RepositoryError> {
        let repo_type = self.repository_type().map_err(|e| {
            RepositoryError::configuration(format!("Invalid repository type: {}", e))
        })?;

        if repo_type != RepositoryType::Postgres {
            return Ok(None);
        }

        if self.postgres.database_url.is_empty() {
            return Err(RepositoryError::configuration(
                "Postgres repository requires 'postgres.database_url' setting",
            ));
        }

        Ok(Some(PostgresConfig {
            database_url: self.postgres.database_url.clone(),
            max_pool_size: self.postgres.max_connections,
            min_pool_size: self.postgres.min_connections,
            connection_timeout_sec: self.postgres.connect_timeout,
            idle_timeout_sec: self.postgres.idle_timeout,
            max_retries: self.postgres.max_retries,
            retry_delay_ms: self.postgres.retry_delay_ms,
        }))
    }

    /// Convert to PostgresConfig when the feature is disabled.
    #[cfg(not(feature = "postgres-repo"))]
    pub fn to_postgres_config(&self) -> Result<Option<PostgresConfig>, RepositoryError> {
        let repo_type = self.repository_type().map_err(|e| {
            RepositoryError::configuration(format!("Invalid repository type: {}", e))
        })?;

        if repo_type == RepositoryType::Postgres {
            return Err(RepositoryError::configuration(
                "Postgres repository feature not enabled",
            ));
        }

        Ok(None)
    }
}

fn parse_override<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
        key: key.to_string(),
        message: e.to_string(),
    })
}
