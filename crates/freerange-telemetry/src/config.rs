//! Configuration loading for the telemetry store.
//!
//! Configuration is a YAML document with a single `database` section. Every
//! field has a default, so an empty document describes a private in-memory
//! store with migrations applied on open:
//!
//! ```yaml
//! database:
//!   url: "sqlite://telemetry.db"
//!   max_connections: 8
//!   acquire_timeout_ms: 5000
//!   busy_timeout_ms: 5000
//!   idle_timeout_secs: 300
//!   run_migrations: true
//! ```
//!
//! The `DATABASE_URL` environment variable overrides `database.url` when the
//! configuration is loaded from a file.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::TelemetryError;
use crate::sqlite::{IN_MEMORY_URL, StoreConfig, TelemetryPool};

/// Environment variable that overrides `database.url`.
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level telemetry configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TelemetryConfig {
    /// Database connection settings.
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl TelemetryConfig {
    /// Load configuration from a YAML file, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::parse(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string. No overrides are applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yml::from_str(yaml)?)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(DATABASE_URL_VAR) {
            self.database.url = url;
        }
    }

    /// Build the pool settings described by this configuration.
    pub fn store_config(&self) -> StoreConfig {
        let db = &self.database;
        let config = StoreConfig::new(&db.url);
        if config.is_in_memory() {
            // An in-memory store only exists on its single connection.
            return StoreConfig::in_memory()
                .with_acquire_timeout(Duration::from_millis(db.acquire_timeout_ms))
                .with_busy_timeout(Duration::from_millis(db.busy_timeout_ms));
        }
        config
            .with_max_connections(db.max_connections)
            .with_acquire_timeout(Duration::from_millis(db.acquire_timeout_ms))
            .with_busy_timeout(Duration::from_millis(db.busy_timeout_ms))
            .with_idle_timeout(db.idle_timeout_secs.map(Duration::from_secs))
    }

    /// Connect to the configured store, applying migrations if enabled.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError`] if the connection or a migration fails.
    pub async fn open(&self) -> Result<TelemetryPool, TelemetryError> {
        let pool = TelemetryPool::connect(&self.store_config()).await?;
        if self.database.run_migrations {
            pool.run_migrations().await?;
        }
        Ok(pool)
    }
}

/// Database connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    /// `SQLite` connection URL.
    #[serde(default = "default_url")]
    pub url: String,

    /// Maximum pooled connections. Ignored for in-memory stores.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Milliseconds to wait for a pooled connection.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Milliseconds a statement waits on a locked database.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Seconds before an idle connection is closed. `null` keeps it open.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: Option<u64>,

    /// Whether [`TelemetryConfig::open`] applies pending migrations.
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            max_connections: default_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            busy_timeout_ms: default_busy_timeout_ms(),
            idle_timeout_secs: default_idle_timeout_secs(),
            run_migrations: default_run_migrations(),
        }
    }
}

fn default_url() -> String {
    IN_MEMORY_URL.to_owned()
}
const fn default_max_connections() -> u32 {
    8
}
const fn default_acquire_timeout_ms() -> u64 {
    5_000
}
const fn default_busy_timeout_ms() -> u64 {
    5_000
}
const fn default_idle_timeout_secs() -> Option<u64> {
    Some(300)
}
const fn default_run_migrations() -> bool {
    true
}
