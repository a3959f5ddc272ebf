//! `SQLite` connection pool and configuration.
//!
//! `SQLite` is the storage engine for simulation telemetry. It owns physical
//! storage and enforces every relational invariant of the schema: foreign
//! keys, uniqueness, timestep ordering and append-only triggers.
//!
//! Uses [`sqlx`] with runtime query construction (not compile-time checked)
//! to avoid requiring a live database at build time. All queries are
//! parameterized.
//!
//! File databases run in WAL mode so readers never block the writer. A
//! bounded busy timeout makes lock contention fail fast with a storage error
//! instead of blocking indefinitely.

use std::str::FromStr;
use std::time::Duration;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};

use crate::error::TelemetryError;

/// URL of a private in-memory database.
pub const IN_MEMORY_URL: &str = "sqlite::memory:";

/// Default maximum number of connections in the pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 8;

/// Default time to wait for a pooled connection, in seconds.
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;

/// Default time a writer waits on a locked database, in seconds.
const DEFAULT_BUSY_TIMEOUT_SECS: u64 = 5;

/// Default idle timeout in seconds.
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

/// Configuration for the `SQLite` connection pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// `SQLite` connection URL.
    ///
    /// Format: `sqlite://path/to/telemetry.db` or `sqlite::memory:`
    pub url: String,
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Time to wait for a pooled connection.
    pub acquire_timeout: Duration,
    /// Time a statement waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// Idle connection timeout. `None` keeps idle connections forever.
    pub idle_timeout: Option<Duration>,
}

impl StoreConfig {
    /// Create a new configuration from a database URL.
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_owned(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            busy_timeout: Duration::from_secs(DEFAULT_BUSY_TIMEOUT_SECS),
            idle_timeout: Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)),
        }
    }

    /// Configuration for a private in-memory database.
    ///
    /// Every `SQLite` in-memory connection is its own database, so the pool
    /// holds exactly one connection and never retires it.
    pub fn in_memory() -> Self {
        Self {
            max_connections: 1,
            idle_timeout: None,
            ..Self::new(IN_MEMORY_URL)
        }
    }

    /// Whether the URL names an in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }

    /// Set the maximum number of connections.
    #[must_use]
    pub const fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the pool acquire timeout.
    #[must_use]
    pub const fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the busy timeout for locked databases.
    #[must_use]
    pub const fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Set the idle connection timeout.
    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

/// Connection pool handle to the telemetry database.
///
/// Wraps a [`sqlx::SqlitePool`]. Cloning is cheap and every clone shares the
/// same pool, so one handle can be shared process-wide.
#[derive(Debug, Clone)]
pub struct TelemetryPool {
    pool: SqlitePool,
}

impl TelemetryPool {
    /// Open the database described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Storage`] if the URL is invalid or the
    /// database cannot be opened.
    pub async fn connect(config: &StoreConfig) -> Result<Self, TelemetryError> {
        let mut connect_options = SqliteConnectOptions::from_str(&config.url)?
            .foreign_keys(true)
            .busy_timeout(config.busy_timeout);

        if !config.is_in_memory() {
            connect_options = connect_options
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout);
        if config.is_in_memory() {
            // Dropping the only connection would drop the database with it.
            pool_options = pool_options
                .min_connections(1)
                .max_lifetime(None::<Duration>);
        }

        let pool = pool_options.connect_with(connect_options).await?;

        tracing::info!(
            url = config.url.as_str(),
            max_connections = config.max_connections,
            "Connected to SQLite"
        );

        Ok(Self { pool })
    }

    /// Open a database URL with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError`] if the connection fails.
    pub async fn connect_url(url: &str) -> Result<Self, TelemetryError> {
        let config = StoreConfig::new(url);
        Self::connect(&config).await
    }

    /// Open a fresh in-memory database and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError`] if the connection or a migration fails.
    pub async fn in_memory() -> Result<Self, TelemetryError> {
        let pool = Self::connect(&StoreConfig::in_memory()).await?;
        pool.run_migrations().await?;
        Ok(pool)
    }

    /// Run all pending migrations from the `migrations/` directory.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Migration`] if any migration fails.
    pub async fn run_migrations(&self) -> Result<(), TelemetryError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Database migrations completed");
        Ok(())
    }

    /// Return a reference to the underlying [`SqlitePool`].
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close all connections in the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("SQLite pool closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_config_uses_single_connection() {
        let config = StoreConfig::in_memory();
        assert!(config.is_in_memory());
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.idle_timeout, None);
    }

    #[test]
    fn file_config_keeps_defaults() {
        let config = StoreConfig::new("sqlite://telemetry.db")
            .with_max_connections(4)
            .with_busy_timeout(Duration::from_millis(250));
        assert!(!config.is_in_memory());
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.busy_timeout, Duration::from_millis(250));
        assert_eq!(
            config.idle_timeout,
            Some(Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS))
        );
    }
}
