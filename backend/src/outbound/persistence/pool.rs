//! Bounded PostgreSQL connection pool.
//!
//! Wraps `sqlx`'s pool with the limits the service configures. Connection
//! parameters are passed structurally so passwords never need URL escaping.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::config::{ConfigError, DatabaseConfig};

/// Errors that can occur while building the pool.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The server could not be reached or refused the credentials.
    #[error("failed to connect to database: {message}")]
    Connect { message: String },
}

impl PoolError {
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect {
            message: message.into(),
        }
    }
}

/// Configuration for the database connection pool.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use skeleton::outbound::persistence::PoolConfig;
///
/// let config = PoolConfig::new("localhost", 5432, "app", "app_db")
///     .with_max_size(20)
///     .with_acquire_timeout(Duration::from_secs(5));
/// assert_eq!(config.max_size(), 20);
/// assert_eq!(config.describe(), "localhost:5432/app_db");
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    host: String,
    port: u16,
    username: String,
    password: Option<String>,
    database: String,
    max_size: u32,
    min_idle: u32,
    acquire_timeout: Duration,
}

impl PoolConfig {
    /// Defaults: 10 connections, none kept idle, 30 second checkout timeout.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: None,
            database: database.into(),
            max_size: 10,
            min_idle: 0,
            acquire_timeout: Duration::from_secs(30),
        }
    }

    /// Build from the database section, requiring user and database name.
    ///
    /// # Errors
    /// [`ConfigError::Missing`] naming `DB_USERNAME` or `DB_NAME`.
    pub fn from_config(config: &DatabaseConfig) -> Result<Self, ConfigError> {
        let mut pool = Self::new(
            config.host.clone(),
            config.port,
            config.require_username()?,
            config.require_name()?,
        )
        .with_max_size(config.max_connections);
        pool.password.clone_from(&config.password);
        Ok(pool)
    }

    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// A size of zero is raised to one.
    #[must_use]
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    #[must_use]
    pub fn with_min_idle(mut self, min_idle: u32) -> Self {
        self.min_idle = min_idle;
        self
    }

    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    /// `host:port/database` for log lines.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }

    fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .database(&self.database);
        match &self.password {
            Some(password) => options.password(password),
            None => options,
        }
    }
}

/// Open the pool and wait for the first connection.
///
/// # Errors
/// [`PoolError::Connect`] when no connection can be established within the
/// acquire timeout.
pub async fn connect(config: &PoolConfig) -> Result<PgPool, PoolError> {
    PgPoolOptions::new()
        .max_connections(config.max_size)
        .min_connections(config.min_idle.min(config.max_size))
        .acquire_timeout(config.acquire_timeout)
        .connect_with(config.connect_options())
        .await
        .map_err(|err| PoolError::connect(err.to_string()))
}
