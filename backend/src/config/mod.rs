//! Process configuration.
//!
//! [`Config`] is assembled once at start-up from the environment and an
//! optional dotfile, then shared read-only (`Arc<Config>`) by every ingress.
//! Missing values are tolerated at load time; sections expose `require_*`
//! accessors that fail with [`ConfigError::Missing`] when the capability that
//! needs the value is constructed.

mod drivers;
mod duration;
mod sources;
mod watcher;

use std::path::{Path, PathBuf};
use std::time::Duration;

use mockable::Env;

pub use drivers::{
    Backoff, CacheDriver, DatabaseDriver, DriverKind, PubSubDriver, QueueDriver, StorageDriver,
};
pub use duration::parse_duration;
pub use sources::{Dotfile, parse_dotfile, read_dotfile};
pub use watcher::ConfigWatcher;

use sources::Sources;

const DEFAULT_DOTFILE: &str = ".env";
const REDIS_DEFAULT_PORT: u16 = 6379;
const APP_NAME: &str = "skeleton";
const PORT_EXPECTED: &str = "a TCP port number";
const COUNT_EXPECTED: &str = "a non-negative integer";
const WEIGHTS_EXPECTED: &str = "comma separated queue=weight pairs";
const HEADERS_EXPECTED: &str = "comma separated Name:value pairs";

/// Errors raised while loading configuration or constructing capabilities.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A value required by the capability being constructed is absent.
    #[error("missing required configuration value: {name}")]
    Missing { name: &'static str },
    /// A value is present but cannot be parsed.
    #[error("invalid value for {name}='{value}'; expected {expected}")]
    Invalid {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
    /// The dotfile exists but could not be read.
    #[error("failed to read dotfile at {path}: {source}")]
    DotfileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The dotfile contains a malformed line.
    #[error("failed to parse dotfile at {path}: {source}")]
    DotfileParse {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
    /// The dotfile watcher could not be installed.
    #[error("failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

fn require<'a>(value: Option<&'a String>, name: &'static str) -> Result<&'a str, ConfigError> {
    value
        .map(String::as_str)
        .ok_or(ConfigError::Missing { name })
}

/// Application-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub name: String,
    pub port: u16,
    /// Deadline attached to every HTTP request context.
    pub request_timeout: Duration,
    /// Time allowed for in-flight work to drain on shutdown.
    pub shutdown_timeout: Duration,
    pub dotfile: PathBuf,
    /// Shared secret for signed webhook deliveries; `/hook` is not mounted
    /// without it.
    pub webhook_secret: Option<String>,
}

/// Relational database settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub driver: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Database user; required by every SQL driver.
    ///
    /// # Errors
    /// [`ConfigError::Missing`] naming `DB_USERNAME` when unset.
    pub fn require_username(&self) -> Result<&str, ConfigError> {
        require(self.username.as_ref(), "DB_USERNAME")
    }

    /// Database name; required by every SQL driver.
    ///
    /// # Errors
    /// [`ConfigError::Missing`] naming `DB_NAME` when unset.
    pub fn require_name(&self) -> Result<&str, ConfigError> {
        require(self.name.as_ref(), "DB_NAME")
    }
}

/// Connection parameters shared by the Redis-backed drivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisEndpoint {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub db: i64,
}

impl RedisEndpoint {
    fn from_sources(
        sources: &Sources<'_>,
        host: &'static str,
        port: &'static str,
        password: &'static str,
        db: &'static str,
    ) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            host: sources.string_or(host, &defaults.host),
            port: sources.parse_or(port, defaults.port, PORT_EXPECTED)?,
            password: sources.optional(password),
            db: sources.parse_or(db, defaults.db, COUNT_EXPECTED)?,
        })
    }

    /// Connection URL in the form understood by the Redis client.
    #[must_use]
    pub fn url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{password}@{}:{}/{}",
                self.host, self.port, self.db
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

impl Default for RedisEndpoint {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: REDIS_DEFAULT_PORT,
            password: None,
            db: 0,
        }
    }
}

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub driver: String,
    pub redis: RedisEndpoint,
    /// Period of the in-memory sweeper that evicts expired entries.
    pub sweep_interval: Duration,
}

/// Job queue settings, shared by producers and the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub driver: String,
    pub redis: RedisEndpoint,
    /// Number of concurrent workers.
    pub concurrency: usize,
    /// Queue names with their relative selection weights.
    pub weights: Vec<(String, u32)>,
}

/// Object storage settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub driver: String,
    pub local_base_path: PathBuf,
    pub local_base_url: String,
    /// When set, local URLs carry an expiry and HMAC signature.
    pub local_signing_key: Option<String>,
    pub gcs_bucket: Option<String>,
    pub gcs_credentials: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
}

impl StorageConfig {
    /// # Errors
    /// [`ConfigError::Missing`] naming `STORAGE_GCS_BUCKET`.
    pub fn require_gcs_bucket(&self) -> Result<&str, ConfigError> {
        require(self.gcs_bucket.as_ref(), "STORAGE_GCS_BUCKET")
    }

    /// # Errors
    /// [`ConfigError::Missing`] naming the first absent S3 setting.
    pub fn require_s3_credentials(&self) -> Result<(&str, &str, &str), ConfigError> {
        Ok((
            require(self.s3_bucket.as_ref(), "STORAGE_S3_BUCKET")?,
            require(self.s3_access_key.as_ref(), "STORAGE_S3_ACCESS_KEY")?,
            require(self.s3_secret_key.as_ref(), "STORAGE_S3_SECRET_KEY")?,
        ))
    }

    /// MinIO is S3 compatible but has no default endpoint.
    ///
    /// # Errors
    /// [`ConfigError::Missing`] naming `STORAGE_S3_ENDPOINT`.
    pub fn require_s3_endpoint(&self) -> Result<&str, ConfigError> {
        require(self.s3_endpoint.as_ref(), "STORAGE_S3_ENDPOINT")
    }
}

/// Pub/sub settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubConfig {
    pub driver: String,
    pub redis: RedisEndpoint,
    /// Consumer name used when joining consumer groups.
    pub consumer: String,
    /// Pending deliveries idle for longer than this are redelivered.
    pub redelivery_idle: Duration,
}

/// Token issuer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenConfig {
    pub secret: Option<String>,
    pub issuer: String,
    pub expiry: Duration,
    /// How long after expiry a token may still be refreshed.
    pub refresh_window: Duration,
}

impl TokenConfig {
    /// # Errors
    /// [`ConfigError::Missing`] naming `JWT_SECRET_KEY`.
    pub fn require_secret(&self) -> Result<&str, ConfigError> {
        require(self.secret.as_ref(), "JWT_SECRET_KEY")
    }
}

/// Password hasher settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HasherConfig {
    /// Work factor; used as the Argon2 iteration count.
    pub cost: u32,
}

/// Symmetric encryption settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoConfig {
    pub key: Option<String>,
}

impl CryptoConfig {
    /// # Errors
    /// [`ConfigError::Missing`] naming `ENCRYPTION_KEY`.
    pub fn require_key(&self) -> Result<&str, ConfigError> {
        require(self.key.as_ref(), "ENCRYPTION_KEY")
    }
}

/// Outbound HTTP client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_wait: Duration,
    pub backoff: String,
    pub follow_redirect: bool,
    /// Headers sent with every request unless overridden per call.
    pub default_headers: Vec<(String, String)>,
}

/// Immutable process configuration.
///
/// # Examples
/// ```
/// use skeleton::config::Config;
///
/// let config = Config::default();
/// assert_eq!(config.app.port, 8080);
/// assert_eq!(config.cache.redis.port, 6379);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub storage: StorageConfig,
    pub pubsub: PubSubConfig,
    pub token: TokenConfig,
    pub hasher: HasherConfig,
    pub crypto: CryptoConfig,
    pub http_client: HttpClientConfig,
}

impl Default for Config {
    fn default() -> Self {
        let name = APP_NAME.to_owned();
        Self {
            app: AppConfig {
                name: name.clone(),
                port: 8080,
                request_timeout: Duration::from_secs(30),
                shutdown_timeout: Duration::from_secs(30),
                dotfile: PathBuf::from(DEFAULT_DOTFILE),
                webhook_secret: None,
            },
            database: DatabaseConfig {
                driver: String::new(),
                host: "localhost".to_owned(),
                port: 5432,
                username: None,
                password: None,
                name: None,
                max_connections: 10,
            },
            cache: CacheConfig {
                driver: String::new(),
                redis: RedisEndpoint::default(),
                sweep_interval: Duration::from_secs(60),
            },
            queue: QueueConfig {
                driver: String::new(),
                redis: RedisEndpoint::default(),
                concurrency: 10,
                weights: vec![
                    ("critical".to_owned(), 6),
                    ("default".to_owned(), 3),
                    ("low".to_owned(), 1),
                ],
            },
            storage: StorageConfig {
                driver: String::new(),
                local_base_path: PathBuf::from("storage"),
                local_base_url: "/storage".to_owned(),
                local_signing_key: None,
                gcs_bucket: None,
                gcs_credentials: None,
                s3_bucket: None,
                s3_region: "us-east-1".to_owned(),
                s3_endpoint: None,
                s3_access_key: None,
                s3_secret_key: None,
            },
            pubsub: PubSubConfig {
                driver: String::new(),
                redis: RedisEndpoint::default(),
                consumer: name.clone(),
                redelivery_idle: Duration::from_secs(30),
            },
            token: TokenConfig {
                secret: None,
                issuer: name,
                expiry: Duration::from_secs(24 * 3_600),
                refresh_window: Duration::from_secs(7 * 24 * 3_600),
            },
            hasher: HasherConfig { cost: 2 },
            crypto: CryptoConfig { key: None },
            http_client: HttpClientConfig {
                timeout: Duration::from_secs(30),
                max_retries: 3,
                retry_wait: Duration::from_secs(1),
                backoff: String::new(),
                follow_redirect: true,
                default_headers: Vec::new(),
            },
        }
    }
}

impl Config {
    /// Load configuration from the process environment and its dotfile.
    ///
    /// The dotfile path comes from `APP_DOTFILE` (default `.env`).
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the dotfile is unreadable or a value
    /// cannot be parsed.
    pub fn load<E: Env>(env: &E) -> Result<Self, ConfigError> {
        let path = env
            .string("APP_DOTFILE")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DOTFILE.to_owned());
        let dotfile = read_dotfile(Path::new(&path))?;
        Self::from_sources(env, &dotfile)
    }

    /// Build configuration from an environment and pre-parsed dotfile.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for unparsable values.
    ///
    /// # Examples
    /// ```
    /// use mockable::MockEnv;
    /// use skeleton::config::{Config, parse_dotfile};
    ///
    /// let mut env = MockEnv::new();
    /// env.expect_string().returning(|key| match key {
    ///     "APP_PORT" => Some("9090".to_owned()),
    ///     _ => None,
    /// });
    /// let dotfile = parse_dotfile("APP_PORT=7070\nDB_NAME=app\n").unwrap();
    ///
    /// let config = Config::from_sources(&env, &dotfile).unwrap();
    /// assert_eq!(config.app.port, 9090);
    /// assert_eq!(config.database.name.as_deref(), Some("app"));
    /// ```
    pub fn from_sources<E: Env>(env: &E, dotfile: &Dotfile) -> Result<Self, ConfigError> {
        Self::from_lookup(&|key: &str| env.string(key), dotfile)
    }

    /// Overlay values found through `lookup`, then the dotfile, on
    /// [`Config::default`].
    fn from_lookup(
        lookup: &dyn Fn(&str) -> Option<String>,
        dotfile: &Dotfile,
    ) -> Result<Self, ConfigError> {
        let sources = Sources::new(lookup, dotfile);
        let defaults = Self::default();
        let app = AppConfig {
            name: sources.string_or("APP_NAME", &defaults.app.name),
            port: sources.parse_or("APP_PORT", defaults.app.port, PORT_EXPECTED)?,
            request_timeout: sources.duration_or("APP_REQUEST_TIMEOUT", defaults.app.request_timeout)?,
            shutdown_timeout: sources.duration_or("APP_SHUTDOWN_TIMEOUT", defaults.app.shutdown_timeout)?,
            dotfile: sources.optional("APP_DOTFILE").map_or(defaults.app.dotfile, PathBuf::from),
            webhook_secret: sources.optional("WEBHOOK_SECRET"),
        };

        let database = DatabaseConfig {
            driver: sources.string_or("DB_DRIVER", &defaults.database.driver),
            host: sources.string_or("DB_HOST", &defaults.database.host),
            port: sources.parse_or("DB_PORT", defaults.database.port, PORT_EXPECTED)?,
            username: sources.optional("DB_USERNAME"),
            password: sources.optional("DB_PASSWORD"),
            name: sources.optional("DB_NAME"),
            max_connections: sources.parse_or("DB_MAX_CONNECTIONS", defaults.database.max_connections, COUNT_EXPECTED)?,
        };

        let cache = CacheConfig {
            driver: sources.string_or("CACHE_DRIVER", &defaults.cache.driver),
            redis: RedisEndpoint::from_sources(
                &sources,
                "CACHE_HOST",
                "CACHE_PORT",
                "CACHE_PASSWORD",
                "CACHE_DB",
            )?,
            sweep_interval: sources.duration_or("CACHE_SWEEP_INTERVAL", defaults.cache.sweep_interval)?,
        };

        let queue = QueueConfig {
            driver: sources.string_or("QUEUE_DRIVER", &defaults.queue.driver),
            redis: RedisEndpoint::from_sources(
                &sources,
                "QUEUE_HOST",
                "QUEUE_PORT",
                "QUEUE_PASSWORD",
                "QUEUE_DB",
            )?,
            concurrency: sources.parse_or("QUEUE_CONCURRENCY", defaults.queue.concurrency, COUNT_EXPECTED)?,
            weights: queue_weights(&sources)?.unwrap_or(defaults.queue.weights),
        };

        let storage = StorageConfig {
            driver: sources.string_or("STORAGE_DRIVER", &defaults.storage.driver),
            local_base_path: sources.optional("STORAGE_LOCAL_BASE_PATH").map_or(defaults.storage.local_base_path, PathBuf::from),
            local_base_url: sources.string_or("STORAGE_LOCAL_BASE_URL", &defaults.storage.local_base_url),
            local_signing_key: sources.optional("STORAGE_LOCAL_SIGNING_KEY"),
            gcs_bucket: sources.optional("STORAGE_GCS_BUCKET"),
            gcs_credentials: sources.optional("STORAGE_GCS_CREDENTIALS"),
            s3_bucket: sources.optional("STORAGE_S3_BUCKET"),
            s3_region: sources.string_or("STORAGE_S3_REGION", &defaults.storage.s3_region),
            s3_endpoint: sources.optional("STORAGE_S3_ENDPOINT"),
            s3_access_key: sources.optional("STORAGE_S3_ACCESS_KEY"),
            s3_secret_key: sources.optional("STORAGE_S3_SECRET_KEY"),
        };

        let pubsub = PubSubConfig {
            driver: sources.string_or("PUBSUB_DRIVER", &defaults.pubsub.driver),
            redis: RedisEndpoint::from_sources(
                &sources,
                "PUBSUB_HOST",
                "PUBSUB_PORT",
                "PUBSUB_PASSWORD",
                "PUBSUB_DB",
            )?,
            consumer: sources.string_or("PUBSUB_CONSUMER", &app.name),
            redelivery_idle: sources.duration_or("PUBSUB_REDELIVERY_IDLE", defaults.pubsub.redelivery_idle)?,
        };

        let token = TokenConfig {
            secret: sources.optional("JWT_SECRET_KEY"),
            issuer: sources.string_or("JWT_ISSUER", &app.name),
            expiry: sources.duration_or("JWT_EXPIRY", defaults.token.expiry)?,
            refresh_window: sources.duration_or("JWT_REFRESH_WINDOW", defaults.token.refresh_window)?,
        };

        let hasher = HasherConfig {
            cost: sources.parse_or("BCRYPT_COST", defaults.hasher.cost, COUNT_EXPECTED)?,
        };

        let crypto = CryptoConfig {
            key: sources.optional("ENCRYPTION_KEY"),
        };

        let http_client = HttpClientConfig {
            timeout: sources.duration_or("HTTP_CLIENT_TIMEOUT", defaults.http_client.timeout)?,
            max_retries: sources.parse_or("HTTP_CLIENT_MAX_RETRIES", defaults.http_client.max_retries, COUNT_EXPECTED)?,
            retry_wait: sources.duration_or("HTTP_CLIENT_RETRY_WAIT_TIME", defaults.http_client.retry_wait)?,
            backoff: sources.string_or("HTTP_CLIENT_BACKOFF", &defaults.http_client.backoff),
            follow_redirect: sources.flag_or("HTTP_CLIENT_FOLLOW_REDIRECT", defaults.http_client.follow_redirect)?,
            default_headers: sources
                .pairs("HTTP_CLIENT_HEADERS", ':', HEADERS_EXPECTED)?
                .unwrap_or(defaults.http_client.default_headers),
        };

        Ok(Self {
            app,
            database,
            cache,
            queue,
            storage,
            pubsub,
            token,
            hasher,
            crypto,
            http_client,
        })
    }
}

/// `None` when `QUEUE_WEIGHTS` is unset.
fn queue_weights(sources: &Sources<'_>) -> Result<Option<Vec<(String, u32)>>, ConfigError> {
    let Some(pairs) = sources.pairs("QUEUE_WEIGHTS", '=', WEIGHTS_EXPECTED)? else {
        return Ok(None);
    };
    pairs
        .into_iter()
        .map(|(name, weight)| match weight.parse::<u32>() {
            Ok(parsed) if parsed > 0 => Ok((name, parsed)),
            _ => Err(ConfigError::Invalid {
                name: "QUEUE_WEIGHTS",
                value: format!("{name}={weight}"),
                expected: WEIGHTS_EXPECTED,
            }),
        })
        .collect::<Result<_, _>>()
        .map(Some)
}

#[cfg(test)]
mod tests;
