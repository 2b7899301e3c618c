//! Driver selectors for the pluggable capabilities.
//!
//! Configuration keeps the raw driver string; registries resolve it through
//! [`DriverKind::select`] so the fallback is logged once logging is up.

use std::fmt;

use tracing::{info, warn};

/// A closed set of drivers for one capability.
pub trait DriverKind: Sized + Copy + Default + fmt::Display {
    /// Capability name used in log events.
    const CAPABILITY: &'static str;

    /// Recognise a configured driver name.
    fn parse(raw: &str) -> Option<Self>;

    /// Resolve a configured name, falling back to the default driver.
    fn select(raw: &str) -> Self {
        let trimmed = raw.trim();
        if let Some(driver) = Self::parse(&trimmed.to_ascii_lowercase()) {
            return driver;
        }
        let fallback = Self::default();
        if trimmed.is_empty() {
            info!(
                capability = Self::CAPABILITY,
                driver = %fallback,
                "no driver configured; using default"
            );
        } else {
            warn!(
                capability = Self::CAPABILITY,
                requested = trimmed,
                driver = %fallback,
                "unknown driver; using default"
            );
        }
        fallback
    }
}

macro_rules! driver_enum {
    (
        $(#[$outer:meta])*
        $name:ident, $capability:literal {
            $(
                $(#[$meta:meta])*
                $variant:ident => $label:literal $(| $alias:literal)*
            ),+ $(,)?
        }
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
        pub enum $name {
            $(
                $(#[$meta])*
                $variant,
            )+
        }

        impl DriverKind for $name {
            const CAPABILITY: &'static str = $capability;

            fn parse(raw: &str) -> Option<Self> {
                match raw {
                    $( $label $(| $alias)* => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let label = match self {
                    $( Self::$variant => $label, )+
                };
                f.write_str(label)
            }
        }
    };
}

driver_enum! {
    /// Cache backends.
    CacheDriver, "cache" {
        #[default]
        Memory => "memory",
        Redis => "redis",
    }
}

driver_enum! {
    /// Delayed job queue backends.
    QueueDriver, "queue" {
        #[default]
        Memory => "memory",
        /// Redis-backed queue with scheduled sets and uniqueness locks.
        AsyncQueue => "async-queue" | "asynq" | "redis",
    }
}

driver_enum! {
    /// Object storage backends.
    StorageDriver, "storage" {
        #[default]
        Local => "local",
        Gcs => "gcs",
        S3 => "s3",
        Minio => "minio",
    }
}

driver_enum! {
    /// Relational database backends.
    DatabaseDriver, "database" {
        #[default]
        Postgres => "postgres" | "postgresql" | "pgx",
    }
}

driver_enum! {
    /// Pub/sub transports.
    PubSubDriver, "pubsub" {
        #[default]
        Memory => "memory",
        Redis => "redis",
    }
}

driver_enum! {
    /// Retry wait policy for the outbound HTTP client.
    Backoff, "http_client" {
        #[default]
        Exponential => "exponential",
        Constant => "constant",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("redis", CacheDriver::Redis)]
    #[case(" Redis ", CacheDriver::Redis)]
    #[case("", CacheDriver::Memory)]
    #[case("memcached", CacheDriver::Memory)]
    fn cache_selection_falls_back(#[case] raw: &str, #[case] expected: CacheDriver) {
        assert_eq!(CacheDriver::select(raw), expected);
    }

    #[rstest]
    #[case("asynq", QueueDriver::AsyncQueue)]
    #[case("async-queue", QueueDriver::AsyncQueue)]
    #[case("sqs", QueueDriver::Memory)]
    fn queue_aliases(#[case] raw: &str, #[case] expected: QueueDriver) {
        assert_eq!(QueueDriver::select(raw), expected);
    }

    #[test]
    fn display_uses_canonical_label() {
        assert_eq!(QueueDriver::AsyncQueue.to_string(), "async-queue");
        assert_eq!(DatabaseDriver::select("pgx").to_string(), "postgres");
    }
}
