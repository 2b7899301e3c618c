//! Cache drivers and their registry.

mod memory;
mod redis;

use std::sync::Arc;

pub use memory::MemoryCache;
pub use redis::RedisCache;

use crate::config::{CacheConfig, CacheDriver, DriverKind};
use crate::domain::ports::Cache;
use crate::outbound::InitError;
use crate::outbound::redis_pool::{connect, describe};
use crate::outbound::registry::announce;

/// Construct the configured cache. Network drivers are pinged first.
///
/// # Errors
/// [`InitError::Connect`] when Redis is unreachable.
pub async fn registry_cache(config: &CacheConfig) -> Result<Arc<dyn Cache>, InitError> {
    let driver = CacheDriver::select(&config.driver);
    match driver {
        CacheDriver::Memory => announce(
            "Registry.Cache",
            driver,
            &format!("sweep_interval={:?}", config.sweep_interval),
            Ok(Arc::new(MemoryCache::new(config.sweep_interval)) as Arc<dyn Cache>),
        ),
        CacheDriver::Redis => {
            let result = connect(&config.redis)
                .await
                .map(|pool| Arc::new(RedisCache::new(pool)) as Arc<dyn Cache>)
                .map_err(|message| InitError::connect("cache", driver, message));
            announce("Registry.Cache", driver, &describe(&config.redis), result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisEndpoint;
    use std::time::Duration;

    fn config(driver: &str) -> CacheConfig {
        CacheConfig {
            driver: driver.to_owned(),
            redis: RedisEndpoint {
                host: "127.0.0.1".to_owned(),
                port: 1,
                ..RedisEndpoint::default()
            },
            sweep_interval: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn unknown_driver_falls_back_to_memory() {
        let cache = registry_cache(&config("memcached")).await.expect("memory cache");
        cache.ping().await.expect("ping");
    }

    #[tokio::test]
    async fn unreachable_redis_is_fatal() {
        let err = registry_cache(&config("redis"))
            .await
            .err()
            .expect("connection refused");
        assert!(matches!(err, InitError::Connect { .. }));
    }
}
