//! Rate limit stores and their registry.
//!
//! When the cache is shared (Redis) the counters live there so limits hold
//! across replicas; otherwise each process counts on its own.

mod cache_backed;
mod memory;

use std::sync::Arc;

use mockable::Clock;

pub use cache_backed::CacheRateLimitStore;
pub use memory::MemoryRateLimitStore;

use crate::config::{CacheConfig, CacheDriver, DriverKind};
use crate::domain::ports::{Cache, RateLimitStore};
use crate::outbound::InitError;
use crate::outbound::registry::announce;

/// Pick the store matching the configured cache.
///
/// # Errors
/// Never fails today; the signature matches the other registries.
pub fn registry_rate_limit_store(
    config: &CacheConfig,
    cache: Arc<dyn Cache>,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn RateLimitStore>, InitError> {
    match CacheDriver::select(&config.driver) {
        CacheDriver::Redis => announce(
            "Registry.RateLimit",
            "cache",
            "shared fixed windows",
            Ok(Arc::new(CacheRateLimitStore::new(cache, clock)) as Arc<dyn RateLimitStore>),
        ),
        CacheDriver::Memory => announce(
            "Registry.RateLimit",
            "memory",
            "per-process fixed windows",
            Ok(Arc::new(MemoryRateLimitStore::new()) as Arc<dyn RateLimitStore>),
        ),
    }
}
