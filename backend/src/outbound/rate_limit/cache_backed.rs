//! Fixed windows kept in the shared cache, so every replica sees the same
//! counts.
//!
//! Each window is one counter named `ratelimit:{key}:{window index}`, where
//! the index is the epoch time divided by the window length. The first hit
//! in a window sets the counter's expiry. A counter whose expiry could not
//! be set is deleted again, so the next hit recreates it and retries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mockable::Clock;
use tracing::warn;

use crate::domain::ports::{Cache, RateLimitError, RateLimitStore};

fn backend(err: impl std::fmt::Display) -> RateLimitError {
    RateLimitError::backend(err.to_string())
}

/// [`RateLimitStore`] on top of any [`Cache`] driver.
pub struct CacheRateLimitStore {
    cache: Arc<dyn Cache>,
    clock: Arc<dyn Clock>,
}

impl CacheRateLimitStore {
    pub fn new(cache: Arc<dyn Cache>, clock: Arc<dyn Clock>) -> Self {
        Self { cache, clock }
    }

    fn counter_key(&self, key: &str, window: Duration) -> String {
        let length = i64::try_from(window.as_millis()).unwrap_or(i64::MAX).max(1);
        let index = self.clock.utc().timestamp_millis().div_euclid(length);
        format!("ratelimit:{key}:{index}")
    }
}

#[async_trait]
impl RateLimitStore for CacheRateLimitStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<u64, RateLimitError> {
        let counter = self.counter_key(key, window);
        let hits = self.cache.increment(&counter, 1).await.map_err(backend)?;
        if hits == 1 {
            if let Err(err) = self.cache.expire(&counter, window).await {
                if let Err(cleanup) = self.cache.delete(&counter).await {
                    warn!(
                        operation = "RateLimit.Hit",
                        %counter,
                        error = %cleanup,
                        "counter left without expiry"
                    );
                }
                return Err(backend(err));
            }
        }
        Ok(u64::try_from(hits).unwrap_or(0))
    }
}
