//! Redis-backed cache over a `bb8-redis` pool.

use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::redis;

use crate::domain::ports::{Cache, CacheError};
use crate::outbound::redis_pool::{RedisConnection, RedisPool, checkout, ping};

const SCAN_BATCH: u32 = 100;

fn backend(err: impl std::fmt::Display) -> CacheError {
    CacheError::backend(err.to_string())
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Cache shared by every process pointing at the same Redis database.
#[derive(Clone)]
pub struct RedisCache {
    pool: RedisPool,
}

impl RedisCache {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<RedisConnection<'_>, CacheError> {
        checkout(&self.pool).await.map_err(backend)
    }

    async fn add(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let mut conn = self.conn().await?;
        redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut *conn)
            .await
            .map_err(|err| {
                if err.to_string().contains("not an integer") {
                    CacheError::not_an_integer(key)
                } else {
                    backend(err)
                }
            })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if !ttl.is_zero() {
            cmd.arg("PX").arg(millis(ttl));
        }
        cmd.query_async::<()>(&mut *conn).await.map_err(backend)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .map_err(backend)?;
        value.ok_or_else(|| CacheError::not_found(key))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut *conn)
            .await
            .map_err(backend)
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.conn().await?;
        let count: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .map_err(backend)?;
        Ok(count > 0)
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        self.add(key, delta).await
    }

    async fn decrement(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let negated = delta
            .checked_neg()
            .ok_or_else(|| CacheError::not_an_integer(key))?;
        self.add(key, negated).await
    }

    /// A zero TTL removes the expiry.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        if ttl.is_zero() {
            if !self.exists(key).await? {
                return Ok(false);
            }
            let mut conn = self.conn().await?;
            redis::cmd("PERSIST")
                .arg(key)
                .query_async::<()>(&mut *conn)
                .await
                .map_err(backend)?;
            return Ok(true);
        }
        let mut conn = self.conn().await?;
        let updated: i64 = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(millis(ttl))
            .query_async(&mut *conn)
            .await
            .map_err(backend)?;
        Ok(updated == 1)
    }

    /// Iterates with `SCAN` so large keyspaces do not block the server.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let mut conn = self.conn().await?;
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut *conn)
                .await
                .map_err(backend)?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    /// Clears the configured database only.
    async fn flush_all(&self) -> Result<(), CacheError> {
        let mut conn = self.conn().await?;
        redis::cmd("FLUSHDB")
            .query_async::<()>(&mut *conn)
            .await
            .map_err(backend)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        ping(&self.pool).await.map_err(backend)
    }

    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Duration::from_millis(1), 1)]
    #[case(Duration::from_micros(10), 1)]
    #[case(Duration::from_secs(2), 2_000)]
    fn ttl_is_sent_in_whole_milliseconds(#[case] ttl: Duration, #[case] expected: u64) {
        assert_eq!(millis(ttl), expected);
    }
}
