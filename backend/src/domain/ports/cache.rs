//! Port for the key/value cache.
//!
//! A TTL of zero means the entry never expires. Reading an expired or
//! absent key yields [`CacheError::NotFound`]. `increment` and `decrement`
//! are atomic and treat a missing key as zero.
use std::time::Duration;

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use super::define_port_error;

define_port_error! {
    /// Errors surfaced by cache adapters.
    pub enum CacheError {
        /// The key is absent or expired.
        NotFound { key: String } => "cache key not found: {key}",
        /// The stored value is not an integer counter.
        NotAnInteger { key: String } => "cache value at {key} is not an integer",
        /// Serialisation or deserialisation of cached content failed.
        Serialization { message: String } => "cache serialisation failed: {message}",
        /// Cache backend is unavailable or timing out.
        Backend { message: String } => "cache backend failure: {message}",
    }
}

impl From<CacheError> for crate::domain::Error {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::NotFound { .. } => Self::not_found(err.to_string()),
            CacheError::Backend { .. } => Self::service_unavailable(err.to_string()),
            CacheError::NotAnInteger { .. } | CacheError::Serialization { .. } => {
                Self::internal(err.to_string())
            }
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Cache: Send + Sync {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn exists(&self, key: &str) -> Result<bool, CacheError>;

    /// Add `delta` and return the new value.
    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError>;

    /// Subtract `delta` and return the new value.
    async fn decrement(&self, key: &str, delta: i64) -> Result<i64, CacheError>;

    /// Set a new TTL; `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    /// Keys matching a glob pattern (`*`, `?`).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    async fn flush_all(&self) -> Result<(), CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;

    async fn close(&self) -> Result<(), CacheError>;
}

/// JSON helpers over any [`Cache`].
#[async_trait]
pub trait CacheExt: Cache {
    async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|err| CacheError::serialization(err.to_string()))?;
        self.set(key, &bytes, ttl).await
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, CacheError> {
        let bytes = self.get(key).await?;
        serde_json::from_slice(&bytes).map_err(|err| CacheError::serialization(err.to_string()))
    }
}

impl<C: Cache + ?Sized> CacheExt for C {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Profile {
        name: String,
    }

    #[tokio::test]
    async fn json_helpers_round_trip_through_bytes() {
        let mut cache = MockCache::new();
        cache
            .expect_set()
            .withf(|key, value, ttl| {
                key == "user:1" && value == br#"{"name":"ada"}"# && *ttl == Duration::from_secs(5)
            })
            .returning(|_, _, _| Ok(()));
        cache
            .expect_get()
            .returning(|_| Ok(br#"{"name":"ada"}"#.to_vec()));

        let profile = Profile {
            name: "ada".to_owned(),
        };
        cache
            .set_json("user:1", &profile, Duration::from_secs(5))
            .await
            .expect("set");
        let loaded: Profile = cache.get_json("user:1").await.expect("get");
        assert_eq!(loaded, profile);
    }

    #[tokio::test]
    async fn corrupt_json_is_a_serialisation_error() {
        let mut cache = MockCache::new();
        cache.expect_get().returning(|_| Ok(b"not json".to_vec()));
        let err = cache
            .get_json::<Profile>("user:1")
            .await
            .expect_err("corrupt");
        assert!(matches!(err, CacheError::Serialization { .. }));
    }
}
