//! In-process cache with lazy expiry and a periodic sweeper.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use regex::Regex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::ports::{Cache, CacheError};

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

type Entries = Arc<Mutex<HashMap<String, Entry>>>;

fn expiry(ttl: Duration) -> Option<Instant> {
    (!ttl.is_zero()).then(|| Instant::now() + ttl)
}

/// Translate a glob (`*`, `?`) into an anchored regular expression.
fn glob_to_regex(pattern: &str) -> Result<Regex, CacheError> {
    let mut source = String::with_capacity(pattern.len() + 2);
    source.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');
    Regex::new(&source).map_err(|err| CacheError::backend(err.to_string()))
}

/// Cache held in process memory.
///
/// A background task removes expired entries every `sweep_interval`,
/// taking the lock only for the removal itself. Reads also treat expired
/// entries as absent, so expiry never depends on the sweeper's timing.
pub struct MemoryCache {
    entries: Entries,
    sweeper: CancellationToken,
}

impl MemoryCache {
    /// Must be called inside a Tokio runtime.
    pub fn new(sweep_interval: Duration) -> Self {
        let entries: Entries = Arc::default();
        let sweeper = CancellationToken::new();
        tokio::spawn(sweep(
            Arc::clone(&entries),
            sweep_interval.max(Duration::from_millis(10)),
            sweeper.clone(),
        ));
        Self { entries, sweeper }
    }

    fn with_live_entry<T>(
        &self,
        key: &str,
        read: impl FnOnce(&mut Entry) -> T,
    ) -> Option<T> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(read(entry)),
            None => None,
        }
    }

    fn add(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let current = match entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry),
            _ => None,
        };
        let expires_at = current.and_then(|entry| entry.expires_at);
        let value = match current {
            Some(entry) => std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|text| text.parse::<i64>().ok())
                .ok_or_else(|| CacheError::not_an_integer(key))?,
            None => 0,
        };
        let next = value
            .checked_add(delta)
            .ok_or_else(|| CacheError::not_an_integer(key))?;
        entries.insert(
            key.to_owned(),
            Entry {
                value: next.to_string().into_bytes(),
                expires_at,
            },
        );
        Ok(next)
    }
}

async fn sweep(entries: Entries, period: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            _ = ticker.tick() => {
                let now = Instant::now();
                let mut guard = entries.lock();
                let before = guard.len();
                guard.retain(|_, entry| !entry.is_expired(now));
                let evicted = before - guard.len();
                drop(guard);
                if evicted > 0 {
                    debug!(evicted, "swept expired cache entries");
                }
            }
        }
    }
}

impl Drop for MemoryCache {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        self.entries.lock().insert(
            key.to_owned(),
            Entry {
                value: value.to_vec(),
                expires_at: expiry(ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        self.with_live_entry(key, |entry| entry.value.clone())
            .ok_or_else(|| CacheError::not_found(key))
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.with_live_entry(key, |_| ()).is_some())
    }

    async fn increment(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        self.add(key, delta)
    }

    async fn decrement(&self, key: &str, delta: i64) -> Result<i64, CacheError> {
        let negated = delta
            .checked_neg()
            .ok_or_else(|| CacheError::not_an_integer(key))?;
        self.add(key, negated)
    }

    /// A zero TTL removes the expiry.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        Ok(self
            .with_live_entry(key, |entry| entry.expires_at = expiry(ttl))
            .is_some())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError> {
        let matcher = glob_to_regex(pattern)?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .iter()
            .filter(|(key, entry)| !entry.is_expired(now) && matcher.is_match(key))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn flush_all(&self) -> Result<(), CacheError> {
        self.entries.lock().clear();
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.sweeper.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::CacheExt;
    use rstest::rstest;

    fn cache() -> MemoryCache {
        MemoryCache::new(Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn values_expire_after_their_ttl() {
        let cache = cache();
        cache
            .set("k", b"v", Duration::from_secs(2))
            .await
            .expect("set");

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("k").await.expect("live"), b"v".to_vec());

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(
            cache.get("k").await,
            Err(CacheError::not_found("k"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_without_reads() {
        let cache = cache();
        cache
            .set("k", b"v", Duration::from_millis(500))
            .await
            .expect("set");
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(cache.entries.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_never_expires() {
        let cache = cache();
        cache.set("k", b"v", Duration::ZERO).await.expect("set");
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert!(cache.exists("k").await.expect("exists"));
    }

    #[tokio::test]
    async fn counters_start_at_zero_and_keep_ttl() {
        let cache = cache();
        assert_eq!(cache.increment("hits", 2).await.expect("incr"), 2);
        assert_eq!(cache.decrement("hits", 5).await.expect("decr"), -3);
        assert!(cache.expire("hits", Duration::from_secs(30)).await.expect("expire"));
        cache.increment("hits", 1).await.expect("incr");
        let entries = cache.entries.lock();
        assert!(entries.get("hits").and_then(|e| e.expires_at).is_some());
    }

    #[tokio::test]
    async fn increment_rejects_non_numeric_values() {
        let cache = cache();
        cache.set("name", b"ada", Duration::ZERO).await.expect("set");
        assert_eq!(
            cache.increment("name", 1).await,
            Err(CacheError::not_an_integer("name"))
        );
    }

    #[tokio::test]
    async fn expire_reports_missing_keys() {
        assert!(!cache().expire("nope", Duration::from_secs(1)).await.expect("expire"));
    }

    #[rstest]
    #[case("user:*", vec!["user:1", "user:22"])]
    #[case("user:?", vec!["user:1"])]
    #[case("*.json", vec!["a.json"])]
    #[case("*", vec!["a.json", "ajson", "user:1", "user:22"])]
    #[tokio::test]
    async fn keys_match_globs(#[case] pattern: &str, #[case] expected: Vec<&str>) {
        let cache = cache();
        for key in ["user:1", "user:22", "a.json", "ajson"] {
            cache.set(key, b"1", Duration::ZERO).await.expect("set");
        }
        assert_eq!(cache.keys(pattern).await.expect("keys"), expected);
    }

    #[tokio::test]
    async fn json_helpers_round_trip() {
        let cache = cache();
        cache
            .set_json("profile", &serde_json::json!({ "id": 1 }), Duration::ZERO)
            .await
            .expect("set");
        let value: serde_json::Value = cache.get_json("profile").await.expect("get");
        assert_eq!(value["id"], 1);
    }

    #[tokio::test]
    async fn flush_all_clears_everything() {
        let cache = cache();
        cache.set("a", b"1", Duration::ZERO).await.expect("set");
        cache.flush_all().await.expect("flush");
        assert!(cache.keys("*").await.expect("keys").is_empty());
    }
}
