//! Per-process fixed windows. Counts are not shared between replicas.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::domain::ports::{RateLimitError, RateLimitStore};

/// Entries beyond this count trigger a prune of closed windows.
const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    opened: Instant,
    length: Duration,
    hits: u64,
}

impl Window {
    fn is_open(&self, now: Instant) -> bool {
        now.duration_since(self.opened) < self.length
    }
}

/// [`RateLimitStore`] for development and single-instance deployments.
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl MemoryRateLimitStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<u64, RateLimitError> {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|_, entry| entry.is_open(now));
        }
        let entry = windows.entry(key.to_owned()).or_insert(Window {
            opened: now,
            length: window,
            hits: 0,
        });
        if !entry.is_open(now) {
            *entry = Window {
                opened: now,
                length: window,
                hits: 0,
            };
        }
        entry.hits += 1;
        Ok(entry.hits)
    }
}
