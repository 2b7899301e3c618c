//! Port for fixed-window request counters.
use std::time::Duration;

use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    /// Errors surfaced by rate limit stores.
    pub enum RateLimitError {
        Backend { message: String } => "rate limit store failure: {message}",
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count one hit for `key` in the current window of length `window` and
    /// return the hits recorded in that window so far, this one included.
    async fn hit(&self, key: &str, window: Duration) -> Result<u64, RateLimitError>;
}
