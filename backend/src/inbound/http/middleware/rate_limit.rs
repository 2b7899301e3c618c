//! Fixed-window request limiting per client address and route.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use super::Middleware;
use crate::domain::ports::RateLimitStore;
use crate::domain::{MiddlewareOutcome, RequestContext};

/// Allow at most `max_requests` per `window` for each client IP on a route.
///
/// Store failures let the request through; an unavailable counter must not
/// take the API down with it.
pub struct RateLimit {
    store: Arc<dyn RateLimitStore>,
    max_requests: u64,
    window: Duration,
}

impl RateLimit {
    pub fn new(store: Arc<dyn RateLimitStore>, max_requests: u64, window: Duration) -> Self {
        Self {
            store,
            max_requests,
            window,
        }
    }

    fn key(ctx: &RequestContext) -> String {
        let request = ctx.request();
        let client = request
            .peer_ip
            .map_or_else(|| "unknown".to_owned(), |ip| ip.to_canonical().to_string());
        format!("{client}:{}", request.route)
    }
}

#[async_trait]
impl Middleware for RateLimit {
    fn name(&self) -> &'static str {
        "Middleware.RateLimit"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> MiddlewareOutcome {
        let key = Self::key(ctx);
        match self.store.hit(&key, self.window).await {
            Ok(hits) if hits > self.max_requests => {
                MiddlewareOutcome::reject(429, "Rate limit exceeded")
            }
            Ok(_) => MiddlewareOutcome::Proceed,
            Err(err) => {
                warn!(
                    operation = self.name(),
                    key = %key,
                    error = %err,
                    "rate limit store unavailable; allowing request"
                );
                MiddlewareOutcome::Proceed
            }
        }
    }
}
