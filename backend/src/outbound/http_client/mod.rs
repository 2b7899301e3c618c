//! Outbound HTTP client driver and its registry.

mod reqwest_client;

use std::sync::Arc;

pub use reqwest_client::{ReqwestClient, RetryPolicy};

use crate::config::{Backoff, DriverKind, HttpClientConfig};
use crate::domain::ports::HttpClient;
use crate::outbound::InitError;
use crate::outbound::registry::announce;

/// # Errors
/// [`InitError::Connect`] when the client cannot be built.
pub fn registry_http_client(config: &HttpClientConfig) -> Result<Arc<dyn HttpClient>, InitError> {
    let retry = RetryPolicy {
        max_retries: config.max_retries,
        wait: config.retry_wait,
        backoff: Backoff::select(&config.backoff),
    };
    let detail = format!(
        "timeout={:?} max_retries={} backoff={} follow_redirect={}",
        config.timeout, retry.max_retries, retry.backoff, config.follow_redirect
    );
    let result = ReqwestClient::new(
        config.timeout,
        config.follow_redirect,
        config.default_headers.clone(),
        retry,
    )
    .map(|client| Arc::new(client) as Arc<dyn HttpClient>)
    .map_err(|err| InitError::connect("http_client", "reqwest", err));
    announce("Registry.HttpClient", "reqwest", &detail, result)
}
