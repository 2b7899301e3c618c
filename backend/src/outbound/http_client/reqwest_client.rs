//! Outbound HTTP on `reqwest` with bounded retries.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use reqwest::redirect::Policy;
use tracing::{debug, warn};

use crate::config::Backoff;
use crate::domain::ports::{HttpClient, HttpClientError, HttpMethod, HttpRequest, HttpResponse};
use crate::domain::{CallContext, Interrupted};

/// Upper bound for a single wait between attempts.
const MAX_WAIT: Duration = Duration::from_secs(60);

/// Settings for [`ReqwestClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub wait: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// Wait before retry number `retry` (1-based).
    #[must_use]
    pub fn wait_before(&self, retry: u32) -> Duration {
        let wait = match self.backoff {
            Backoff::Constant => self.wait,
            Backoff::Exponential => {
                let factor = 2_u32.saturating_pow(retry.saturating_sub(1));
                self.wait.saturating_mul(factor)
            }
        };
        wait.min(MAX_WAIT)
    }
}

fn method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

/// Defaults first, then per-call headers; a per-call name replaces the
/// default of the same name.
fn merge_headers(defaults: &[(String, String)], call: &[(String, String)]) -> Vec<(String, String)> {
    defaults
        .iter()
        .filter(|(name, _)| !call.iter().any(|(own, _)| own.eq_ignore_ascii_case(name)))
        .chain(call.iter())
        .cloned()
        .collect()
}

enum Attempt {
    Done(HttpResponse),
    Retry(String),
    Fail(HttpClientError),
}

/// [`HttpClient`] that retries network failures and `5xx` answers.
pub struct ReqwestClient {
    client: reqwest::Client,
    default_headers: Vec<(String, String)>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl ReqwestClient {
    /// # Errors
    /// [`HttpClientError::InvalidRequest`] when the TLS backend cannot be
    /// initialised.
    pub fn new(
        timeout: Duration,
        follow_redirect: bool,
        default_headers: Vec<(String, String)>,
        retry: RetryPolicy,
    ) -> Result<Self, HttpClientError> {
        let redirect = if follow_redirect {
            Policy::default()
        } else {
            Policy::none()
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(redirect)
            .build()
            .map_err(|err| HttpClientError::invalid_request(err.to_string()))?;
        Ok(Self {
            client,
            default_headers,
            timeout,
            retry,
        })
    }

    async fn attempt(&self, call: &CallContext, request: &HttpRequest) -> Attempt {
        let mut builder = self.client.request(method(request.method), &request.url);
        let headers = merge_headers(&self.default_headers, &request.headers);
        let caller_traced = headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("traceparent"));
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(trace) = call.trace().filter(|_| !caller_traced) {
            builder = builder.header("traceparent", trace.traceparent());
            if let Some(state) = trace.trace_state() {
                builder = builder.header("tracestate", state);
            }
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) if err.is_builder() => {
                return Attempt::Fail(HttpClientError::invalid_request(err.to_string()));
            }
            Err(err) => return Attempt::Retry(err.to_string()),
        };
        let status = response.status().as_u16();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_owned(), value.to_owned()))
            })
            .collect();
        match response.bytes().await {
            Ok(body) => Attempt::Done(HttpResponse {
                status,
                headers,
                body,
            }),
            Err(err) => Attempt::Retry(err.to_string()),
        }
    }

    async fn with_retries(
        &self,
        call: &CallContext,
        request: &HttpRequest,
    ) -> Result<HttpResponse, HttpClientError> {
        let mut retry = 0;
        loop {
            let last = retry == self.retry.max_retries;
            match self.attempt(call, request).await {
                Attempt::Done(response) if response.status >= 500 && !last => {
                    warn!(
                        url = %request.url,
                        status = response.status,
                        attempt = retry + 1,
                        "server error; retrying"
                    );
                }
                Attempt::Done(response) => {
                    debug!(
                        method = %request.method,
                        url = %request.url,
                        status = response.status,
                        attempts = retry + 1,
                        "outbound request finished"
                    );
                    return Ok(response);
                }
                Attempt::Retry(message) if !last => {
                    warn!(url = %request.url, error = %message, attempt = retry + 1, "network error; retrying");
                }
                Attempt::Retry(message) => return Err(HttpClientError::network(message)),
                Attempt::Fail(err) => return Err(err),
            }
            retry += 1;
            tokio::time::sleep(self.retry.wait_before(retry)).await;
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn execute(
        &self,
        call: &CallContext,
        request: HttpRequest,
    ) -> Result<HttpResponse, HttpClientError> {
        let bounded = call.clone().with_timeout(self.total_budget());
        match bounded.run(self.with_retries(&bounded, &request)).await {
            Ok(result) => result,
            Err(Interrupted::Cancelled) => Err(HttpClientError::cancelled(request.url)),
            Err(Interrupted::DeadlineExceeded) => Err(HttpClientError::timeout(request.url)),
        }
    }
}

impl ReqwestClient {
    /// Every attempt plus every wait; the caller's deadline wins when
    /// earlier.
    fn total_budget(&self) -> Duration {
        (1..=self.retry.max_retries).fold(
            self.timeout.saturating_mul(self.retry.max_retries.saturating_add(1)),
            |budget, retry| budget.saturating_add(self.retry.wait_before(retry)),
        )
    }
}
