//! Per-event envelopes handed to use-cases, consumers and job handlers.
//!
//! Every ingress wraps its event in one of [`RequestContext`],
//! [`MessageContext`] or [`JobContext`]. All three implement [`Envelope`],
//! which exposes the cancellation token, deadline, trace position and
//! configuration common to every unit of work.

use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::error::Error;
use crate::config::Config;
use crate::telemetry::{TraceContext, TraceSpan, Tracer};

/// Why a call stopped before completing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("operation cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl From<Interrupted> for Error {
    fn from(value: Interrupted) -> Self {
        match value {
            Interrupted::Cancelled => Self::service_unavailable("operation cancelled"),
            Interrupted::DeadlineExceeded => Self::gateway_timeout("deadline exceeded"),
        }
    }
}

/// Cancellation, deadline and trace position for one capability call.
///
/// Derived from an [`Envelope`]; capability adapters that cross process
/// boundaries use the deadline and trace to bound and correlate the call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
    trace: Option<TraceContext>,
}

impl CallContext {
    #[must_use]
    pub fn new(
        cancellation: CancellationToken,
        deadline: Option<Instant>,
        trace: Option<TraceContext>,
    ) -> Self {
        Self {
            cancellation,
            deadline,
            trace,
        }
    }

    /// Never cancelled, no deadline, no trace.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Tighten the deadline to `timeout` from now; the earlier one wins.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn trace(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }

    /// Time left before the deadline, `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Drive `fut` until it completes, the token fires or the deadline
    /// passes. Interrupted futures are dropped.
    ///
    /// # Errors
    /// [`Interrupted`] when cancellation or the deadline wins.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        let deadline = self.deadline;
        let expiry = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            () = self.cancellation.cancelled() => Err(Interrupted::Cancelled),
            () = expiry => Err(Interrupted::DeadlineExceeded),
            output = fut => Ok(output),
        }
    }
}

/// Boundary shared by every per-event context.
pub trait Envelope {
    fn cancellation(&self) -> &CancellationToken;
    fn deadline(&self) -> Option<Instant>;
    fn trace(&self) -> &TraceContext;
    fn tracer(&self) -> &Tracer;
    fn config(&self) -> &Config;

    /// Open a child span of this event's trace position.
    fn start_span(&self, name: &str) -> TraceSpan {
        self.tracer().start(name, Some(self.trace()))
    }

    /// Context for capability calls made on behalf of this event.
    fn call_context(&self) -> CallContext {
        CallContext::new(
            self.cancellation().child_token(),
            self.deadline(),
            Some(self.trace().clone()),
        )
    }
}

/// Transport-neutral view of an HTTP request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundRequest {
    pub method: String,
    pub path: String,
    /// Registered route pattern that matched, e.g. `/users/{id}`.
    pub route: String,
    pub params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    /// Header names are stored lowercase.
    pub headers: HashMap<String, String>,
    pub peer_ip: Option<IpAddr>,
    pub body: Bytes,
}

impl InboundRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            method: method.into().to_ascii_uppercase(),
            route: path.clone(),
            path,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    #[must_use]
    pub fn with_peer_ip(mut self, ip: IpAddr) -> Self {
        self.peer_ip = Some(ip);
        self
    }

    #[must_use]
    pub fn with_route(mut self, route: impl Into<String>) -> Self {
        self.route = route.into();
        self
    }

    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Decode the JSON body.
    ///
    /// # Errors
    /// [`ErrorCode::InvalidRequest`](super::ErrorCode::InvalidRequest)
    /// carrying the decoder message.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        decode_json(&self.body)
    }
}

fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    serde_json::from_slice(bytes).map_err(Error::from)
}

/// Per-request context carried through middlewares into the use-case.
#[derive(Debug)]
pub struct RequestContext {
    request: InboundRequest,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
    trace: TraceContext,
    tracer: Tracer,
    config: Arc<Config>,
    locals: HashMap<String, Value>,
}

impl RequestContext {
    /// A context with a fresh trace, default tracer, no deadline and an
    /// uncancelled token.
    pub fn new(request: InboundRequest, config: Arc<Config>) -> Self {
        Self {
            request,
            cancellation: CancellationToken::new(),
            deadline: None,
            trace: TraceContext::new_root(),
            tracer: Tracer::default(),
            config,
            locals: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = trace;
        self
    }

    #[must_use]
    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = tracer;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn request(&self) -> &InboundRequest {
        &self.request
    }

    /// Store a named value for downstream middlewares and the use-case.
    pub fn set_local(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.locals.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn local(&self, key: &str) -> Option<&Value> {
        self.locals.get(key)
    }

    #[must_use]
    pub fn local_str(&self, key: &str) -> Option<&str> {
        self.locals.get(key).and_then(Value::as_str)
    }

    /// Decode the JSON request body.
    ///
    /// # Errors
    /// See [`InboundRequest::json`].
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        self.request.json()
    }
}

impl Envelope for RequestContext {
    fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn trace(&self) -> &TraceContext {
        &self.trace
    }

    fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    fn config(&self) -> &Config {
        &self.config
    }
}

/// One pub/sub delivery.
#[derive(Debug, Clone)]
pub struct MessageContext {
    cancellation: CancellationToken,
    pub id: String,
    pub published_at: DateTime<Utc>,
    pub attributes: HashMap<String, String>,
    pub payload: Bytes,
    /// 1 for the first delivery.
    pub delivery_attempt: u32,
    trace: TraceContext,
    tracer: Tracer,
    config: Arc<Config>,
}

impl MessageContext {
    pub fn new(id: impl Into<String>, payload: impl Into<Bytes>, config: Arc<Config>) -> Self {
        Self {
            cancellation: CancellationToken::new(),
            id: id.into(),
            published_at: Utc::now(),
            attributes: HashMap::new(),
            payload: payload.into(),
            delivery_attempt: 1,
            trace: TraceContext::new_root(),
            tracer: Tracer::default(),
            config,
        }
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }

    #[must_use]
    pub fn with_published_at(mut self, published_at: DateTime<Utc>) -> Self {
        self.published_at = published_at;
        self
    }

    #[must_use]
    pub fn with_delivery_attempt(mut self, attempt: u32) -> Self {
        self.delivery_attempt = attempt;
        self
    }

    #[must_use]
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = trace;
        self
    }

    #[must_use]
    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = tracer;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Decode the JSON payload.
    ///
    /// # Errors
    /// [`ErrorCode::InvalidRequest`](super::ErrorCode::InvalidRequest) on
    /// malformed payloads.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        decode_json(&self.payload)
    }
}

impl Envelope for MessageContext {
    fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    fn deadline(&self) -> Option<Instant> {
        None
    }

    fn trace(&self) -> &TraceContext {
        &self.trace
    }

    fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    fn config(&self) -> &Config {
        &self.config
    }
}

/// One dequeued job.
#[derive(Debug, Clone)]
pub struct JobContext {
    cancellation: CancellationToken,
    pub id: String,
    pub job_type: String,
    pub queue: String,
    pub payload: Bytes,
    /// 0 for the first run.
    pub attempt: u32,
    pub max_retry: u32,
    deadline: Option<Instant>,
    trace: TraceContext,
    tracer: Tracer,
    config: Arc<Config>,
}

impl JobContext {
    pub fn new(
        id: impl Into<String>,
        job_type: impl Into<String>,
        payload: impl Into<Bytes>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            cancellation: CancellationToken::new(),
            id: id.into(),
            job_type: job_type.into(),
            queue: "default".to_owned(),
            payload: payload.into(),
            attempt: 0,
            max_retry: 0,
            deadline: None,
            trace: TraceContext::new_root(),
            tracer: Tracer::default(),
            config,
        }
    }

    #[must_use]
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    #[must_use]
    pub fn with_attempts(mut self, attempt: u32, max_retry: u32) -> Self {
        self.attempt = attempt;
        self.max_retry = max_retry;
        self
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    #[must_use]
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = trace;
        self
    }

    #[must_use]
    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.tracer = tracer;
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Decode the JSON payload.
    ///
    /// # Errors
    /// [`ErrorCode::InvalidRequest`](super::ErrorCode::InvalidRequest) on
    /// malformed payloads.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, Error> {
        decode_json(&self.payload)
    }
}

impl Envelope for JobContext {
    fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn trace(&self) -> &TraceContext {
        &self.trace
    }

    fn tracer(&self) -> &Tracer {
        &self.tracer
    }

    fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorCode;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Credentials {
        username: String,
    }

    fn config() -> Arc<Config> {
        Arc::new(Config::default())
    }

    #[test]
    fn headers_are_case_insensitive() {
        let request = InboundRequest::new("get", "/me").with_header("X-API-Key", "k1");
        assert_eq!(request.method, "GET");
        assert_eq!(request.header("x-api-key"), Some("k1"));
        assert_eq!(request.header("X-Api-Key"), Some("k1"));
    }

    #[test]
    fn malformed_json_is_an_invalid_request() {
        let ctx = RequestContext::new(
            InboundRequest::new("POST", "/login").with_body("{\"username\":"),
            config(),
        );
        let err = ctx.json::<Credentials>().expect_err("malformed body");
        assert_eq!(err.code(), ErrorCode::InvalidRequest);
        assert!(err.message().contains("EOF"));
    }

    #[test]
    fn locals_round_trip() {
        let mut ctx = RequestContext::new(InboundRequest::new("GET", "/me"), config());
        ctx.set_local("role", "admin");
        assert_eq!(ctx.local_str("role"), Some("admin"));
        assert!(ctx.local("user_id").is_none());
    }

    #[test]
    fn spans_join_the_envelope_trace() {
        let ctx = JobContext::new("j1", "email:send", "{}", config());
        let span = ctx.start_span("job.email:send");
        assert_eq!(span.context().trace_id(), ctx.trace().trace_id());
    }

    #[tokio::test]
    async fn run_returns_output_when_uninterrupted() {
        let call = CallContext::background();
        assert_eq!(call.run(async { 7 }).await, Ok(7));
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let token = CancellationToken::new();
        let call = CallContext::new(token.clone(), None, None);
        token.cancel();
        let result = call.run(std::future::pending::<()>()).await;
        assert_eq!(result, Err(Interrupted::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_at_deadline() {
        let call = CallContext::background().with_timeout(Duration::from_secs(5));
        let result = call.run(tokio::time::sleep(Duration::from_secs(60))).await;
        assert_eq!(result, Err(Interrupted::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_deadline_wins() {
        let call = CallContext::background()
            .with_timeout(Duration::from_secs(1))
            .with_timeout(Duration::from_secs(30));
        assert!(call.remaining().expect("deadline") <= Duration::from_secs(1));
    }

    #[test]
    fn call_context_cancels_with_envelope() {
        let token = CancellationToken::new();
        let ctx = MessageContext::new("m1", "{}", config()).with_cancellation(token.clone());
        let call = ctx.call_context();
        token.cancel();
        assert!(call.cancellation().is_cancelled());
    }
}
