//! Trace propagation middleware.
//!
//! Continues the caller's W3C `traceparent` (or starts a new trace), opens
//! the request span `http.<METHOD>.<path>`, exposes its context to handlers
//! through request extensions and the task-local [`TraceContext`], adds a
//! `trace-id` header to every response and writes one access log line.
//!
//! Tokio task-local variables are not inherited across spawned tasks. Use
//! [`TraceContext::scope`] when moving request work onto other tasks.

use std::task::{Context, Poll};
use std::time::Instant;

use actix_web::Error;
use actix_web::HttpMessage;
use actix_web::dev::{Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{HeaderName, HeaderValue};
use futures_util::future::{LocalBoxFuture, Ready, ready};
use tracing::{Instrument, error, info};

use crate::telemetry::{TRACEPARENT_HEADER, TRACESTATE_HEADER, TraceContext, Tracer};

/// Response header naming the request's trace.
pub const TRACE_ID_HEADER: &str = "trace-id";

fn header<'a>(req: &'a ServiceRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|value| value.to_str().ok())
}

/// Span name for a request.
#[must_use]
pub fn span_name(method: &str, path: &str) -> String {
    format!("http.{method}.{path}")
}

/// Trace propagation middleware.
///
/// # Examples
/// ```
/// use actix_web::App;
/// use skeleton::inbound::http::Trace;
/// use skeleton::telemetry::Tracer;
///
/// let app = App::new().wrap(Trace::new(Tracer::default()));
/// ```
#[derive(Clone, Debug, Default)]
pub struct Trace {
    tracer: Tracer,
}

impl Trace {
    #[must_use]
    pub fn new(tracer: Tracer) -> Self {
        Self { tracer }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Trace
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = TraceMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(TraceMiddleware {
            service,
            tracer: self.tracer.clone(),
        }))
    }
}

/// Service wrapper produced by [`Trace`].
pub struct TraceMiddleware<S> {
    service: S,
    tracer: Tracer,
}

impl<S, B> Service<ServiceRequest> for TraceMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let method = req.method().as_str().to_owned();
        let path = req.path().to_owned();
        let mut span = self.tracer.continue_remote(
            span_name(&method, &path),
            header(&req, TRACEPARENT_HEADER),
            header(&req, TRACESTATE_HEADER),
        );
        let context = span.context().clone();
        let log_span = span.log_span();
        req.extensions_mut().insert(context.clone());

        let trace_id = context.trace_id().to_string();
        let started = Instant::now();
        let fut = self.service.call(req);
        let work = async move {
            let result = fut.await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            let mut res = match result {
                Ok(res) => res,
                Err(err) => {
                    span.record_error(&err);
                    error!(operation = "Http.Access", %method, %path, error = %err, elapsed_ms, "request failed");
                    span.end();
                    return Err(err);
                }
            };
            let status = res.status().as_u16();
            if res.status().is_server_error() {
                span.record_error(format!("status {status}"));
            }
            span.set_attribute("http.status_code", status);
            match HeaderValue::from_str(&trace_id) {
                Ok(value) => {
                    res.response_mut()
                        .headers_mut()
                        .insert(HeaderName::from_static(TRACE_ID_HEADER), value);
                }
                Err(error) => {
                    error!(%error, %trace_id, "failed to encode trace identifier header");
                }
            }
            info!(operation = "Http.Access", %method, %path, status, elapsed_ms, "request completed");
            span.end();
            Ok(res)
        };
        Box::pin(TraceContext::scope(context, work.instrument(log_span)))
    }
}
