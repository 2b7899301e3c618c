//! Correlation and structured logging shared by every ingress.
//!
//! [`TraceContext`] follows the W3C Trace Context format and is propagated
//! through HTTP headers, job envelopes and pub/sub attributes. [`Tracer`]
//! opens [`TraceSpan`]s whose `tracing` counterpart stamps `trace_id` and
//! `span_id` on every log line emitted inside them.

mod context;
mod logging;
mod span;

pub use context::{
    SpanId, TRACEPARENT_HEADER, TRACESTATE_HEADER, TraceContext, TraceId, TraceParentError,
};
pub use logging::{LogFormat, init_logging};
pub use span::{FinishedSpan, LogSpanSink, RecordingSpanSink, SpanSink, TraceSpan, Tracer};
