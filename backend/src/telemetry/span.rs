//! Spans and the tracer that hands finished spans to a sink.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use super::context::{SpanId, TraceContext};

/// A span that has ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedSpan {
    pub name: String,
    pub context: TraceContext,
    pub parent: Option<SpanId>,
    pub duration: Duration,
    pub error: Option<String>,
    pub attributes: Vec<(String, String)>,
}

/// Destination for finished spans.
pub trait SpanSink: Send + Sync {
    fn export(&self, span: FinishedSpan);
}

/// Emits one debug event per finished span.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSpanSink;

impl SpanSink for LogSpanSink {
    fn export(&self, span: FinishedSpan) {
        let parent = span.parent.map(|id| id.to_string());
        debug!(
            span_name = %span.name,
            trace_id = %span.context.trace_id(),
            span_id = %span.context.span_id(),
            parent_span_id = parent.as_deref(),
            duration_ms = u64::try_from(span.duration.as_millis()).unwrap_or(u64::MAX),
            error = span.error.as_deref(),
            "span finished"
        );
    }
}

/// Collects finished spans in memory.
#[derive(Debug, Default)]
pub struct RecordingSpanSink {
    spans: Mutex<Vec<FinishedSpan>>,
}

impl RecordingSpanSink {
    #[must_use]
    pub fn finished(&self) -> Vec<FinishedSpan> {
        self.spans.lock().clone()
    }
}

impl SpanSink for RecordingSpanSink {
    fn export(&self, span: FinishedSpan) {
        self.spans.lock().push(span);
    }
}

/// Starts spans and routes them to a [`SpanSink`] when they end.
#[derive(Clone)]
pub struct Tracer {
    sink: Arc<dyn SpanSink>,
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl Default for Tracer {
    fn default() -> Self {
        Self::new(Arc::new(LogSpanSink))
    }
}

impl Tracer {
    #[must_use]
    pub fn new(sink: Arc<dyn SpanSink>) -> Self {
        Self { sink }
    }

    /// Start a span. With a parent the span joins its trace; without one a
    /// new trace begins.
    #[must_use]
    pub fn start(&self, name: impl Into<String>, parent: Option<&TraceContext>) -> TraceSpan {
        let (context, parent_id) = match parent {
            Some(parent) => (parent.child(), Some(parent.span_id())),
            None => (TraceContext::new_root(), None),
        };
        self.start_with_context(name, context, parent_id)
    }

    /// Start a span continuing a remote caller's `traceparent`, or a new
    /// trace when the carrier is absent or malformed.
    #[must_use]
    pub fn continue_remote(
        &self,
        name: impl Into<String>,
        traceparent: Option<&str>,
        tracestate: Option<&str>,
    ) -> TraceSpan {
        let remote_parent = traceparent
            .and_then(|raw| raw.parse::<TraceContext>().ok())
            .map(|parent| parent.span_id());
        let context = TraceContext::continue_from(traceparent, tracestate);
        self.start_with_context(name, context, remote_parent)
    }

    /// Start a span at an already computed position.
    #[must_use]
    pub fn start_with_context(
        &self,
        name: impl Into<String>,
        context: TraceContext,
        parent: Option<SpanId>,
    ) -> TraceSpan {
        TraceSpan {
            name: name.into(),
            context,
            parent,
            started: Instant::now(),
            error: None,
            attributes: Vec::new(),
            sink: Some(Arc::clone(&self.sink)),
        }
    }
}

/// An open span. Ends exactly once: on [`TraceSpan::end`] or on drop.
pub struct TraceSpan {
    name: String,
    context: TraceContext,
    parent: Option<SpanId>,
    started: Instant,
    error: Option<String>,
    attributes: Vec<(String, String)>,
    sink: Option<Arc<dyn SpanSink>>,
}

impl TraceSpan {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    pub fn record_error(&mut self, error: impl fmt::Display) {
        self.error = Some(error.to_string());
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl fmt::Display) {
        self.attributes.push((key.into(), value.to_string()));
    }

    /// A `tracing` span carrying the correlation fields, for instrumenting
    /// the work this span covers.
    #[must_use]
    pub fn log_span(&self) -> tracing::Span {
        tracing::info_span!(
            "span",
            operation = %self.name,
            trace_id = %self.context.trace_id(),
            span_id = %self.context.span_id(),
        )
    }

    pub fn end(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        let Some(sink) = self.sink.take() else {
            return;
        };
        sink.export(FinishedSpan {
            name: std::mem::take(&mut self.name),
            context: self.context.clone(),
            parent: self.parent,
            duration: self.started.elapsed(),
            error: self.error.take(),
            attributes: std::mem::take(&mut self.attributes),
        });
    }
}

impl Drop for TraceSpan {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording_tracer() -> (Tracer, Arc<RecordingSpanSink>) {
        let sink = Arc::new(RecordingSpanSink::default());
        (Tracer::new(sink.clone()), sink)
    }

    #[test]
    fn end_exports_once() {
        let (tracer, sink) = recording_tracer();
        let span = tracer.start("job.email:send", None);
        span.end();
        assert_eq!(sink.finished().len(), 1);
    }

    #[test]
    fn dropped_span_is_ended() {
        let (tracer, sink) = recording_tracer();
        {
            let mut span = tracer.start("http.GET./users", None);
            span.record_error("boom");
        }
        let finished = sink.finished();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].error.as_deref(), Some("boom"));
    }

    #[test]
    fn remote_parents_are_continued() {
        let (tracer, sink) = recording_tracer();
        let parent = "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01";
        tracer
            .continue_remote("pubsub.orders", Some(parent), Some("vendor=1"))
            .end();
        tracer.continue_remote("pubsub.orders", Some("garbage"), None).end();

        let finished = sink.finished();
        assert_eq!(
            finished[0].context.trace_id().to_string(),
            "0af7651916cd43dd8448eb211c80319c"
        );
        assert_eq!(
            finished[0].parent.map(|id| id.to_string()).as_deref(),
            Some("b7ad6b7169203331")
        );
        assert_eq!(finished[0].context.trace_state(), Some("vendor=1"));
        assert_eq!(finished[1].parent, None);
    }

    #[test]
    fn child_spans_share_the_trace() {
        let (tracer, sink) = recording_tracer();
        let parent = tracer.start("parent", None);
        let child = tracer.start("child", Some(parent.context()));
        let parent_ctx = parent.context().clone();
        child.end();
        parent.end();

        let finished = sink.finished();
        assert_eq!(finished[0].context.trace_id(), parent_ctx.trace_id());
        assert_eq!(finished[0].parent, Some(parent_ctx.span_id()));
        assert_eq!(finished[1].parent, None);
    }
}
