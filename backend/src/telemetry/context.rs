//! W3C trace context carried by every inbound event.
//!
//! The active context lives in task-local storage so errors, log events and
//! outbound calls can pick it up without parameter threading.
//!
//! Tokio task-local variables are not inherited across spawned tasks. Use
//! [`TraceContext::scope`] when spawning new tasks to keep the correlation.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use rand::RngCore;
use tokio::task_local;

task_local! {
    static CURRENT: TraceContext;
}

/// Header carrying the trace parent.
pub const TRACEPARENT_HEADER: &str = "traceparent";
/// Header carrying vendor trace state.
pub const TRACESTATE_HEADER: &str = "tracestate";

const SAMPLED: u8 = 0x01;

/// Reasons a `traceparent` value is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TraceParentError {
    #[error("traceparent must have four dash separated fields")]
    Shape,
    #[error("traceparent version {0} is not supported")]
    Version(String),
    #[error("traceparent {field} is not valid lowercase hex of the right length")]
    Hex { field: &'static str },
    #[error("traceparent {field} must not be all zeroes")]
    Zero { field: &'static str },
}

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident, $len:literal, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name([u8; $len]);

        impl $name {
            /// Generate a random, non-zero identifier.
            #[must_use]
            pub fn generate() -> Self {
                let mut bytes = [0_u8; $len];
                let mut rng = rand::thread_rng();
                while bytes.iter().all(|b| *b == 0) {
                    rng.fill_bytes(&mut bytes);
                }
                Self(bytes)
            }

            /// Raw identifier bytes.
            #[must_use]
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = TraceParentError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let invalid = TraceParentError::Hex { field: $field };
                if s.len() != $len * 2 || s.bytes().any(|b| b.is_ascii_uppercase()) {
                    return Err(invalid);
                }
                let mut bytes = [0_u8; $len];
                hex::decode_to_slice(s, &mut bytes).map_err(|_| invalid)?;
                if bytes.iter().all(|b| *b == 0) {
                    return Err(TraceParentError::Zero { field: $field });
                }
                Ok(Self(bytes))
            }
        }
    };
}

hex_id!(
    /// 16-byte trace identifier shared by every span of one trace.
    TraceId, 16, "trace-id"
);
hex_id!(
    /// 8-byte identifier of a single span.
    SpanId, 8, "parent-id"
);

/// Trace position of the current unit of work.
///
/// # Examples
/// ```
/// use skeleton::telemetry::TraceContext;
///
/// let header = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";
/// let parent: TraceContext = header.parse().unwrap();
/// assert_eq!(parent.traceparent(), header);
///
/// let child = parent.child();
/// assert_eq!(child.trace_id(), parent.trace_id());
/// assert_ne!(child.span_id(), parent.span_id());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    trace_id: TraceId,
    span_id: SpanId,
    flags: u8,
    trace_state: Option<String>,
}

impl TraceContext {
    /// Start a new sampled trace.
    #[must_use]
    pub fn new_root() -> Self {
        Self {
            trace_id: TraceId::generate(),
            span_id: SpanId::generate(),
            flags: SAMPLED,
            trace_state: None,
        }
    }

    /// A new span position inside the same trace.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id,
            span_id: SpanId::generate(),
            flags: self.flags,
            trace_state: self.trace_state.clone(),
        }
    }

    /// Continue an incoming trace, or start a new one when the carrier holds
    /// no valid parent.
    ///
    /// The returned context is a child of the remote parent.
    #[must_use]
    pub fn continue_from(traceparent: Option<&str>, tracestate: Option<&str>) -> Self {
        traceparent
            .and_then(|raw| raw.parse::<Self>().ok())
            .map(|parent| parent.with_trace_state(tracestate).child())
            .unwrap_or_else(Self::new_root)
    }

    fn with_trace_state(mut self, tracestate: Option<&str>) -> Self {
        self.trace_state = tracestate
            .map(str::trim)
            .filter(|state| !state.is_empty())
            .map(str::to_owned);
        self
    }

    #[must_use]
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    #[must_use]
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    #[must_use]
    pub fn is_sampled(&self) -> bool {
        self.flags & SAMPLED == SAMPLED
    }

    #[must_use]
    pub fn trace_state(&self) -> Option<&str> {
        self.trace_state.as_deref()
    }

    /// Render as a version `00` `traceparent` header value.
    #[must_use]
    pub fn traceparent(&self) -> String {
        format!("00-{}-{}-{:02x}", self.trace_id, self.span_id, self.flags)
    }

    /// The context active on the current task, if any.
    #[must_use]
    pub fn current() -> Option<Self> {
        CURRENT.try_with(Clone::clone).ok()
    }

    /// Run `fut` with `context` as the active trace context.
    pub async fn scope<Fut>(context: Self, fut: Fut) -> Fut::Output
    where
        Fut: Future,
    {
        CURRENT.scope(context, fut).await
    }
}

impl FromStr for TraceContext {
    type Err = TraceParentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.trim().split('-').collect();
        let [version, trace_id, span_id, flags, rest @ ..] = fields.as_slice() else {
            return Err(TraceParentError::Shape);
        };
        if version.len() != 2 || !version.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(TraceParentError::Version((*version).to_owned()));
        }
        // Version ff is forbidden; 00 has exactly four fields; later
        // versions may append fields we do not understand.
        match *version {
            "ff" => return Err(TraceParentError::Version((*version).to_owned())),
            "00" if !rest.is_empty() => return Err(TraceParentError::Shape),
            _ => {}
        }
        let trace_id = trace_id.parse()?;
        let span_id = span_id.parse()?;
        if flags.len() != 2 {
            return Err(TraceParentError::Hex { field: "trace-flags" });
        }
        let flags = u8::from_str_radix(flags, 16)
            .map_err(|_| TraceParentError::Hex { field: "trace-flags" })?;
        Ok(Self {
            trace_id,
            span_id,
            flags,
            trace_state: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const VALID: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    #[test]
    fn parse_and_format_round_trip() {
        let ctx: TraceContext = VALID.parse().expect("valid traceparent");
        assert_eq!(ctx.traceparent(), VALID);
        assert!(ctx.is_sampled());
    }

    #[rstest]
    #[case("", TraceParentError::Shape)]
    #[case("00-abc", TraceParentError::Shape)]
    #[case(
        "ff-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        TraceParentError::Version("ff".to_owned())
    )]
    #[case(
        "00-00000000000000000000000000000000-00f067aa0ba902b7-01",
        TraceParentError::Zero { field: "trace-id" }
    )]
    #[case(
        "00-4bf92f3577b34da6a3ce929d0e0e4736-0000000000000000-01",
        TraceParentError::Zero { field: "parent-id" }
    )]
    #[case(
        "00-4BF92F3577B34DA6A3CE929D0E0E4736-00f067aa0ba902b7-01",
        TraceParentError::Hex { field: "trace-id" }
    )]
    #[case(
        "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01-extra",
        TraceParentError::Shape
    )]
    fn rejects_malformed_headers(#[case] raw: &str, #[case] expected: TraceParentError) {
        assert_eq!(raw.parse::<TraceContext>().expect_err("invalid"), expected);
    }

    #[test]
    fn future_versions_tolerate_extra_fields() {
        let raw = "01-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-00-what";
        let ctx: TraceContext = raw.parse().expect("future version");
        assert!(!ctx.is_sampled());
    }

    #[test]
    fn continue_from_keeps_trace_and_state() {
        let ctx = TraceContext::continue_from(Some(VALID), Some("vendor=abc"));
        assert_eq!(
            ctx.trace_id().to_string(),
            "4bf92f3577b34da6a3ce929d0e0e4736"
        );
        assert_ne!(ctx.span_id().to_string(), "00f067aa0ba902b7");
        assert_eq!(ctx.trace_state(), Some("vendor=abc"));
    }

    #[test]
    fn continue_from_invalid_starts_new_trace() {
        let ctx = TraceContext::continue_from(Some("garbage"), None);
        assert_ne!(
            ctx.trace_id().to_string(),
            "00000000000000000000000000000000"
        );
        assert!(ctx.trace_state().is_none());
    }

    #[tokio::test]
    async fn current_reflects_scope() {
        let expected = TraceContext::new_root();
        let observed = TraceContext::scope(expected.clone(), async { TraceContext::current() }).await;
        assert_eq!(observed, Some(expected));
    }

    #[tokio::test]
    async fn current_is_none_out_of_scope() {
        assert!(TraceContext::current().is_none());
    }
}
