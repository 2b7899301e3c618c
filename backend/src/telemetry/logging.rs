//! Process-wide log subscriber.
//!
//! Events are JSON by default (`LOG_FORMAT=text` switches to a compact human
//! format) and filtered by `RUST_LOG`, falling back to `info`. Fields of the
//! enclosing spans, notably `trace_id` and `span_id`, are included in every
//! line.

use mockable::Env;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt};

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl LogFormat {
    /// Read `LOG_FORMAT`; anything other than `text` means JSON.
    pub fn from_env<E: Env>(env: &E) -> Self {
        match env.string("LOG_FORMAT") {
            Some(value) if value.trim().eq_ignore_ascii_case("text") => Self::Text,
            _ => Self::Json,
        }
    }
}

/// Install the global subscriber.
///
/// Safe to call more than once: later calls leave the installed subscriber
/// in place and return `false`.
pub fn init_logging(format: LogFormat) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let result = match format {
        LogFormat::Json => fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .try_init(),
        LogFormat::Text => fmt().with_env_filter(filter).compact().try_init(),
    };
    match result {
        Ok(()) => true,
        Err(error) => {
            warn!(%error, "tracing init skipped; a subscriber is already installed");
            false
        }
    }
}
