//! Shared HTTP adapter state.
//!
//! Handlers receive this through `actix_web::web::Data`; it carries only
//! what every request context needs, never a concrete driver.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::inbound::InFlight;
use crate::telemetry::Tracer;

#[derive(Debug, Clone)]
pub struct HttpState {
    pub config: Arc<Config>,
    pub tracer: Tracer,
    /// Parent of every request's cancellation token. Cancelled once the
    /// drain deadline passes, not when shutdown begins.
    pub abort: CancellationToken,
    pub in_flight: InFlight,
}

impl HttpState {
    pub fn new(config: Arc<Config>, tracer: Tracer, abort: CancellationToken) -> Self {
        Self {
            config,
            tracer,
            abort,
            in_flight: InFlight::default(),
        }
    }

    #[must_use]
    pub fn with_in_flight(mut self, in_flight: InFlight) -> Self {
        self.in_flight = in_flight;
        self
    }
}
