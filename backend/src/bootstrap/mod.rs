//! Process assembly: capabilities from configuration, the shared runtime
//! record, ingress wiring and shutdown supervision.
//!
//! Start-up runs config → logging → tracer → capabilities, then exactly one
//! ingress. Shutdown stops intake, drains in-flight work up to
//! `APP_SHUTDOWN_TIMEOUT` and closes capabilities newest first.

mod capabilities;
mod commands;
mod runtime;
mod shutdown;
mod wiring;

pub use crate::outbound::InitError;
pub use capabilities::Capabilities;
pub use commands::{RunError, serve_http, serve_pubsub, serve_worker};
pub use runtime::Runtime;
pub use shutdown::ShutdownSupervisor;
pub use wiring::{
    AUDIT_SUBSCRIPTION, AUDIT_TOPIC, http_router, job_registry, pubsub_router, worker_pool,
};
