//! HTTP ingress: actix-web server, trace propagation, middleware chain and
//! JSON envelope rendering in front of [`UseCase`](crate::domain::UseCase)s.

pub mod health;
pub mod middleware;
mod pipeline;
mod router;
mod server;
pub mod state;
mod trace;

pub use pipeline::Pipeline;
pub use router::{JSON_CONTENT_TYPE, Router, render};
pub use server::{HttpIngress, bind};
pub use state::HttpState;
pub use trace::{TRACE_ID_HEADER, Trace, TraceMiddleware, span_name};
