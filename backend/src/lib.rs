//! Clean-architecture service skeleton.
//!
//! One use-case abstraction behind three ingresses (HTTP, delayed job queue,
//! pub/sub), pluggable drivers chosen by configuration, W3C trace
//! propagation and graceful shutdown.
//!
//! - [`config`]: typed configuration from the environment and a dotfile.
//! - [`telemetry`]: trace context, spans and log setup.
//! - [`domain`]: contracts, contexts, ports and use-cases.
//! - [`inbound`]: HTTP, queue worker and pub/sub adapters.
//! - [`outbound`]: drivers and their registries.
//! - [`bootstrap`]: capability assembly, runtime record and shutdown.
//! - [`cli`]: the `skeleton` command tree.

pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod domain;
pub mod inbound;
pub mod outbound;
pub mod telemetry;
pub mod test_support;
