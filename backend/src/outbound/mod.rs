//! Outbound adapters implementing domain ports for external infrastructure.
//!
//! Each capability lives in its own module with one registry function that
//! resolves the configured driver and constructs it:
//!
//! - **cache**: in-process map with a sweeper, or Redis
//! - **storage**: local filesystem (cloud drivers validate config only)
//! - **queue**: in-process or Redis delayed job queue
//! - **persistence**: PostgreSQL via `sqlx`, migrations, user repository
//! - **security**: JWT issuer, Argon2 hasher, AES-GCM crypto
//! - **http_client**: `reqwest` with retries and trace propagation
//! - **pubsub**: in-process broker or Redis Streams
//! - **rate_limit**: in-process windows or cache-backed counters
//!
//! Adapters are thin translators between domain types and infrastructure
//! representations. They contain no business logic.

pub mod cache;
pub mod http_client;
pub mod persistence;
pub mod pubsub;
pub mod queue;
pub mod rate_limit;
mod redis_pool;
mod registry;
pub mod security;
pub mod storage;

pub use registry::InitError;
