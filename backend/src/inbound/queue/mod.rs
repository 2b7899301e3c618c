//! Queue worker ingress.
//!
//! [`JobRegistry`] maps job types to [`JobHandler`](crate::domain::JobHandler)s;
//! [`WorkerPool`] drains the configured queues with a fixed number of
//! workers, choosing queues by [`WeightedQueues`].

mod pool;
mod registry;
mod scheduler;

pub use pool::{DEFAULT_POLL_INTERVAL, WorkerPool, retry_delay};
pub use registry::JobRegistry;
pub use scheduler::WeightedQueues;
