//! Job queue drivers and their registry.
//!
//! One driver instance serves both sides: producers see it as a
//! [`JobQueue`], the worker ingress as a [`JobSource`].

mod memory;
mod redis;

use std::sync::Arc;

use mockable::Clock;

pub use memory::MemoryQueue;
pub use redis::RedisQueue;

use crate::config::{DriverKind, QueueConfig, QueueDriver};
use crate::domain::ports::{JobQueue, JobSource};
use crate::outbound::InitError;
use crate::outbound::redis_pool::{connect, describe};
use crate::outbound::registry::announce;

/// Producer and consumer handles onto the same queue.
#[derive(Clone)]
pub struct QueueHandles {
    pub producer: Arc<dyn JobQueue>,
    pub consumer: Arc<dyn JobSource>,
}

impl QueueHandles {
    fn shared<Q: JobQueue + JobSource + 'static>(queue: Q) -> Self {
        let queue = Arc::new(queue);
        Self {
            producer: queue.clone(),
            consumer: queue,
        }
    }
}

/// Construct the configured queue.
///
/// # Errors
/// [`InitError::Connect`] when Redis is unreachable.
pub async fn registry_queue(
    config: &QueueConfig,
    clock: Arc<dyn Clock>,
) -> Result<QueueHandles, InitError> {
    let driver = QueueDriver::select(&config.driver);
    match driver {
        QueueDriver::Memory => announce(
            "Registry.Queue",
            driver,
            "in-process",
            Ok(QueueHandles::shared(MemoryQueue::new(clock))),
        ),
        QueueDriver::AsyncQueue => {
            let result = connect(&config.redis)
                .await
                .map(|pool| QueueHandles::shared(RedisQueue::new(pool, clock)))
                .map_err(|message| InitError::connect("queue", driver, message));
            announce("Registry.Queue", driver, &describe(&config.redis), result)
        }
    }
}

/// Producer side of the configured queue.
///
/// # Errors
/// See [`registry_queue`].
pub async fn registry_job_queue(
    config: &QueueConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn JobQueue>, InitError> {
    registry_queue(config, clock).await.map(|handles| handles.producer)
}

/// Worker side of the configured queue.
///
/// # Errors
/// See [`registry_queue`].
pub async fn registry_job_source(
    config: &QueueConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn JobSource>, InitError> {
    registry_queue(config, clock).await.map(|handles| handles.consumer)
}
