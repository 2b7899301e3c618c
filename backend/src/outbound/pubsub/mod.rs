//! Pub/sub transports and their registry.

mod memory;
mod redis;

use std::collections::HashMap;
use std::sync::Arc;

pub use memory::{DEFAULT_REDELIVERY_DELAY, MemoryPubSub, Settlement};
pub use redis::RedisPubSub;

use crate::config::{DriverKind, PubSubConfig, PubSubDriver};
use crate::domain::ports::PubSubTransport;
use crate::outbound::InitError;
use crate::outbound::redis_pool::{connect, describe};
use crate::outbound::registry::announce;
use crate::telemetry::{TRACEPARENT_HEADER, TRACESTATE_HEADER, TraceContext};

/// Carry the publisher's trace position unless the caller set one.
fn stamp_trace(attributes: &mut HashMap<String, String>) {
    if attributes.contains_key(TRACEPARENT_HEADER) {
        return;
    }
    if let Some(trace) = TraceContext::current() {
        attributes.insert(TRACEPARENT_HEADER.to_owned(), trace.traceparent());
        if let Some(state) = trace.trace_state() {
            attributes.insert(TRACESTATE_HEADER.to_owned(), state.to_owned());
        }
    }
}

/// Construct the configured transport.
///
/// # Errors
/// [`InitError::Connect`] when Redis is unreachable.
pub async fn registry_pubsub(
    config: &PubSubConfig,
) -> Result<Arc<dyn PubSubTransport>, InitError> {
    let driver = PubSubDriver::select(&config.driver);
    match driver {
        PubSubDriver::Memory => announce(
            "Registry.PubSub",
            driver,
            &format!("redelivery_delay={DEFAULT_REDELIVERY_DELAY:?}"),
            Ok(Arc::new(MemoryPubSub::default()) as Arc<dyn PubSubTransport>),
        ),
        PubSubDriver::Redis => {
            let result = connect(&config.redis)
                .await
                .map(|pool| {
                    Arc::new(RedisPubSub::new(
                        pool,
                        config.consumer.clone(),
                        config.redelivery_idle,
                    )) as Arc<dyn PubSubTransport>
                })
                .map_err(|message| InitError::connect("pubsub", driver, message));
            let detail = format!(
                "{} consumer={} redelivery_idle={:?}",
                describe(&config.redis),
                config.consumer,
                config.redelivery_idle
            );
            announce("Registry.PubSub", driver, &detail, result)
        }
    }
}
