//! In-process broker for development and tests.
//!
//! Every subscription id on a topic receives its own copy of each message.
//! A nacked message is handed back to the same subscription after the
//! redelivery delay with its attempt counter raised.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::stamp_trace;
use crate::domain::ports::{
    Acknowledger, Delivery, PubSubError, PubSubMessage, PubSubTransport, Subscription,
    SubscriptionSpec,
};

/// Delay before a nacked message is offered again.
pub const DEFAULT_REDELIVERY_DELAY: Duration = Duration::from_secs(1);

/// How one delivery was settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Acked {
        subscription: String,
        message_id: String,
    },
    Nacked {
        subscription: String,
        message_id: String,
    },
}

type Outbox = mpsc::UnboundedSender<PubSubMessage>;

struct Broker {
    /// topic -> subscription id -> outbox
    topics: Mutex<HashMap<String, HashMap<String, Outbox>>>,
    ledger: Mutex<Vec<Settlement>>,
    closed: CancellationToken,
    redelivery_delay: Duration,
}

/// [`PubSubTransport`] kept entirely in memory.
#[derive(Clone)]
pub struct MemoryPubSub {
    broker: Arc<Broker>,
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::new(DEFAULT_REDELIVERY_DELAY)
    }
}

impl MemoryPubSub {
    #[must_use]
    pub fn new(redelivery_delay: Duration) -> Self {
        Self {
            broker: Arc::new(Broker {
                topics: Mutex::new(HashMap::new()),
                ledger: Mutex::new(Vec::new()),
                closed: CancellationToken::new(),
                redelivery_delay,
            }),
        }
    }

    /// Every settlement so far, in order.
    #[must_use]
    pub fn settlements(&self) -> Vec<Settlement> {
        self.broker.ledger.lock().clone()
    }
}

#[async_trait]
impl PubSubTransport for MemoryPubSub {
    async fn subscribe(
        &self,
        spec: &SubscriptionSpec,
        max_outstanding: usize,
    ) -> Result<Box<dyn Subscription>, PubSubError> {
        if self.broker.closed.is_cancelled() {
            return Err(PubSubError::Closed);
        }
        let (outbox, inbox) = mpsc::unbounded_channel();
        self.broker
            .topics
            .lock()
            .entry(spec.topic.clone())
            .or_default()
            .insert(spec.id.clone(), outbox.clone());
        Ok(Box::new(MemorySubscription {
            id: spec.id.clone(),
            inbox,
            outbox,
            permits: Arc::new(Semaphore::new(max_outstanding.max(1))),
            broker: Arc::clone(&self.broker),
        }))
    }

    async fn publish(
        &self,
        topic: &str,
        data: Bytes,
        mut attributes: HashMap<String, String>,
    ) -> Result<String, PubSubError> {
        if self.broker.closed.is_cancelled() {
            return Err(PubSubError::Closed);
        }
        stamp_trace(&mut attributes);
        let message = PubSubMessage {
            id: uuid::Uuid::new_v4().to_string(),
            data,
            attributes,
            published_at: Utc::now(),
            delivery_attempt: 1,
        };
        let mut topics = self.broker.topics.lock();
        match topics.get_mut(topic) {
            Some(subscribers) => {
                subscribers.retain(|_, outbox| outbox.send(message.clone()).is_ok());
            }
            None => debug!(topic, message_id = %message.id, "no subscribers; message dropped"),
        }
        Ok(message.id)
    }

    async fn close(&self) -> Result<(), PubSubError> {
        self.broker.closed.cancel();
        self.broker.topics.lock().clear();
        Ok(())
    }
}

struct MemorySubscription {
    id: String,
    inbox: mpsc::UnboundedReceiver<PubSubMessage>,
    outbox: Outbox,
    permits: Arc<Semaphore>,
    broker: Arc<Broker>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn receive(&mut self) -> Result<Option<Delivery>, PubSubError> {
        let closed = self.broker.closed.clone();
        let permit = tokio::select! {
            () = closed.cancelled() => return Ok(None),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| PubSubError::Closed)?
            }
        };
        let message = tokio::select! {
            () = closed.cancelled() => return Ok(None),
            message = self.inbox.recv() => message,
        };
        Ok(message.map(|message| {
            let acker = MemoryAcker {
                subscription: self.id.clone(),
                message: message.clone(),
                outbox: self.outbox.clone(),
                broker: Arc::clone(&self.broker),
                _permit: permit,
            };
            Delivery::new(message, Box::new(acker))
        }))
    }
}

struct MemoryAcker {
    subscription: String,
    message: PubSubMessage,
    outbox: Outbox,
    broker: Arc<Broker>,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Acknowledger for MemoryAcker {
    async fn ack(self: Box<Self>) -> Result<(), PubSubError> {
        self.broker.ledger.lock().push(Settlement::Acked {
            subscription: self.subscription,
            message_id: self.message.id,
        });
        Ok(())
    }

    async fn nack(self: Box<Self>) -> Result<(), PubSubError> {
        let Self {
            subscription,
            mut message,
            outbox,
            broker,
            _permit,
        } = *self;
        broker.ledger.lock().push(Settlement::Nacked {
            subscription,
            message_id: message.id.clone(),
        });
        message.delivery_attempt = message.delivery_attempt.saturating_add(1);
        let delay = broker.redelivery_delay;
        let closed = broker.closed.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = closed.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    // The subscription may be gone; the message is dropped then.
                    let _ = outbox.send(message);
                }
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::TraceContext;

    fn spec(id: &str) -> SubscriptionSpec {
        SubscriptionSpec::new(id, "orders")
    }

    #[tokio::test]
    async fn every_subscription_gets_a_copy() {
        let broker = MemoryPubSub::default();
        let mut audit = broker.subscribe(&spec("audit"), 4).await.expect("audit");
        let mut billing = broker.subscribe(&spec("billing"), 4).await.expect("billing");

        let id = broker
            .publish("orders", Bytes::from_static(b"{}"), HashMap::new())
            .await
            .expect("publish");

        for subscription in [&mut audit, &mut billing] {
            let delivery = subscription.receive().await.expect("receive").expect("message");
            assert_eq!(delivery.message.id, id);
            assert_eq!(delivery.message.delivery_attempt, 1);
            delivery.ack().await.expect("ack");
        }
        assert_eq!(broker.settlements().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn nacked_messages_come_back_after_the_delay() {
        let broker = MemoryPubSub::new(Duration::from_secs(5));
        let mut subscription = broker.subscribe(&spec("audit"), 1).await.expect("subscribe");
        broker
            .publish("orders", Bytes::from_static(b"m1"), HashMap::new())
            .await
            .expect("publish");

        let first = subscription.receive().await.expect("receive").expect("message");
        let id = first.message.id.clone();
        first.nack().await.expect("nack");

        let again = subscription.receive().await.expect("receive").expect("redelivery");
        assert_eq!(again.message.id, id);
        assert_eq!(again.message.delivery_attempt, 2);
        assert_eq!(
            broker.settlements(),
            vec![Settlement::Nacked {
                subscription: "audit".to_owned(),
                message_id: id,
            }]
        );
    }

    #[tokio::test]
    async fn outstanding_deliveries_are_bounded() {
        let broker = MemoryPubSub::default();
        let mut subscription = broker.subscribe(&spec("audit"), 1).await.expect("subscribe");
        for _ in 0..2 {
            broker
                .publish("orders", Bytes::from_static(b"{}"), HashMap::new())
                .await
                .expect("publish");
        }

        let held = subscription.receive().await.expect("receive").expect("first");
        let blocked =
            tokio::time::timeout(Duration::from_millis(50), subscription.receive()).await;
        assert!(blocked.is_err(), "second delivery must wait for a settlement");

        held.ack().await.expect("ack");
        let next = subscription.receive().await.expect("receive");
        assert!(next.is_some());
    }

    #[tokio::test]
    async fn close_ends_subscriptions_and_rejects_publishers() {
        let broker = MemoryPubSub::default();
        let mut subscription = broker.subscribe(&spec("audit"), 1).await.expect("subscribe");
        broker.close().await.expect("close");

        assert!(subscription.receive().await.expect("receive").is_none());
        let err = broker
            .publish("orders", Bytes::new(), HashMap::new())
            .await
            .expect_err("closed");
        assert_eq!(err, PubSubError::Closed);
    }

    #[tokio::test]
    async fn publishers_stamp_the_active_trace() {
        let broker = MemoryPubSub::default();
        let mut subscription = broker.subscribe(&spec("audit"), 1).await.expect("subscribe");
        let trace = TraceContext::new_root();
        let expected = trace.traceparent();
        TraceContext::scope(
            trace,
            broker.publish("orders", Bytes::new(), HashMap::new()),
        )
        .await
        .expect("publish");

        let delivery = subscription.receive().await.expect("receive").expect("message");
        assert_eq!(
            delivery.message.attributes.get("traceparent"),
            Some(&expected)
        );
    }
}
