//! Subscription router settling deliveries from a scripted transport.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use skeleton::config::Config;
use skeleton::domain::ports::{
    Acknowledger, Cache, Delivery, PubSubError, PubSubMessage, PubSubTransport, Subscription,
    SubscriptionSpec,
};
use skeleton::domain::usecases::AuditConsumer;
use skeleton::inbound::pubsub::PubSubRouter;
use skeleton::outbound::cache::MemoryCache;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Settled {
    Ack(String),
    Nack(String),
}

type Ledger = Arc<Mutex<Vec<Settled>>>;

struct Recorder {
    id: String,
    ledger: Ledger,
}

#[async_trait]
impl Acknowledger for Recorder {
    async fn ack(self: Box<Self>) -> Result<(), PubSubError> {
        self.ledger.lock().push(Settled::Ack(self.id));
        Ok(())
    }

    async fn nack(self: Box<Self>) -> Result<(), PubSubError> {
        self.ledger.lock().push(Settled::Nack(self.id));
        Ok(())
    }
}

/// Hands out a fixed list of messages, then reports shutdown.
struct Scripted {
    pending: VecDeque<(String, &'static str)>,
    ledger: Ledger,
}

#[async_trait]
impl Subscription for Scripted {
    async fn receive(&mut self) -> Result<Option<Delivery>, PubSubError> {
        Ok(self.pending.pop_front().map(|(id, payload)| {
            let message = PubSubMessage {
                id: id.clone(),
                data: Bytes::from_static(payload.as_bytes()),
                attributes: HashMap::new(),
                published_at: Utc::now(),
                delivery_attempt: 1,
            };
            let acker = Box::new(Recorder {
                id,
                ledger: Arc::clone(&self.ledger),
            });
            Delivery::new(message, acker)
        }))
    }
}

struct ScriptedTransport {
    messages: Mutex<Option<Vec<(String, &'static str)>>>,
    ledger: Ledger,
}

#[async_trait]
impl PubSubTransport for ScriptedTransport {
    async fn subscribe(
        &self,
        _spec: &SubscriptionSpec,
        _max_outstanding: usize,
    ) -> Result<Box<dyn Subscription>, PubSubError> {
        let messages = self.messages.lock().take().unwrap_or_default();
        Ok(Box::new(Scripted {
            pending: messages.into(),
            ledger: Arc::clone(&self.ledger),
        }))
    }

    async fn publish(
        &self,
        _topic: &str,
        _data: Bytes,
        _attributes: HashMap<String, String>,
    ) -> Result<String, PubSubError> {
        Err(PubSubError::backend("publishing is not scripted"))
    }

    async fn close(&self) -> Result<(), PubSubError> {
        Ok(())
    }
}

#[tokio::test]
async fn failed_consumption_nacks_and_success_acks() {
    let ledger: Ledger = Arc::default();
    let transport = Arc::new(ScriptedTransport {
        messages: Mutex::new(Some(vec![
            ("m1".to_owned(), r#"{"actor":"ada","action":""}"#),
            ("m2".to_owned(), r#"{"actor":"ada","action":"login"}"#),
        ])),
        ledger: Arc::clone(&ledger),
    });
    let cache = Arc::new(MemoryCache::new(Duration::from_secs(60)));
    let mut router = PubSubRouter::new(transport, Arc::new(Config::default()));
    router.subscribe(
        SubscriptionSpec::new("audit-consumer", "audit"),
        Arc::new(AuditConsumer::new(cache.clone())),
        1,
    );

    tokio::time::timeout(Duration::from_secs(5), router.start(CancellationToken::new()))
        .await
        .expect("subscription drained")
        .expect("no transport error");

    let mut settled = ledger.lock().clone();
    settled.sort_by_key(|entry| match entry {
        Settled::Ack(id) | Settled::Nack(id) => id.clone(),
    });
    assert_eq!(
        settled,
        vec![Settled::Nack("m1".to_owned()), Settled::Ack("m2".to_owned())]
    );
    assert_eq!(cache.increment("audit:login", 0).await.expect("counter"), 1);
}
