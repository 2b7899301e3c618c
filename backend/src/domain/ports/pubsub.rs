//! Ports for topic based publish/subscribe.
//!
//! A [`Subscription`] yields [`Delivery`] values; each must be settled with
//! exactly one of [`Delivery::ack`] or [`Delivery::nack`]. A nacked message
//! is redelivered according to the transport's policy.
use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::define_port_error;

define_port_error! {
    /// Errors surfaced by pub/sub adapters.
    pub enum PubSubError {
        /// The transport was closed.
        Closed => "pub/sub transport is closed",
        Backend { message: String } => "pub/sub backend failure: {message}",
    }
}

/// Which topic a subscription listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionSpec {
    pub id: String,
    pub topic: String,
}

impl SubscriptionSpec {
    pub fn new(id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
        }
    }
}

/// A message as received from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub id: String,
    pub data: Bytes,
    pub attributes: HashMap<String, String>,
    pub published_at: DateTime<Utc>,
    /// 1 for the first delivery.
    pub delivery_attempt: u32,
}

/// Settles one delivery with the transport.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(self: Box<Self>) -> Result<(), PubSubError>;

    async fn nack(self: Box<Self>) -> Result<(), PubSubError>;
}

/// A received message and the handle that settles it.
pub struct Delivery {
    pub message: PubSubMessage,
    acker: Box<dyn Acknowledger>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

impl Delivery {
    #[must_use]
    pub fn new(message: PubSubMessage, acker: Box<dyn Acknowledger>) -> Self {
        Self { message, acker }
    }

    /// Split into the message and its settlement handle.
    #[must_use]
    pub fn into_parts(self) -> (PubSubMessage, Box<dyn Acknowledger>) {
        (self.message, self.acker)
    }

    /// # Errors
    /// Transport failure while acknowledging.
    pub async fn ack(self) -> Result<(), PubSubError> {
        self.acker.ack().await
    }

    /// # Errors
    /// Transport failure while negatively acknowledging.
    pub async fn nack(self) -> Result<(), PubSubError> {
        self.acker.nack().await
    }
}

/// An active subscription.
#[async_trait]
pub trait Subscription: Send {
    /// Next delivery; `Ok(None)` once the transport has shut down.
    async fn receive(&mut self) -> Result<Option<Delivery>, PubSubError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Start receiving from `spec.topic`. `max_outstanding` bounds how many
    /// unsettled deliveries the transport hands out at once.
    async fn subscribe(
        &self,
        spec: &SubscriptionSpec,
        max_outstanding: usize,
    ) -> Result<Box<dyn Subscription>, PubSubError>;

    /// Publish and return the message id.
    async fn publish(
        &self,
        topic: &str,
        data: Bytes,
        attributes: HashMap<String, String>,
    ) -> Result<String, PubSubError>;

    async fn close(&self) -> Result<(), PubSubError>;
}
