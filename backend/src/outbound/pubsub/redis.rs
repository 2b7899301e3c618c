//! Redis Streams transport.
//!
//! Topic `t` is the stream `stream:{t}`; a subscription id is a consumer
//! group on it. Ack is `XACK`. A nacked or abandoned entry stays in the
//! group's pending list and is claimed again once it has been idle for the
//! redelivery threshold.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::redis;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::stamp_trace;
use crate::domain::ports::{
    Acknowledger, Delivery, PubSubError, PubSubMessage, PubSubTransport, Subscription,
    SubscriptionSpec,
};
use crate::outbound::redis_pool::{RedisConnection, RedisPool, checkout};

const DATA_FIELD: &[u8] = b"data";
const PUBLISHED_FIELD: &[u8] = b"published_at";
const ATTRIBUTE_PREFIX: &[u8] = b"attr:";
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Reclaim idle pending entries first, then read new ones. Each item is
/// `[id, attempt, field, value, ...]`.
const RECEIVE: &str = r"
local out = {}
local limit = tonumber(ARGV[4])
local pending = redis.call('XPENDING', KEYS[1], ARGV[1], '-', '+', limit)
for _, entry in ipairs(pending) do
  if tonumber(entry[3]) >= tonumber(ARGV[3]) then
    local claimed = redis.call('XCLAIM', KEYS[1], ARGV[1], ARGV[2], ARGV[3], entry[1])
    for _, msg in ipairs(claimed) do
      if msg and msg[2] then
        local item = {msg[1], tostring(entry[4] + 1)}
        for _, v in ipairs(msg[2]) do table.insert(item, v) end
        table.insert(out, item)
      end
    end
  end
end
if #out == 0 then
  local read = redis.call('XREADGROUP', 'GROUP', ARGV[1], ARGV[2], 'COUNT', limit, 'STREAMS', KEYS[1], '>')
  if read then
    for _, msg in ipairs(read[1][2]) do
      local item = {msg[1], '1'}
      for _, v in ipairs(msg[2]) do table.insert(item, v) end
      table.insert(out, item)
    end
  end
end
return out
";

fn backend(err: impl std::fmt::Display) -> PubSubError {
    PubSubError::backend(err.to_string())
}

fn stream_key(topic: &str) -> String {
    format!("stream:{topic}")
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Decode one `[id, attempt, field, value, ...]` item.
fn decode_entry(item: Vec<Vec<u8>>) -> Result<PubSubMessage, PubSubError> {
    let mut parts = item.into_iter();
    let (Some(id), Some(attempt)) = (parts.next(), parts.next()) else {
        return Err(backend("stream entry is missing its id"));
    };
    let id = String::from_utf8(id).map_err(backend)?;
    let delivery_attempt = String::from_utf8_lossy(&attempt)
        .parse::<u32>()
        .map_err(backend)?;

    let mut data = Bytes::new();
    let mut published_at = None;
    let mut attributes = HashMap::new();
    while let (Some(field), Some(value)) = (parts.next(), parts.next()) {
        if field == DATA_FIELD {
            data = Bytes::from(value);
        } else if field == PUBLISHED_FIELD {
            published_at = String::from_utf8_lossy(&value)
                .parse::<i64>()
                .ok()
                .and_then(DateTime::<Utc>::from_timestamp_millis);
        } else if let Some(name) = field.strip_prefix(ATTRIBUTE_PREFIX) {
            attributes.insert(
                String::from_utf8_lossy(name).into_owned(),
                String::from_utf8_lossy(&value).into_owned(),
            );
        }
    }
    Ok(PubSubMessage {
        id,
        data,
        attributes,
        published_at: published_at.unwrap_or_else(Utc::now),
        delivery_attempt,
    })
}

/// [`PubSubTransport`] on Redis Streams consumer groups.
pub struct RedisPubSub {
    pool: RedisPool,
    consumer: String,
    redelivery_idle: Duration,
    closed: CancellationToken,
}

impl RedisPubSub {
    pub fn new(pool: RedisPool, consumer: impl Into<String>, redelivery_idle: Duration) -> Self {
        Self {
            pool,
            consumer: consumer.into(),
            redelivery_idle,
            closed: CancellationToken::new(),
        }
    }

    async fn conn(&self) -> Result<RedisConnection<'_>, PubSubError> {
        checkout(&self.pool).await.map_err(backend)
    }
}

#[async_trait]
impl PubSubTransport for RedisPubSub {
    async fn subscribe(
        &self,
        spec: &SubscriptionSpec,
        max_outstanding: usize,
    ) -> Result<Box<dyn Subscription>, PubSubError> {
        if self.closed.is_cancelled() {
            return Err(PubSubError::Closed);
        }
        let stream = stream_key(&spec.topic);
        let mut conn = self.conn().await?;
        let created = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&stream)
            .arg(&spec.id)
            .arg("$")
            .arg("MKSTREAM")
            .query_async::<()>(&mut *conn)
            .await;
        match created {
            Ok(()) => debug!(stream, group = %spec.id, "consumer group created"),
            Err(err) if err.to_string().contains("BUSYGROUP") => {}
            Err(err) => return Err(backend(err)),
        }
        let max_outstanding = max_outstanding.max(1);
        Ok(Box::new(RedisSubscription {
            pool: self.pool.clone(),
            stream,
            group: spec.id.clone(),
            consumer: self.consumer.clone(),
            redelivery_idle: self.redelivery_idle,
            batch: max_outstanding,
            buffer: VecDeque::new(),
            permits: Arc::new(Semaphore::new(max_outstanding)),
            closed: self.closed.clone(),
        }))
    }

    async fn publish(
        &self,
        topic: &str,
        data: Bytes,
        mut attributes: HashMap<String, String>,
    ) -> Result<String, PubSubError> {
        if self.closed.is_cancelled() {
            return Err(PubSubError::Closed);
        }
        stamp_trace(&mut attributes);
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream_key(topic))
            .arg("*")
            .arg(DATA_FIELD)
            .arg(data.as_ref())
            .arg(PUBLISHED_FIELD)
            .arg(Utc::now().timestamp_millis());
        for (name, value) in &attributes {
            cmd.arg(format!("attr:{name}")).arg(value);
        }
        let mut conn = self.conn().await?;
        cmd.query_async::<String>(&mut *conn).await.map_err(backend)
    }

    async fn close(&self) -> Result<(), PubSubError> {
        self.closed.cancel();
        Ok(())
    }
}

struct RedisSubscription {
    pool: RedisPool,
    stream: String,
    group: String,
    consumer: String,
    redelivery_idle: Duration,
    batch: usize,
    buffer: VecDeque<PubSubMessage>,
    permits: Arc<Semaphore>,
    closed: CancellationToken,
}

impl RedisSubscription {
    async fn fetch(&mut self) -> Result<(), PubSubError> {
        let mut conn = checkout(&self.pool).await.map_err(backend)?;
        let items: Vec<Vec<Vec<u8>>> = redis::cmd("EVAL")
            .arg(RECEIVE)
            .arg(1)
            .arg(&self.stream)
            .arg(&self.group)
            .arg(&self.consumer)
            .arg(millis(self.redelivery_idle))
            .arg(self.batch)
            .query_async(&mut *conn)
            .await
            .map_err(backend)?;
        for item in items {
            self.buffer.push_back(decode_entry(item)?);
        }
        Ok(())
    }
}

#[async_trait]
impl Subscription for RedisSubscription {
    async fn receive(&mut self) -> Result<Option<Delivery>, PubSubError> {
        let closed = self.closed.clone();
        let permit = tokio::select! {
            () = closed.cancelled() => return Ok(None),
            permit = Arc::clone(&self.permits).acquire_owned() => {
                permit.map_err(|_| PubSubError::Closed)?
            }
        };
        loop {
            if let Some(message) = self.buffer.pop_front() {
                let acker = RedisAcker {
                    pool: self.pool.clone(),
                    stream: self.stream.clone(),
                    group: self.group.clone(),
                    message_id: message.id.clone(),
                    _permit: permit,
                };
                return Ok(Some(Delivery::new(message, Box::new(acker))));
            }
            if closed.is_cancelled() {
                return Ok(None);
            }
            self.fetch().await?;
            if self.buffer.is_empty() {
                tokio::select! {
                    () = closed.cancelled() => return Ok(None),
                    () = tokio::time::sleep(POLL_INTERVAL) => {}
                }
            }
        }
    }
}

struct RedisAcker {
    pool: RedisPool,
    stream: String,
    group: String,
    message_id: String,
    _permit: OwnedSemaphorePermit,
}

#[async_trait]
impl Acknowledger for RedisAcker {
    async fn ack(self: Box<Self>) -> Result<(), PubSubError> {
        let mut conn = checkout(&self.pool).await.map_err(backend)?;
        redis::cmd("XACK")
            .arg(&self.stream)
            .arg(&self.group)
            .arg(&self.message_id)
            .query_async::<i64>(&mut *conn)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn nack(self: Box<Self>) -> Result<(), PubSubError> {
        debug!(
            stream = %self.stream,
            group = %self.group,
            message_id = %self.message_id,
            "left pending for redelivery"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(parts: &[&[u8]]) -> Vec<Vec<u8>> {
        parts.iter().map(|part| part.to_vec()).collect()
    }

    #[test]
    fn topics_map_to_streams() {
        assert_eq!(stream_key("orders"), "stream:orders");
    }

    #[test]
    fn entries_decode_into_messages() {
        let message = decode_entry(raw(&[
            b"1700000000000-0",
            b"2",
            b"data",
            b"{\"a\":1}",
            b"published_at",
            b"1700000000000",
            b"attr:traceparent",
            b"00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
        ]))
        .expect("decode");
        assert_eq!(message.id, "1700000000000-0");
        assert_eq!(message.delivery_attempt, 2);
        assert_eq!(message.data, Bytes::from_static(b"{\"a\":1}"));
        assert_eq!(message.published_at.timestamp(), 1_700_000_000);
        assert_eq!(
            message.attributes.get("traceparent").map(String::as_str),
            Some("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01")
        );
    }

    #[test]
    fn entries_without_ids_are_rejected() {
        assert!(matches!(
            decode_entry(Vec::new()),
            Err(PubSubError::Backend { .. })
        ));
    }
}
