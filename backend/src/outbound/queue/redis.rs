//! Redis-backed job queue.
//!
//! Layout, per queue `q`:
//! - `queue:{q}:pending` list of job ids ready to run;
//! - `queue:{q}:scheduled` sorted set of delayed or retrying ids, scored by
//!   eligibility in epoch milliseconds;
//! - `queue:{q}:active` list of ids currently held by a worker;
//! - `queue:{q}:archived` sorted set of ids given up on.
//!
//! Job bodies live under `queue:job:{id}` as JSON. Uniqueness locks are plain
//! keys set with `NX PX` whose value is the owning job id.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bb8_redis::redis;
use chrono::{DateTime, Utc};
use mockable::Clock;

use crate::domain::ports::{EnqueueOptions, JobInfo, JobQueue, JobRecord, JobSource, QueueError};
use crate::outbound::redis_pool::{RedisConnection, RedisPool, checkout};
use crate::telemetry::TraceContext;

const ENQUEUE: &str = r"
if ARGV[5] ~= '0' then
  if not redis.call('SET', KEYS[4], ARGV[2], 'NX', 'PX', ARGV[5]) then
    return 0
  end
end
redis.call('SET', KEYS[1], ARGV[1])
if tonumber(ARGV[3]) <= tonumber(ARGV[4]) then
  redis.call('LPUSH', KEYS[2], ARGV[2])
else
  redis.call('ZADD', KEYS[3], ARGV[3], ARGV[2])
end
return 1
";

const DEQUEUE: &str = r"
local due = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1], 'LIMIT', 0, 100)
for _, id in ipairs(due) do
  redis.call('ZREM', KEYS[2], id)
  redis.call('LPUSH', KEYS[1], id)
end
local id = redis.call('RPOPLPUSH', KEYS[1], KEYS[3])
if not id then
  return false
end
return redis.call('GET', ARGV[2] .. id)
";

const COMPLETE: &str = r"
redis.call('LREM', KEYS[1], 1, ARGV[1])
redis.call('DEL', KEYS[2])
if ARGV[2] == '1' and redis.call('GET', KEYS[3]) == ARGV[1] then
  redis.call('DEL', KEYS[3])
end
return 1
";

const RESCHEDULE: &str = r"
redis.call('LREM', KEYS[1], 1, ARGV[1])
redis.call('SET', KEYS[2], ARGV[2])
redis.call('ZADD', KEYS[3], ARGV[3], ARGV[1])
return 1
";

const JOB_PREFIX: &str = "queue:job:";

fn backend(err: impl std::fmt::Display) -> QueueError {
    QueueError::backend(err.to_string())
}

fn queue_key(queue: &str, part: &str) -> String {
    format!("queue:{queue}:{part}")
}

fn job_key(id: &str) -> String {
    format!("{JOB_PREFIX}{id}")
}

fn score(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn encode(job: &JobRecord) -> Result<String, QueueError> {
    serde_json::to_string(job).map_err(|err| QueueError::serialization(err.to_string()))
}

/// Queue shared by producers and workers pointing at the same Redis.
pub struct RedisQueue {
    pool: RedisPool,
    clock: Arc<dyn Clock>,
}

impl RedisQueue {
    pub fn new(pool: RedisPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    async fn conn(&self) -> Result<RedisConnection<'_>, QueueError> {
        checkout(&self.pool).await.map_err(backend)
    }

    async fn reschedule(
        &self,
        job: &JobRecord,
        target: &str,
        at: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        let body = encode(job)?;
        let mut conn = self.conn().await?;
        redis::cmd("EVAL")
            .arg(RESCHEDULE)
            .arg(3)
            .arg(queue_key(&job.queue, "active"))
            .arg(job_key(&job.id))
            .arg(queue_key(&job.queue, target))
            .arg(&job.id)
            .arg(body)
            .arg(score(at))
            .query_async::<i64>(&mut *conn)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue_raw(
        &self,
        job_type: &str,
        payload: Vec<u8>,
        options: EnqueueOptions,
    ) -> Result<JobInfo, QueueError> {
        let now = self.clock.utc();
        let traceparent = TraceContext::current().map(|ctx| ctx.traceparent());
        let record = JobRecord::new(job_type, payload, &options, now, traceparent);
        let body = encode(&record)?;
        let lock_ttl = options
            .unique_ttl
            .map_or(0, |ttl| u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1));
        let lock_key = record
            .unique_key
            .clone()
            .unwrap_or_else(|| job_key(&record.id));

        let mut conn = self.conn().await?;
        let accepted: i64 = redis::cmd("EVAL")
            .arg(ENQUEUE)
            .arg(4)
            .arg(job_key(&record.id))
            .arg(queue_key(&record.queue, "pending"))
            .arg(queue_key(&record.queue, "scheduled"))
            .arg(lock_key)
            .arg(body)
            .arg(&record.id)
            .arg(score(record.process_at))
            .arg(score(now))
            .arg(lock_ttl)
            .query_async(&mut *conn)
            .await
            .map_err(backend)?;
        if accepted == 0 {
            return Err(QueueError::duplicate(job_type));
        }
        Ok(record.info())
    }

    async fn close(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[async_trait]
impl JobSource for RedisQueue {
    async fn dequeue(&self, queue: &str) -> Result<Option<JobRecord>, QueueError> {
        let now = self.clock.utc();
        let mut conn = self.conn().await?;
        let body: Option<String> = redis::cmd("EVAL")
            .arg(DEQUEUE)
            .arg(3)
            .arg(queue_key(queue, "pending"))
            .arg(queue_key(queue, "scheduled"))
            .arg(queue_key(queue, "active"))
            .arg(score(now))
            .arg(JOB_PREFIX)
            .query_async(&mut *conn)
            .await
            .map_err(backend)?;
        body.map(|raw| {
            serde_json::from_str(&raw).map_err(|err| QueueError::serialization(err.to_string()))
        })
        .transpose()
    }

    async fn complete(&self, job: &JobRecord) -> Result<(), QueueError> {
        let (unique, lock_key) = match &job.unique_key {
            Some(key) => ("1", key.clone()),
            None => ("0", job_key(&job.id)),
        };
        let mut conn = self.conn().await?;
        redis::cmd("EVAL")
            .arg(COMPLETE)
            .arg(3)
            .arg(queue_key(&job.queue, "active"))
            .arg(job_key(&job.id))
            .arg(lock_key)
            .arg(&job.id)
            .arg(unique)
            .query_async::<i64>(&mut *conn)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn retry(
        &self,
        mut job: JobRecord,
        error: &str,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let now = self.clock.utc();
        job.retried += 1;
        job.last_error = Some(error.to_owned());
        job.process_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(now);
        self.reschedule(&job, "scheduled", job.process_at).await
    }

    async fn archive(&self, mut job: JobRecord, error: &str) -> Result<(), QueueError> {
        job.last_error = Some(error.to_owned());
        self.reschedule(&job, "archived", self.clock.utc()).await
    }

    async fn close(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_per_queue() {
        assert_eq!(queue_key("critical", "pending"), "queue:critical:pending");
        assert_eq!(job_key("j1"), "queue:job:j1");
    }

    #[test]
    fn scores_are_epoch_millis() {
        let at = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("timestamp");
        assert_eq!(score(at), 1_700_000_000_000);
    }

    #[test]
    fn scripts_use_the_declared_key_count() {
        assert!(ENQUEUE.contains("KEYS[4]") && !ENQUEUE.contains("KEYS[5]"));
        assert!(DEQUEUE.contains("KEYS[3]") && !DEQUEUE.contains("KEYS[4]"));
        assert!(COMPLETE.contains("KEYS[3]") && !COMPLETE.contains("KEYS[4]"));
    }
}
