//! Ports for the delayed job queue.
//!
//! Producers enqueue through [`JobQueue`]; the worker ingress drains the
//! same transport through [`JobSource`]. Payloads are opaque bytes; the
//! typed helpers on [`JobQueueExt`] encode JSON.
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::define_port_error;

/// Queue used when none is given.
pub const DEFAULT_QUEUE: &str = "default";
/// Retries allowed when none are given.
pub const DEFAULT_MAX_RETRY: u32 = 25;
/// Per-run timeout used when none is given.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30 * 60);

define_port_error! {
    /// Errors surfaced by queue adapters.
    pub enum QueueError {
        /// A unique job with the same queue, type and payload is pending.
        Duplicate { job_type: String } => "duplicate job: {job_type} is already enqueued",
        Serialization { message: String } => "job serialisation failed: {message}",
        Backend { message: String } => "queue backend failure: {message}",
    }
}

impl From<QueueError> for crate::domain::Error {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Duplicate { .. } => Self::conflict(err.to_string()),
            QueueError::Serialization { .. } => Self::internal(err.to_string()),
            QueueError::Backend { .. } => Self::service_unavailable(err.to_string()),
        }
    }
}

/// When a job becomes eligible for processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Schedule {
    #[default]
    Now,
    Delay(Duration),
    At(DateTime<Utc>),
}

impl Schedule {
    /// Absolute eligibility time relative to `now`.
    #[must_use]
    pub fn process_at(self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Now => now,
            Self::Delay(delay) => chrono::Duration::from_std(delay)
                .ok()
                .and_then(|delta| now.checked_add_signed(delta))
                .unwrap_or(now),
            Self::At(at) => at,
        }
    }
}

/// Enqueue options.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use skeleton::domain::ports::EnqueueOptions;
///
/// let options = EnqueueOptions::default()
///     .queue("critical")
///     .max_retry(3)
///     .unique(Duration::from_secs(60));
/// assert_eq!(options.queue, "critical");
/// assert_eq!(options.unique_ttl, Some(Duration::from_secs(60)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOptions {
    pub queue: String,
    pub max_retry: u32,
    pub timeout: Duration,
    pub schedule: Schedule,
    /// When set, an identical job enqueued within this TTL is rejected.
    pub unique_ttl: Option<Duration>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_owned(),
            max_retry: DEFAULT_MAX_RETRY,
            timeout: DEFAULT_JOB_TIMEOUT,
            schedule: Schedule::Now,
            unique_ttl: None,
        }
    }
}

impl EnqueueOptions {
    #[must_use]
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    #[must_use]
    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.schedule = Schedule::Delay(delay);
        self
    }

    #[must_use]
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.schedule = Schedule::At(at);
        self
    }

    #[must_use]
    pub fn unique(mut self, ttl: Duration) -> Self {
        self.unique_ttl = Some(ttl);
        self
    }
}

/// Key guarding uniqueness of `(queue, job_type, payload)`.
#[must_use]
pub fn unique_key(queue: &str, job_type: &str, payload: &[u8]) -> String {
    let digest = Sha256::digest(payload);
    format!("unique:{queue}:{job_type}:{}", hex::encode(digest))
}

/// A job as stored by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub job_type: String,
    pub queue: String,
    pub payload: Vec<u8>,
    /// Number of failed runs so far.
    pub retried: u32,
    pub max_retry: u32,
    pub timeout_secs: u64,
    pub enqueued_at: DateTime<Utc>,
    pub process_at: DateTime<Utc>,
    /// Producer trace position, continued by the worker.
    pub traceparent: Option<String>,
    pub unique_key: Option<String>,
    pub last_error: Option<String>,
}

impl JobRecord {
    /// Build the stored form of a new job.
    #[must_use]
    pub fn new(
        job_type: &str,
        payload: Vec<u8>,
        options: &EnqueueOptions,
        now: DateTime<Utc>,
        traceparent: Option<String>,
    ) -> Self {
        let unique_key = options
            .unique_ttl
            .map(|_| unique_key(&options.queue, job_type, &payload));
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_type: job_type.to_owned(),
            queue: options.queue.clone(),
            payload,
            retried: 0,
            max_retry: options.max_retry,
            timeout_secs: options.timeout.as_secs(),
            enqueued_at: now,
            process_at: options.schedule.process_at(now),
            traceparent,
            unique_key,
            last_error: None,
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn info(&self) -> JobInfo {
        JobInfo {
            id: self.id.clone(),
            job_type: self.job_type.clone(),
            queue: self.queue.clone(),
            process_at: self.process_at,
        }
    }
}

/// Receipt returned to producers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub id: String,
    pub job_type: String,
    pub queue: String,
    pub process_at: DateTime<Utc>,
}

/// Producer side of the queue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue_raw(
        &self,
        job_type: &str,
        payload: Vec<u8>,
        options: EnqueueOptions,
    ) -> Result<JobInfo, QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}

/// Typed enqueue helpers over any [`JobQueue`].
#[async_trait]
pub trait JobQueueExt: JobQueue {
    async fn enqueue<T: Serialize + Sync>(
        &self,
        job_type: &str,
        payload: &T,
    ) -> Result<JobInfo, QueueError> {
        self.enqueue_with_options(job_type, payload, EnqueueOptions::default())
            .await
    }

    async fn enqueue_with_delay<T: Serialize + Sync>(
        &self,
        job_type: &str,
        payload: &T,
        delay: Duration,
    ) -> Result<JobInfo, QueueError> {
        self.enqueue_with_options(job_type, payload, EnqueueOptions::default().delay(delay))
            .await
    }

    async fn enqueue_at<T: Serialize + Sync>(
        &self,
        job_type: &str,
        payload: &T,
        at: DateTime<Utc>,
    ) -> Result<JobInfo, QueueError> {
        self.enqueue_with_options(job_type, payload, EnqueueOptions::default().at(at))
            .await
    }

    async fn enqueue_with_options<T: Serialize + Sync>(
        &self,
        job_type: &str,
        payload: &T,
        options: EnqueueOptions,
    ) -> Result<JobInfo, QueueError> {
        let bytes = serde_json::to_vec(payload)
            .map_err(|err| QueueError::serialization(err.to_string()))?;
        self.enqueue_raw(job_type, bytes, options).await
    }
}

impl<Q: JobQueue + ?Sized> JobQueueExt for Q {}

/// Worker side of the queue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Take the next eligible job from `queue`, if any.
    async fn dequeue(&self, queue: &str) -> Result<Option<JobRecord>, QueueError>;

    /// The job finished; forget it and release its uniqueness lock.
    async fn complete(&self, job: &JobRecord) -> Result<(), QueueError>;

    /// Make the job eligible again after `delay`.
    async fn retry(&self, job: JobRecord, error: &str, delay: Duration) -> Result<(), QueueError>;

    /// Give up on the job and keep it for inspection.
    async fn archive(&self, job: JobRecord, error: &str) -> Result<(), QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unique_key_depends_on_every_component() {
        let base = unique_key("default", "email:send", b"{}");
        assert_ne!(base, unique_key("critical", "email:send", b"{}"));
        assert_ne!(base, unique_key("default", "sms:send", b"{}"));
        assert_ne!(base, unique_key("default", "email:send", b"{\"a\":1}"));
        assert_eq!(base, unique_key("default", "email:send", b"{}"));
    }

    #[test]
    fn delay_schedules_in_the_future() {
        let now = Utc::now();
        let at = Schedule::Delay(Duration::from_secs(90)).process_at(now);
        assert_eq!((at - now).num_seconds(), 90);
    }

    #[test]
    fn new_records_only_carry_unique_keys_when_requested() {
        let now = Utc::now();
        let plain = JobRecord::new("a", b"{}".to_vec(), &EnqueueOptions::default(), now, None);
        assert!(plain.unique_key.is_none());
        let unique = JobRecord::new(
            "a",
            b"{}".to_vec(),
            &EnqueueOptions::default().unique(Duration::from_secs(60)),
            now,
            None,
        );
        assert_eq!(
            unique.unique_key.as_deref(),
            Some(unique_key("default", "a", b"{}").as_str())
        );
    }

    #[tokio::test]
    async fn typed_enqueue_encodes_json() {
        let mut queue = MockJobQueue::new();
        queue
            .expect_enqueue_raw()
            .withf(|job_type, payload, options| {
                job_type == "email:send"
                    && payload.as_slice() == br#"{"to":"a@example.com"}"#
                    && options.schedule == Schedule::Delay(Duration::from_secs(10))
            })
            .returning(|job_type, _, options| {
                Ok(JobInfo {
                    id: "j1".to_owned(),
                    job_type: job_type.to_owned(),
                    queue: options.queue,
                    process_at: Utc::now(),
                })
            });

        let info = queue
            .enqueue_with_delay(
                "email:send",
                &json!({ "to": "a@example.com" }),
                Duration::from_secs(10),
            )
            .await
            .expect("enqueue");
        assert_eq!(info.queue, DEFAULT_QUEUE);
    }
}
