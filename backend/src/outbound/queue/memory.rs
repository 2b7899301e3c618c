//! In-process job queue for development and tests.
//!
//! Producer and worker must share the same instance, so this driver only
//! makes sense when both run in one process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::Clock;
use parking_lot::Mutex;

use crate::domain::ports::{
    EnqueueOptions, JobInfo, JobQueue, JobRecord, JobSource, QueueError,
};
use crate::telemetry::TraceContext;

#[derive(Debug, Default)]
struct QueueState {
    scheduled: HashMap<String, Vec<JobRecord>>,
    active: HashMap<String, JobRecord>,
    archived: Vec<JobRecord>,
    /// Unique key → (owning job id, lock expiry).
    locks: HashMap<String, (String, DateTime<Utc>)>,
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay).map_or(DateTime::<Utc>::MAX_UTC, |delta| now + delta)
}

/// Job queue held in process memory.
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    clock: Arc<dyn Clock>,
}

impl MemoryQueue {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            clock,
        }
    }

    /// Jobs waiting in `queue`, eligible or not.
    #[must_use]
    pub fn pending(&self, queue: &str) -> usize {
        self.state.lock().scheduled.get(queue).map_or(0, Vec::len)
    }

    /// Jobs given up on, oldest first.
    #[must_use]
    pub fn archived(&self) -> Vec<JobRecord> {
        self.state.lock().archived.clone()
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue_raw(
        &self,
        job_type: &str,
        payload: Vec<u8>,
        options: EnqueueOptions,
    ) -> Result<JobInfo, QueueError> {
        let now = self.clock.utc();
        let traceparent = TraceContext::current().map(|ctx| ctx.traceparent());
        let record = JobRecord::new(job_type, payload, &options, now, traceparent);
        let mut state = self.state.lock();
        if let (Some(key), Some(ttl)) = (&record.unique_key, options.unique_ttl) {
            if state.locks.get(key).is_some_and(|(_, expiry)| *expiry > now) {
                return Err(QueueError::duplicate(job_type));
            }
            state
                .locks
                .insert(key.clone(), (record.id.clone(), after(now, ttl)));
        }
        let info = record.info();
        state
            .scheduled
            .entry(record.queue.clone())
            .or_default()
            .push(record);
        Ok(info)
    }

    async fn close(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[async_trait]
impl JobSource for MemoryQueue {
    /// Earliest eligible job first.
    async fn dequeue(&self, queue: &str) -> Result<Option<JobRecord>, QueueError> {
        let now = self.clock.utc();
        let mut state = self.state.lock();
        let Some(jobs) = state.scheduled.get_mut(queue) else {
            return Ok(None);
        };
        let next = jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| job.process_at <= now)
            .min_by_key(|(_, job)| job.process_at)
            .map(|(index, _)| index);
        let Some(index) = next else {
            return Ok(None);
        };
        let job = jobs.remove(index);
        state.active.insert(job.id.clone(), job.clone());
        Ok(Some(job))
    }

    async fn complete(&self, job: &JobRecord) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        state.active.remove(&job.id);
        if let Some(key) = &job.unique_key {
            if state.locks.get(key).is_some_and(|(owner, _)| *owner == job.id) {
                state.locks.remove(key);
            }
        }
        Ok(())
    }

    async fn retry(
        &self,
        mut job: JobRecord,
        error: &str,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let now = self.clock.utc();
        let mut state = self.state.lock();
        state.active.remove(&job.id);
        job.retried += 1;
        job.last_error = Some(error.to_owned());
        job.process_at = after(now, delay);
        state
            .scheduled
            .entry(job.queue.clone())
            .or_default()
            .push(job);
        Ok(())
    }

    async fn archive(&self, mut job: JobRecord, error: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        state.active.remove(&job.id);
        job.last_error = Some(error.to_owned());
        state.archived.push(job);
        Ok(())
    }

    async fn close(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
