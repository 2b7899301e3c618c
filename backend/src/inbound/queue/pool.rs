//! Fixed-size worker pool draining weighted queues.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use super::registry::JobRegistry;
use super::scheduler::WeightedQueues;
use crate::config::{Config, QueueConfig};
use crate::domain::ports::{JobRecord, JobSource, QueueError};
use crate::domain::{CallContext, Interrupted, JobContext, JobError};
use crate::inbound::InFlight;
use crate::telemetry::{TraceContext, Tracer};

/// Pause between polls when every queue is empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

const MAX_RETRY_DELAY: Duration = Duration::from_secs(60 * 60);

/// Backoff before retry number `retried + 1`: one second doubled per
/// previous failure, capped at an hour.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use skeleton::inbound::queue::retry_delay;
///
/// assert_eq!(retry_delay(0), Duration::from_secs(1));
/// assert_eq!(retry_delay(3), Duration::from_secs(8));
/// assert_eq!(retry_delay(40), Duration::from_secs(3600));
/// ```
#[must_use]
pub fn retry_delay(retried: u32) -> Duration {
    2_u64
        .checked_pow(retried)
        .map_or(MAX_RETRY_DELAY, Duration::from_secs)
        .min(MAX_RETRY_DELAY)
}

struct Shared {
    source: Arc<dyn JobSource>,
    registry: JobRegistry,
    queues: WeightedQueues,
    config: Arc<Config>,
    tracer: Tracer,
    in_flight: InFlight,
    abort: CancellationToken,
    poll_interval: Duration,
}

/// Workers that dequeue jobs and dispatch them to registered handlers.
///
/// A handler error schedules a retry after [`retry_delay`] while the job has
/// retries left and archives it otherwise. [`JobError::Permanent`] archives
/// at once. Jobs whose type has no handler are completed with a warning.
pub struct WorkerPool {
    shared: Arc<Shared>,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(
        source: Arc<dyn JobSource>,
        registry: JobRegistry,
        settings: &QueueConfig,
        config: Arc<Config>,
    ) -> Self {
        let queues = WeightedQueues::new(
            settings
                .weights
                .iter()
                .map(|(name, weight)| (name.clone(), *weight)),
        );
        Self {
            shared: Arc::new(Shared {
                source,
                registry,
                queues,
                config,
                tracer: Tracer::default(),
                in_flight: InFlight::default(),
                abort: CancellationToken::new(),
                poll_interval: DEFAULT_POLL_INTERVAL,
            }),
            concurrency: settings.concurrency.max(1),
        }
    }

    fn shared_mut(&mut self) -> Option<&mut Shared> {
        Arc::get_mut(&mut self.shared)
    }

    #[must_use]
    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        if let Some(shared) = self.shared_mut() {
            shared.tracer = tracer;
        }
        self
    }

    /// Count running jobs in `in_flight`.
    #[must_use]
    pub fn with_in_flight(mut self, in_flight: InFlight) -> Self {
        if let Some(shared) = self.shared_mut() {
            shared.in_flight = in_flight;
        }
        self
    }

    /// Token cancelling running jobs, fired once the drain deadline passes.
    #[must_use]
    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        if let Some(shared) = self.shared_mut() {
            shared.abort = abort;
        }
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        if let Some(shared) = self.shared_mut() {
            shared.poll_interval = interval;
        }
        self
    }

    /// Run until `shutdown` is cancelled. Workers stop taking jobs at once
    /// and the call returns when their current jobs have finished.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            operation = "Worker.Start",
            concurrency = self.concurrency,
            queues = ?self.shared.queues.names(),
            handlers = ?self.shared.registry,
            "queue worker started"
        );
        let mut workers = JoinSet::new();
        for worker in 0..self.concurrency {
            let shared = Arc::clone(&self.shared);
            let shutdown = shutdown.clone();
            workers.spawn(async move { shared.work(worker, shutdown).await });
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!(operation = "Worker.Crash", error = %err, "queue worker task failed");
            }
        }
        info!(operation = "Worker.Stop", "queue worker stopped");
    }
}

impl Shared {
    async fn work(&self, worker: usize, shutdown: CancellationToken) {
        while !shutdown.is_cancelled() {
            let idle = match self.next_job().await {
                Ok(Some(job)) => {
                    self.process(job).await;
                    false
                }
                Ok(None) => true,
                Err(err) => {
                    warn!(operation = "Worker.Dequeue", worker, error = %err, "dequeue failed");
                    true
                }
            };
            if idle {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(self.poll_interval) => {}
                }
            }
        }
        debug!(operation = "Worker.Exit", worker, "worker exiting");
    }

    async fn next_job(&self) -> Result<Option<JobRecord>, QueueError> {
        for queue in self.queues.order() {
            if let Some(job) = self.source.dequeue(&queue).await? {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    async fn process(&self, job: JobRecord) {
        let _in_flight = self.in_flight.enter();
        let mut span = self.tracer.continue_remote(
            format!("job.{}", job.job_type),
            job.traceparent.as_deref(),
            None,
        );
        let Some(handler) = self.registry.get(&job.job_type) else {
            span.set_attribute("outcome", "no_handler");
            warn!(
                parent: &span.log_span(),
                operation = "Worker.UnknownJob",
                job_id = %job.id,
                job_type = %job.job_type,
                queue = %job.queue,
                "no handler registered; discarding job"
            );
            self.settle(self.source.complete(&job).await, &job);
            span.end();
            return;
        };

        let trace = span.context().clone();
        let deadline = Instant::now() + job.timeout();
        let cancellation = self.abort.child_token();
        let ctx = JobContext::new(
            job.id.clone(),
            job.job_type.clone(),
            job.payload.clone(),
            Arc::clone(&self.config),
        )
        .with_queue(job.queue.clone())
        .with_attempts(job.retried, job.max_retry)
        .with_deadline(deadline)
        .with_trace(trace.clone())
        .with_tracer(self.tracer.clone())
        .with_cancellation(cancellation.clone());

        let bounded = CallContext::new(cancellation, Some(deadline), None);
        let work = TraceContext::scope(trace, handler.handle(ctx));
        let log_span = span.log_span();
        let outcome = match bounded.run(work).instrument(log_span.clone()).await {
            Ok(result) => result,
            Err(Interrupted::DeadlineExceeded) => Err(JobError::retryable("job timed out")),
            Err(Interrupted::Cancelled) => Err(JobError::retryable("job interrupted by shutdown")),
        };

        async {
            match outcome {
                Ok(()) => {
                    info!(
                        operation = "Worker.Done",
                        job_id = %job.id,
                        job_type = %job.job_type,
                        attempt = job.retried,
                        "job completed"
                    );
                    self.settle(self.source.complete(&job).await, &job);
                }
                Err(err) => {
                    span.record_error(&err);
                    self.fail(job, &err).await;
                }
            }
        }
        .instrument(log_span)
        .await;
        span.end();
    }

    async fn fail(&self, job: JobRecord, err: &JobError) {
        let message = err.to_string();
        let exhausted = job.retried >= job.max_retry;
        if matches!(err, JobError::Permanent { .. }) || exhausted {
            error!(
                operation = "Worker.Archive",
                job_id = %job.id,
                job_type = %job.job_type,
                attempt = job.retried,
                error = %message,
                "job failed permanently"
            );
            let settled = self.source.archive(job.clone(), &message).await;
            self.settle(settled, &job);
        } else {
            let delay = retry_delay(job.retried);
            warn!(
                operation = "Worker.Retry",
                job_id = %job.id,
                job_type = %job.job_type,
                attempt = job.retried,
                max_retry = job.max_retry,
                delay_secs = delay.as_secs(),
                error = %message,
                "job failed; retrying"
            );
            let settled = self.source.retry(job.clone(), &message, delay).await;
            self.settle(settled, &job);
        }
    }

    fn settle(&self, result: Result<(), QueueError>, job: &JobRecord) {
        if let Err(err) = result {
            error!(
                operation = "Worker.Settle",
                job_id = %job.id,
                job_type = %job.job_type,
                error = %err,
                "failed to record job outcome"
            );
        }
    }
}
