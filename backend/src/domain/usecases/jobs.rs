//! Handlers for the demonstration job types.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, info};

use crate::domain::ports::{Cache, CacheError};
use crate::domain::{Envelope, Interrupted, JobContext, JobError, JobHandler};

use super::WebhookJob;

/// Processed webhook deliveries are remembered this long.
const PROCESSED_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Payload of an `email:send` job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailJob {
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

/// Hands an email to the mail relay; here the relay is the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct SendEmail;

#[async_trait]
impl JobHandler for SendEmail {
    async fn handle(&self, ctx: JobContext) -> Result<(), JobError> {
        let span = ctx.start_span("Job.SendEmail");
        let email: EmailJob = ctx.json()?;
        if email.to.trim().is_empty() {
            return Err(JobError::permanent("email job has no recipient"));
        }
        span.log_span().in_scope(|| {
            info!(
                job_id = %ctx.id,
                attempt = ctx.attempt,
                subject = %email.subject,
                "email dispatched"
            );
        });
        span.end();
        Ok(())
    }
}

/// Applies a webhook delivery at most once per delivery id.
pub struct ProcessWebhook {
    cache: Arc<dyn Cache>,
}

impl ProcessWebhook {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    fn marker(delivery_id: &str) -> String {
        format!("webhook:processed:{delivery_id}")
    }

    async fn apply(&self, ctx: &JobContext, job: &WebhookJob) -> Result<(), JobError> {
        let key = Self::marker(&job.delivery_id);
        let call = ctx.call_context();
        if call.run(self.cache.exists(&key)).await.map_err(interrupted)?.map_err(retry)? {
            info!(delivery_id = %job.delivery_id, "webhook already processed");
            return Ok(());
        }
        call.run(self.cache.set(&key, job.source.as_bytes(), PROCESSED_TTL))
            .await
            .map_err(interrupted)?
            .map_err(retry)?;
        info!(
            delivery_id = %job.delivery_id,
            source = %job.source,
            "webhook processed"
        );
        Ok(())
    }
}

fn retry(err: CacheError) -> JobError {
    JobError::retryable(err.to_string())
}

fn interrupted(err: Interrupted) -> JobError {
    JobError::retryable(err.to_string())
}

#[async_trait]
impl JobHandler for ProcessWebhook {
    async fn handle(&self, ctx: JobContext) -> Result<(), JobError> {
        let mut span = ctx.start_span("Job.ProcessWebhook");
        let job: WebhookJob = ctx.json()?;
        let result = self.apply(&ctx, &job).instrument(span.log_span()).await;
        if let Err(err) = &result {
            span.record_error(err);
        }
        span.end();
        result
    }
}
