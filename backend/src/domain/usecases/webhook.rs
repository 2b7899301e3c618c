//! Accept webhook deliveries and defer their processing to the worker.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::Instrument;

use crate::domain::ports::{EnqueueOptions, JobQueue, JobQueueExt};
use crate::domain::{Envelope, Error, RequestContext, Response, UseCase};

use super::{WEBHOOK_PROCESS_JOB, conclude};

const SOURCE_HEADER: &str = "x-webhook-source";
const WEBHOOK_MAX_RETRY: u32 = 5;

/// Payload of a `webhook:process` job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookJob {
    pub delivery_id: String,
    pub source: String,
    pub received_at: DateTime<Utc>,
    pub body: Value,
}

/// `POST /hook`; answers `202` once the delivery is queued.
pub struct ReceiveWebhook {
    queue: Arc<dyn JobQueue>,
}

impl ReceiveWebhook {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    async fn accept(&self, ctx: &RequestContext) -> Result<Response, Error> {
        let body: Value = ctx.json()?;
        let job = WebhookJob {
            delivery_id: uuid::Uuid::new_v4().to_string(),
            source: ctx
                .request()
                .header(SOURCE_HEADER)
                .unwrap_or("unknown")
                .to_owned(),
            received_at: Utc::now(),
            body,
        };
        let options = EnqueueOptions::default().max_retry(WEBHOOK_MAX_RETRY);
        let info = ctx
            .call_context()
            .run(
                self.queue
                    .enqueue_with_options(WEBHOOK_PROCESS_JOB, &job, options),
            )
            .await??;
        Ok(Response::success(
            202,
            json!({ "delivery_id": job.delivery_id, "job_id": info.id, "queue": info.queue }),
        ))
    }
}

#[async_trait]
impl UseCase for ReceiveWebhook {
    fn name(&self) -> &'static str {
        "UseCase.ReceiveWebhook"
    }

    async fn serve(&self, ctx: &mut RequestContext) -> Response {
        let span = ctx.start_span(self.name());
        let result = self.accept(ctx).instrument(span.log_span()).await;
        conclude(span, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::InboundRequest;
    use crate::domain::ports::{JobInfo, MockJobQueue, QueueError};

    fn context(body: &str) -> RequestContext {
        let request = InboundRequest::new("POST", "/hook")
            .with_header("X-Webhook-Source", "billing")
            .with_body(body.to_owned());
        RequestContext::new(request, Arc::new(Config::default()))
    }

    #[tokio::test]
    async fn queues_the_delivery() {
        let mut queue = MockJobQueue::new();
        queue
            .expect_enqueue_raw()
            .withf(|job_type, payload, options| {
                let job: WebhookJob = serde_json::from_slice(payload).expect("job payload");
                job_type == WEBHOOK_PROCESS_JOB
                    && job.source == "billing"
                    && job.body == json!({ "a": 1 })
                    && options.max_retry == WEBHOOK_MAX_RETRY
            })
            .times(1)
            .returning(|job_type, _, options| {
                Ok(JobInfo {
                    id: "job-1".to_owned(),
                    job_type: job_type.to_owned(),
                    queue: options.queue,
                    process_at: Utc::now(),
                })
            });
        let use_case = ReceiveWebhook::new(Arc::new(queue));

        let response = use_case.serve(&mut context(r#"{"a":1}"#)).await;

        assert_eq!(response.code, 202);
        assert_eq!(response.data.expect("data")["job_id"], json!("job-1"));
    }

    #[tokio::test]
    async fn queue_outage_is_reported() {
        let mut queue = MockJobQueue::new();
        queue
            .expect_enqueue_raw()
            .returning(|_, _, _| Err(QueueError::backend("down")));
        let use_case = ReceiveWebhook::new(Arc::new(queue));

        let response = use_case.serve(&mut context("{}")).await;

        assert_eq!(response.code, 503);
    }
}
