//! Pub/sub consumer counting audit events per action.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, error, info};

use crate::domain::{AsyncResult, Consumer, Envelope, Error, MessageContext};
use crate::domain::ports::Cache;

/// Payload published on the audit topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub actor: String,
    pub action: String,
    #[serde(default)]
    pub resource: Option<String>,
}

/// Keeps a running count per action under `audit:<action>`.
pub struct AuditConsumer {
    cache: Arc<dyn Cache>,
}

impl AuditConsumer {
    pub fn new(cache: Arc<dyn Cache>) -> Self {
        Self { cache }
    }

    async fn record(&self, ctx: &MessageContext) -> Result<i64, Error> {
        let event: AuditEvent = ctx.json()?;
        if event.action.trim().is_empty() {
            return Err(Error::validation_failed("audit event has no action"));
        }
        let key = format!("audit:{}", event.action);
        let count = ctx
            .call_context()
            .run(self.cache.increment(&key, 1))
            .await??;
        Ok(count)
    }
}

#[async_trait]
impl Consumer for AuditConsumer {
    fn name(&self) -> &'static str {
        "Consumer.Audit"
    }

    async fn consume(&self, ctx: MessageContext) -> AsyncResult {
        let mut span = ctx.start_span(self.name());
        let log_span = span.log_span();
        let result = self.record(&ctx).instrument(log_span.clone()).await;
        let _entered = log_span.enter();
        let outcome = match result {
            Ok(count) => {
                info!(message_id = %ctx.id, count, "audit event recorded");
                AsyncResult::ok()
            }
            Err(err) => {
                span.record_error(&err);
                error!(message_id = %ctx.id, error = %err.message(), "audit event rejected");
                AsyncResult::failed(err)
            }
        };
        span.end();
        outcome
    }
}
