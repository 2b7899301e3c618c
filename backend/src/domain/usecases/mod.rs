//! Demonstration use-cases wired by the bootstrap.
//!
//! They exist to exercise every ingress end to end: `Login` and `Profile`
//! sit behind the HTTP pipeline, `ReceiveWebhook` hands work to the queue,
//! the job handlers run on the worker and `AuditConsumer` on pub/sub.

mod audit;
mod jobs;
mod login;
mod profile;
mod webhook;

pub use audit::{AuditConsumer, AuditEvent};
pub use jobs::{EmailJob, ProcessWebhook, SendEmail};
pub use login::{INVALID_CREDENTIALS, Login};
pub use profile::Profile;
pub use webhook::{ReceiveWebhook, WebhookJob};

use tracing::{error, info};

use super::{Error, Response};
use crate::telemetry::TraceSpan;

/// Job type handled by [`SendEmail`].
pub const EMAIL_SEND_JOB: &str = "email:send";
/// Job type enqueued by [`ReceiveWebhook`] and handled by [`ProcessWebhook`].
pub const WEBHOOK_PROCESS_JOB: &str = "webhook:process";

/// Close a use-case span, log its single outcome event and shape the result.
pub(crate) fn conclude(mut span: TraceSpan, result: Result<Response, Error>) -> Response {
    let log_span = span.log_span();
    let _entered = log_span.enter();
    let operation = span.name().to_owned();
    let response = match result {
        Ok(response) => {
            info!(%operation, code = response.http_status(), "use-case succeeded");
            response
        }
        Err(err) => {
            span.record_error(&err);
            error!(
                %operation,
                code = err.code().http_status(),
                error = %err.message(),
                "use-case failed"
            );
            Response::from(err)
        }
    };
    span.end();
    response
}
