//! The contracts every ingress dispatches to.
//!
//! Business logic implements one of these traits and stays unaware of how
//! the event arrived. Implementations are expected to open a span for their
//! work through [`Envelope::start_span`](super::Envelope::start_span), bound
//! capability calls with the envelope's [`CallContext`](super::CallContext),
//! and log one event on success or failure.

use async_trait::async_trait;

use super::context::{JobContext, MessageContext, RequestContext};
use super::response::{AsyncResult, Response};
use super::ports::define_port_error;

/// Synchronous request/response use-case.
#[async_trait]
pub trait UseCase: Send + Sync {
    /// Name used for spans and log events, e.g. `UseCase.Login`.
    fn name(&self) -> &'static str;

    /// Handle one request. Middlewares may have deposited locals on `ctx`.
    async fn serve(&self, ctx: &mut RequestContext) -> Response;
}

/// Asynchronous message consumer.
#[async_trait]
pub trait Consumer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Handle one message; `success = false` requests redelivery.
    async fn consume(&self, ctx: MessageContext) -> AsyncResult;
}

define_port_error! {
    /// Failure reported by a [`JobHandler`].
    pub enum JobError {
        /// Worth retrying with backoff.
        Retryable { message: String } => "{message}",
        /// Retrying cannot help; archive immediately.
        Permanent { message: String } => "{message}",
    }
}

impl From<super::Error> for JobError {
    fn from(err: super::Error) -> Self {
        use super::ErrorCode;
        match err.code() {
            ErrorCode::InvalidRequest
            | ErrorCode::ValidationFailed
            | ErrorCode::NotFound
            | ErrorCode::Forbidden
            | ErrorCode::Unauthorized => Self::permanent(err.message()),
            _ => Self::retryable(err.message()),
        }
    }
}

/// Handler for one job type on the delayed queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, ctx: JobContext) -> Result<(), JobError>;
}
