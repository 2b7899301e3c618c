//! One route's middleware chain in front of its use-case.

use std::sync::Arc;

use tracing::error;

use super::middleware::Middleware;
use crate::domain::{MiddlewareOutcome, RequestContext, Response, UseCase};

/// Registered `(method, pattern, use-case, middlewares…)` tuple.
///
/// Middlewares run in registration order. The first rejection becomes the
/// response; later middlewares and the use-case are skipped.
pub struct Pipeline {
    method: String,
    pattern: String,
    usecase: Arc<dyn UseCase>,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .field("usecase", &self.usecase.name())
            .field(
                "middlewares",
                &self.middlewares.iter().map(|mw| mw.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Pipeline {
    pub fn new(
        method: impl Into<String>,
        pattern: impl Into<String>,
        usecase: Arc<dyn UseCase>,
        middlewares: Vec<Arc<dyn Middleware>>,
    ) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            pattern: pattern.into(),
            usecase,
            middlewares,
        }
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Run the chain and the use-case for one request.
    pub async fn run(&self, ctx: &mut RequestContext) -> Response {
        for middleware in &self.middlewares {
            if let MiddlewareOutcome::Reject(response) = middleware.handle(ctx).await {
                let request = ctx.request();
                error!(
                    operation = middleware.name(),
                    code = response.http_status(),
                    method = %request.method,
                    path = %request.path,
                    errors = ?response.errors,
                    "request rejected"
                );
                return response;
            }
        }
        self.usecase.serve(ctx).await
    }
}
