//! Echo the authenticated principal.

use async_trait::async_trait;
use serde_json::json;
use tracing::Instrument;

use crate::domain::{Envelope, Error, RequestContext, Response, UseCase};

use super::conclude;

/// `GET /profile`; requires the token middleware to have run.
#[derive(Debug, Default, Clone, Copy)]
pub struct Profile;

impl Profile {
    fn principal(ctx: &RequestContext) -> Result<Response, Error> {
        let user_id = ctx
            .local_str("user_id")
            .ok_or_else(|| Error::unauthorized("Missing token"))?;
        Ok(Response::ok(json!({
            "id": user_id,
            "username": ctx.local_str("username"),
            "email": ctx.local_str("email"),
            "role": ctx.local_str("role"),
        })))
    }
}

#[async_trait]
impl UseCase for Profile {
    fn name(&self) -> &'static str {
        "UseCase.Profile"
    }

    async fn serve(&self, ctx: &mut RequestContext) -> Response {
        let span = ctx.start_span(self.name());
        let result = async { Self::principal(ctx) }
            .instrument(span.log_span())
            .await;
        conclude(span, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::Config;
    use crate::domain::InboundRequest;

    fn context() -> RequestContext {
        RequestContext::new(
            InboundRequest::new("GET", "/profile"),
            Arc::new(Config::default()),
        )
    }

    #[tokio::test]
    async fn reads_principal_locals() {
        let mut ctx = context();
        ctx.set_local("user_id", "u-1");
        ctx.set_local("username", "ada");
        ctx.set_local("role", "admin");

        let response = Profile.serve(&mut ctx).await;

        assert_eq!(response.code, 200);
        let data = response.data.expect("data");
        assert_eq!(data["id"], json!("u-1"));
        assert_eq!(data["email"], json!(null));
    }

    #[tokio::test]
    async fn missing_principal_is_unauthorised() {
        let response = Profile.serve(&mut context()).await;
        assert_eq!(response.code, 401);
    }
}
