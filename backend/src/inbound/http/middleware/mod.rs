//! Standard request gates.
//!
//! A middleware inspects the [`RequestContext`], may deposit locals for the
//! ones after it and for the use-case, and answers with a
//! [`MiddlewareOutcome`]. Any rejection ends the pipeline; middlewares only
//! ever reject with a `4xx`.

mod auth;
mod guards;
mod hmac;
mod rate_limit;

use async_trait::async_trait;

use crate::domain::{MiddlewareOutcome, RequestContext};

pub use auth::{ApiKeyAuth, BearerAuth, DEFAULT_API_KEY_HEADER, RequireRole, TokenAuth};
pub use guards::{ContentTypeValidator, IpWhitelist};
pub use hmac::{HmacAuth, SIGNATURE_HEADER, TIMESTAMP_HEADER, sign};
pub use rate_limit::RateLimit;

/// Local holding the bearer token accepted by [`BearerAuth`].
pub const LOCAL_TOKEN: &str = "token";
/// Local holding the key accepted by [`ApiKeyAuth`].
pub const LOCAL_API_KEY: &str = "api_key";
pub const LOCAL_USER_ID: &str = "user_id";
pub const LOCAL_USERNAME: &str = "username";
pub const LOCAL_EMAIL: &str = "email";
pub const LOCAL_ROLE: &str = "role";
/// Local holding every claim of the verified token as JSON.
pub const LOCAL_CLAIMS: &str = "claims";

/// One gate in front of a use-case.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name used in log events, e.g. `Middleware.RequireRole`.
    fn name(&self) -> &'static str;

    async fn handle(&self, ctx: &mut RequestContext) -> MiddlewareOutcome;
}
