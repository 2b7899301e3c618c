//! Credential gates: static bearer tokens, API keys, signed tokens and roles.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use subtle::ConstantTimeEq;

use super::{
    LOCAL_API_KEY, LOCAL_CLAIMS, LOCAL_EMAIL, LOCAL_ROLE, LOCAL_TOKEN, LOCAL_USER_ID,
    LOCAL_USERNAME, Middleware,
};
use crate::domain::ports::{TokenError, TokenIssuer};
use crate::domain::{InboundRequest, MiddlewareOutcome, RequestContext};

/// Header read by [`ApiKeyAuth`] unless configured otherwise.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

const MISSING_HEADER: &str = "Missing authorization header";
const INVALID_HEADER: &str = "Invalid authorization header";
const EMPTY_TOKEN: &str = "Empty token";
const INVALID_TOKEN: &str = "Invalid token";
const EXPIRED_TOKEN: &str = "Expired token";

/// Extract the credential of an `Authorization: Bearer <token>` header.
fn bearer_token(request: &InboundRequest) -> Result<&str, &'static str> {
    let header = request.header("authorization").ok_or(MISSING_HEADER)?;
    let (scheme, token) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(INVALID_HEADER);
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(EMPTY_TOKEN);
    }
    Ok(token)
}

/// Whether `candidate` equals one of `allowed`, without an early exit on the
/// first matching byte or entry.
fn contains_constant_time(allowed: &[String], candidate: &str) -> bool {
    allowed.iter().fold(false, |found, entry| {
        found | bool::from(entry.as_bytes().ct_eq(candidate.as_bytes()))
    })
}

fn unauthorized(message: &str) -> MiddlewareOutcome {
    MiddlewareOutcome::reject(401, message)
}

/// Accept a fixed set of bearer tokens.
#[derive(Debug, Clone)]
pub struct BearerAuth {
    tokens: Vec<String>,
}

impl BearerAuth {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Middleware for BearerAuth {
    fn name(&self) -> &'static str {
        "Middleware.BearerAuth"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> MiddlewareOutcome {
        let token = match bearer_token(ctx.request()) {
            Ok(token) => token.to_owned(),
            Err(message) => return unauthorized(message),
        };
        if !contains_constant_time(&self.tokens, &token) {
            return unauthorized(INVALID_TOKEN);
        }
        ctx.set_local(LOCAL_TOKEN, token);
        MiddlewareOutcome::Proceed
    }
}

/// Accept a fixed set of API keys carried in a header.
#[derive(Debug, Clone)]
pub struct ApiKeyAuth {
    header: String,
    keys: Vec<String>,
}

impl ApiKeyAuth {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_header(DEFAULT_API_KEY_HEADER, keys)
    }

    pub fn with_header<I, S>(header: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            header: header.into(),
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Middleware for ApiKeyAuth {
    fn name(&self) -> &'static str {
        "Middleware.APIKeyAuth"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> MiddlewareOutcome {
        let Some(key) = ctx
            .request()
            .header(&self.header)
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_owned)
        else {
            return unauthorized("Missing API key");
        };
        if !contains_constant_time(&self.keys, &key) {
            return unauthorized("Invalid API key");
        }
        ctx.set_local(LOCAL_API_KEY, key);
        MiddlewareOutcome::Proceed
    }
}

/// Verify a signed access token and expose its principal.
///
/// Deposits `user_id`, `username`, `email`, `role` and `claims`.
pub struct TokenAuth {
    issuer: Arc<dyn TokenIssuer>,
}

impl TokenAuth {
    pub fn new(issuer: Arc<dyn TokenIssuer>) -> Self {
        Self { issuer }
    }
}

#[async_trait]
impl Middleware for TokenAuth {
    fn name(&self) -> &'static str {
        "Middleware.TokenAuth"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> MiddlewareOutcome {
        let claims = match bearer_token(ctx.request()) {
            Ok(token) => match self.issuer.parse(token) {
                Ok(claims) => claims,
                Err(TokenError::Expired) => return unauthorized(EXPIRED_TOKEN),
                Err(_) => return unauthorized(INVALID_TOKEN),
            },
            Err(message) => return unauthorized(message),
        };
        let all = serde_json::to_value(&claims).unwrap_or(Value::Null);
        ctx.set_local(LOCAL_USER_ID, claims.sub);
        ctx.set_local(LOCAL_USERNAME, claims.username);
        ctx.set_local(LOCAL_EMAIL, claims.email);
        ctx.set_local(LOCAL_ROLE, claims.role);
        ctx.set_local(LOCAL_CLAIMS, all);
        MiddlewareOutcome::Proceed
    }
}

/// Require the principal's role to be one of a set. Runs after
/// [`TokenAuth`].
#[derive(Debug, Clone)]
pub struct RequireRole {
    roles: HashSet<String>,
}

impl RequireRole {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Middleware for RequireRole {
    fn name(&self) -> &'static str {
        "Middleware.RequireRole"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> MiddlewareOutcome {
        match ctx.local_str(LOCAL_ROLE).filter(|role| !role.is_empty()) {
            None => MiddlewareOutcome::reject(403, "Role not found"),
            Some(role) if self.roles.contains(role) => MiddlewareOutcome::Proceed,
            Some(_) => MiddlewareOutcome::reject(403, "Insufficient permissions"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::ports::{Claims, MockTokenIssuer};
    use rstest::rstest;
    use serde_json::json;

    fn context(authorization: Option<&str>) -> RequestContext {
        let mut request = InboundRequest::new("GET", "/things");
        if let Some(value) = authorization {
            request = request.with_header("Authorization", value);
        }
        RequestContext::new(request, Arc::new(Config::default()))
    }

    fn rejection(outcome: &MiddlewareOutcome) -> Option<(u16, Value)> {
        match outcome {
            MiddlewareOutcome::Proceed => None,
            MiddlewareOutcome::Reject(response) => {
                Some((response.code, response.errors.clone().unwrap_or(Value::Null)))
            }
        }
    }

    #[rstest]
    #[case(None, MISSING_HEADER)]
    #[case(Some("Basic abc"), INVALID_HEADER)]
    #[case(Some("Bearer "), EMPTY_TOKEN)]
    #[case(Some("Bearer nope"), INVALID_TOKEN)]
    #[tokio::test]
    async fn bearer_rejections(#[case] header: Option<&str>, #[case] message: &str) {
        let mut ctx = context(header);
        let outcome = BearerAuth::new(["t1"]).handle(&mut ctx).await;
        assert_eq!(rejection(&outcome), Some((401, json!(message))));
        assert!(ctx.local(LOCAL_TOKEN).is_none());
    }

    #[tokio::test]
    async fn bearer_accepts_listed_tokens() {
        let mut ctx = context(Some("bearer t2"));
        let outcome = BearerAuth::new(["t1", "t2"]).handle(&mut ctx).await;
        assert_eq!(outcome, MiddlewareOutcome::Proceed);
        assert_eq!(ctx.local_str(LOCAL_TOKEN), Some("t2"));
    }

    #[rstest]
    #[case(None, Some((401, json!("Missing API key"))))]
    #[case(Some("wrong"), Some((401, json!("Invalid API key"))))]
    #[case(Some("k1"), None)]
    #[tokio::test]
    async fn api_keys(#[case] key: Option<&str>, #[case] expected: Option<(u16, Value)>) {
        let mut request = InboundRequest::new("GET", "/things");
        if let Some(key) = key {
            request = request.with_header("x-api-key", key);
        }
        let mut ctx = RequestContext::new(request, Arc::new(Config::default()));
        let outcome = ApiKeyAuth::new(["k1"]).handle(&mut ctx).await;
        assert_eq!(rejection(&outcome), expected);
        assert_eq!(ctx.local_str(LOCAL_API_KEY).is_some(), expected.is_none());
    }

    #[tokio::test]
    async fn token_auth_deposits_the_principal() {
        let mut issuer = MockTokenIssuer::new();
        issuer.expect_parse().returning(|token| {
            assert_eq!(token, "signed");
            Ok(Claims::for_user("u-1", "ada", "ada@example.com", "admin"))
        });
        let mut ctx = context(Some("Bearer signed"));
        let outcome = TokenAuth::new(Arc::new(issuer)).handle(&mut ctx).await;

        assert_eq!(outcome, MiddlewareOutcome::Proceed);
        assert_eq!(ctx.local_str(LOCAL_USER_ID), Some("u-1"));
        assert_eq!(ctx.local_str(LOCAL_USERNAME), Some("ada"));
        assert_eq!(ctx.local_str(LOCAL_EMAIL), Some("ada@example.com"));
        assert_eq!(ctx.local_str(LOCAL_ROLE), Some("admin"));
        assert_eq!(
            ctx.local(LOCAL_CLAIMS).and_then(|claims| claims.get("sub")),
            Some(&json!("u-1"))
        );
    }

    #[rstest]
    #[case(TokenError::Expired, EXPIRED_TOKEN)]
    #[case(TokenError::invalid("bad signature"), INVALID_TOKEN)]
    #[tokio::test]
    async fn token_auth_rejections(#[case] error: TokenError, #[case] message: &str) {
        let mut issuer = MockTokenIssuer::new();
        issuer.expect_parse().returning(move |_| Err(error.clone()));
        let mut ctx = context(Some("Bearer signed"));
        let outcome = TokenAuth::new(Arc::new(issuer)).handle(&mut ctx).await;
        assert_eq!(rejection(&outcome), Some((401, json!(message))));
        assert!(ctx.local(LOCAL_USER_ID).is_none());
    }

    #[tokio::test]
    async fn token_auth_requires_the_header() {
        let mut issuer = MockTokenIssuer::new();
        issuer.expect_parse().never();
        let mut ctx = context(None);
        let outcome = TokenAuth::new(Arc::new(issuer)).handle(&mut ctx).await;
        assert_eq!(rejection(&outcome), Some((401, json!(MISSING_HEADER))));
    }

    #[rstest]
    #[case(None, Some((403, json!("Role not found"))))]
    #[case(Some("user"), Some((403, json!("Insufficient permissions"))))]
    #[case(Some("admin"), None)]
    #[tokio::test]
    async fn roles(#[case] role: Option<&str>, #[case] expected: Option<(u16, Value)>) {
        let mut ctx = context(None);
        if let Some(role) = role {
            ctx.set_local(LOCAL_ROLE, role);
        }
        let outcome = RequireRole::new(["admin", "owner"]).handle(&mut ctx).await;
        assert_eq!(rejection(&outcome), expected);
    }
}
