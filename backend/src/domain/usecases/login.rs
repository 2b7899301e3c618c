//! Credential exchange for a signed access token.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::domain::ports::{Claims, HashError, Hasher, TokenIssuer, UserRepository};
use crate::domain::{Envelope, Error, RequestContext, Response, UseCase};

use super::conclude;

/// Answer for unknown users and wrong passwords alike.
pub const INVALID_CREDENTIALS: &str = "Invalid credentials";

const TIMING_PLACEHOLDER: &str = "placeholder-password-for-timing";

#[derive(Debug, Deserialize)]
struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    token: String,
    token_type: &'static str,
    user: Principal,
}

#[derive(Debug, Serialize)]
struct Principal {
    id: String,
    username: String,
    email: String,
    role: String,
}

/// `POST /login`.
///
/// Unknown accounts are compared against a placeholder digest so both
/// failure paths cost one hash comparison.
pub struct Login {
    users: Arc<dyn UserRepository>,
    hasher: Arc<dyn Hasher>,
    tokens: Arc<dyn TokenIssuer>,
    placeholder_digest: String,
}

impl Login {
    /// # Errors
    /// [`HashError`] when the placeholder digest cannot be computed.
    pub fn new(
        users: Arc<dyn UserRepository>,
        hasher: Arc<dyn Hasher>,
        tokens: Arc<dyn TokenIssuer>,
    ) -> Result<Self, HashError> {
        let placeholder_digest = hasher.hash(TIMING_PLACEHOLDER)?;
        Ok(Self {
            users,
            hasher,
            tokens,
            placeholder_digest,
        })
    }

    async fn verify(&self, password: String, digest: String) -> Result<bool, Error> {
        let hasher = Arc::clone(&self.hasher);
        tokio::task::spawn_blocking(move || hasher.compare(&password, &digest))
            .await
            .map_err(|err| Error::internal(format!("password comparison panicked: {err}")))
    }

    async fn authenticate(&self, ctx: &RequestContext) -> Result<Response, Error> {
        let request: LoginRequest = ctx.json()?;
        let username = request.username.trim();
        if username.is_empty() || request.password.is_empty() {
            return Err(Error::validation_failed("username and password are required"));
        }

        let call = ctx.call_context();
        let user = call.run(self.users.find_by_username(username)).await??;
        let digest = user
            .as_ref()
            .map_or_else(|| self.placeholder_digest.clone(), |user| user.password_hash.clone());
        let matches = call.run(self.verify(request.password, digest)).await??;

        let Some(user) = user.filter(|_| matches) else {
            return Err(Error::unauthorized(INVALID_CREDENTIALS));
        };

        let claims = Claims::for_user(&user.id, &user.username, &user.email, &user.role);
        let token = self
            .tokens
            .generate(&claims)
            .map_err(|err| Error::internal(err.to_string()))?;

        Ok(Response::from_data(
            200,
            &LoginResponse {
                token,
                token_type: "Bearer",
                user: Principal {
                    id: user.id,
                    username: user.username,
                    email: user.email,
                    role: user.role,
                },
            },
        ))
    }
}

#[async_trait]
impl UseCase for Login {
    fn name(&self) -> &'static str {
        "UseCase.Login"
    }

    async fn serve(&self, ctx: &mut RequestContext) -> Response {
        let span = ctx.start_span(self.name());
        let result = self.authenticate(ctx).instrument(span.log_span()).await;
        conclude(span, result)
    }
}
