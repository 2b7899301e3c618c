//! Port for signed, expiring access tokens.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::define_port_error;

define_port_error! {
    /// Errors surfaced by token adapters.
    pub enum TokenError {
        Expired => "token has expired",
        Invalid { message: String } => "invalid token: {message}",
        /// Expired for longer than the refresh window allows.
        RefreshWindowElapsed => "token is too old to refresh",
        Signing { message: String } => "failed to sign token: {message}",
    }
}

/// Token claims.
///
/// Registered claims are filled in by the issuer; application claims
/// identify the principal. Unknown claims are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    #[serde(default)]
    pub sub: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    pub fn for_user(
        user_id: impl Into<String>,
        username: impl Into<String>,
        email: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            sub: user_id.into(),
            username: username.into(),
            email: email.into(),
            role: role.into(),
            ..Self::default()
        }
    }

    /// Application claims of `self` are all present, unchanged, in `other`.
    #[must_use]
    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.sub == other.sub
            && self.username == other.username
            && self.email == other.email
            && self.role == other.role
            && self
                .extra
                .iter()
                .all(|(key, value)| other.extra.get(key) == Some(value))
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait TokenIssuer: Send + Sync {
    /// Sign `claims`, stamping issuer, issued-at, not-before and expiry.
    fn generate(&self, claims: &Claims) -> Result<String, TokenError>;

    fn parse(&self, token: &str) -> Result<Claims, TokenError>;

    /// Re-issue a token that is valid or expired within the refresh window.
    fn refresh(&self, token: &str) -> Result<String, TokenError>;

    fn validate(&self, token: &str) -> Result<(), TokenError> {
        self.parse(token).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subset_ignores_registered_claims() {
        let issued = Claims::for_user("1", "ada", "ada@example.com", "admin");
        let parsed = Claims {
            iss: Some("skeleton".to_owned()),
            exp: Some(1),
            ..issued.clone()
        };
        assert!(issued.is_subset_of(&parsed));
    }

    #[test]
    fn extra_claims_are_flattened() {
        let mut claims = Claims::for_user("1", "ada", "ada@example.com", "admin");
        claims.extra.insert("tenant".to_owned(), json!("acme"));
        let value = serde_json::to_value(&claims).expect("serialise");
        assert_eq!(value["tenant"], json!("acme"));
        assert!(value.get("exp").is_none());
    }
}
