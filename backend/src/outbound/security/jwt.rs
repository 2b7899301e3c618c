//! HS256 token issuer on `jsonwebtoken`.
//!
//! Time checks run against the injected clock rather than the library's
//! system clock so expiry and the refresh window are testable.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use mockable::Clock;
use tracing::debug;

use crate::domain::ports::{Claims, TokenError, TokenIssuer};

fn seconds(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

/// Signs and verifies tokens with a shared secret.
pub struct JwtIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    expiry: Duration,
    refresh_window: Duration,
    clock: Arc<dyn Clock>,
}

impl JwtIssuer {
    pub fn new(
        secret: &str,
        issuer: impl Into<String>,
        expiry: Duration,
        refresh_window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let issuer = issuer.into();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims = HashSet::new();
        validation.set_issuer(&[issuer.as_str()]);
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            issuer,
            expiry,
            refresh_window,
            clock,
        }
    }

    /// Signature and issuer only; time claims are checked by the caller.
    fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| TokenError::invalid(err.to_string()))
    }

    fn now(&self) -> i64 {
        self.clock.utc().timestamp()
    }
}

impl TokenIssuer for JwtIssuer {
    fn generate(&self, claims: &Claims) -> Result<String, TokenError> {
        let now = self.now();
        let signed = Claims {
            iss: Some(self.issuer.clone()),
            iat: Some(now),
            nbf: Some(now),
            exp: Some(now.saturating_add(seconds(self.expiry))),
            ..claims.clone()
        };
        debug!(sub = %signed.sub, exp = signed.exp, "token issued");
        encode(&Header::new(Algorithm::HS256), &signed, &self.encoding)
            .map_err(|err| TokenError::signing(err.to_string()))
    }

    fn parse(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self.verify(token)?;
        let now = self.now();
        if claims.nbf.is_some_and(|nbf| nbf > now) {
            return Err(TokenError::invalid("token is not valid yet"));
        }
        match claims.exp {
            None => Err(TokenError::invalid("missing exp claim")),
            Some(exp) if exp <= now => Err(TokenError::Expired),
            Some(_) => Ok(claims),
        }
    }

    fn refresh(&self, token: &str) -> Result<String, TokenError> {
        let claims = self.verify(token)?;
        let exp = claims
            .exp
            .ok_or_else(|| TokenError::invalid("missing exp claim"))?;
        if self.now() > exp.saturating_add(seconds(self.refresh_window)) {
            return Err(TokenError::RefreshWindowElapsed);
        }
        self.generate(&claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MutableClock;
    use chrono::Utc;
    use rstest::{fixture, rstest};

    const HOUR: Duration = Duration::from_secs(3_600);

    struct Harness {
        issuer: JwtIssuer,
        clock: Arc<MutableClock>,
    }

    #[fixture]
    fn harness() -> Harness {
        let clock = Arc::new(MutableClock::new(Utc::now()));
        let issuer = JwtIssuer::new("secret", "skeleton", HOUR, 24 * HOUR, clock.clone());
        Harness { issuer, clock }
    }

    fn ada() -> Claims {
        Claims::for_user("1", "ada", "ada@example.com", "admin")
    }

    #[rstest]
    fn issued_tokens_parse_back(harness: Harness) {
        let token = harness.issuer.generate(&ada()).expect("sign");
        let claims = harness.issuer.parse(&token).expect("parse");
        assert!(ada().is_subset_of(&claims));
        assert_eq!(claims.iss.as_deref(), Some("skeleton"));
        assert_eq!(
            claims.exp.zip(claims.iat).map(|(exp, iat)| exp - iat),
            Some(3_600)
        );
        assert_eq!(harness.issuer.validate(&token), Ok(()));
    }

    #[rstest]
    fn tokens_expire_on_the_injected_clock(harness: Harness) {
        let token = harness.issuer.generate(&ada()).expect("sign");
        harness.clock.advance(HOUR);
        assert_eq!(harness.issuer.parse(&token), Err(TokenError::Expired));
    }

    #[rstest]
    fn expired_tokens_refresh_within_the_window(harness: Harness) {
        let token = harness.issuer.generate(&ada()).expect("sign");
        harness.clock.advance(2 * HOUR);
        let fresh = harness.issuer.refresh(&token).expect("refresh");
        assert!(harness.issuer.parse(&fresh).is_ok());

        harness.clock.advance(30 * HOUR);
        assert_eq!(
            harness.issuer.refresh(&fresh),
            Err(TokenError::RefreshWindowElapsed)
        );
    }

    #[rstest]
    fn foreign_signatures_are_invalid(harness: Harness) {
        let other = JwtIssuer::new("other", "skeleton", HOUR, HOUR, harness.clock.clone());
        let token = other.generate(&ada()).expect("sign");
        assert!(matches!(
            harness.issuer.parse(&token),
            Err(TokenError::Invalid { .. })
        ));
        assert!(matches!(
            harness.issuer.refresh("not.a.token"),
            Err(TokenError::Invalid { .. })
        ));
    }

    #[rstest]
    fn foreign_issuers_are_invalid(harness: Harness) {
        let other = JwtIssuer::new("secret", "elsewhere", HOUR, HOUR, harness.clock.clone());
        let token = other.generate(&ada()).expect("sign");
        assert!(matches!(
            harness.issuer.parse(&token),
            Err(TokenError::Invalid { .. })
        ));
    }
}
