//! Shared-secret request signatures.
//!
//! The signature is the hex encoded HMAC-SHA256 of
//! `METHOD ∥ path ∥ X-Timestamp ∥ body` under the shared secret.

use async_trait::async_trait;
use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::Middleware;
use crate::domain::{InboundRequest, MiddlewareOutcome, RequestContext};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Signature";
pub const TIMESTAMP_HEADER: &str = "X-Timestamp";

fn mac_for(
    secret: &[u8],
    method: &str,
    path: &str,
    timestamp: &str,
    body: &[u8],
) -> Result<HmacSha256, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret)?;
    mac.update(method.as_bytes());
    mac.update(path.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(body);
    Ok(mac)
}

/// Hex signature a client sends for the given request parts.
///
/// # Errors
/// Only if the MAC rejects the key length, which HMAC never does.
///
/// # Examples
/// ```
/// use skeleton::inbound::http::middleware::sign;
///
/// let signature = sign(b"k", "POST", "/hook", "1700000000", br#"{"a":1}"#).unwrap();
/// assert_eq!(signature.len(), 64);
/// ```
pub fn sign(
    secret: &[u8],
    method: &str,
    path: &str,
    timestamp: &str,
    body: &[u8],
) -> Result<String, InvalidLength> {
    let mac = mac_for(secret, method, path, timestamp, body)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Accept only requests signed with the shared secret.
pub struct HmacAuth {
    secret: Zeroizing<Vec<u8>>,
}

impl HmacAuth {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Zeroizing::new(secret.as_ref().to_vec()),
        }
    }

    fn verify(&self, request: &InboundRequest, signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature.trim()) else {
            return false;
        };
        let timestamp = request.header(TIMESTAMP_HEADER).unwrap_or_default();
        mac_for(
            &self.secret,
            &request.method,
            &request.path,
            timestamp,
            &request.body,
        )
        .is_ok_and(|mac| mac.verify_slice(&expected).is_ok())
    }
}

impl std::fmt::Debug for HmacAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacAuth").finish_non_exhaustive()
    }
}

#[async_trait]
impl Middleware for HmacAuth {
    fn name(&self) -> &'static str {
        "Middleware.HMACAuth"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> MiddlewareOutcome {
        let request = ctx.request();
        match request.header(SIGNATURE_HEADER) {
            None => MiddlewareOutcome::reject(401, "Missing signature"),
            Some(signature) if self.verify(request, signature) => MiddlewareOutcome::Proceed,
            Some(_) => MiddlewareOutcome::reject(401, "Invalid signature"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::Config;
    use rstest::rstest;

    const BODY: &[u8] = br#"{"a":1}"#;

    fn signed(signature: Option<&str>, timestamp: &str) -> RequestContext {
        let mut request = InboundRequest::new("POST", "/hook")
            .with_header(TIMESTAMP_HEADER, timestamp)
            .with_body(BODY.to_vec());
        if let Some(signature) = signature {
            request = request.with_header(SIGNATURE_HEADER, signature);
        }
        RequestContext::new(request, Arc::new(Config::default()))
    }

    #[test]
    fn signature_covers_the_concatenated_parts() {
        let joined = sign(b"k", "", "", "", b"POST/hook1700000000{\"a\":1}").expect("sign");
        let parts = sign(b"k", "POST", "/hook", "1700000000", BODY).expect("sign");
        assert_eq!(parts, joined);
    }

    #[tokio::test]
    async fn accepts_a_valid_signature() {
        let signature = sign(b"k", "POST", "/hook", "1700000000", BODY).expect("sign");
        let mut ctx = signed(Some(&signature), "1700000000");
        let outcome = HmacAuth::new("k").handle(&mut ctx).await;
        assert_eq!(outcome, MiddlewareOutcome::Proceed);
    }

    #[rstest]
    #[case(None, "1700000000", 401)]
    #[case(Some("zz-not-hex"), "1700000000", 401)]
    #[case(Some("00"), "1700000000", 401)]
    #[tokio::test]
    async fn rejects_bad_signatures(
        #[case] signature: Option<&str>,
        #[case] timestamp: &str,
        #[case] code: u16,
    ) {
        let mut ctx = signed(signature, timestamp);
        let outcome = HmacAuth::new("k").handle(&mut ctx).await;
        assert_eq!(outcome.code(), code);
    }

    #[tokio::test]
    async fn timestamp_is_part_of_the_signature() {
        let signature = sign(b"k", "POST", "/hook", "1700000000", BODY).expect("sign");
        let mut ctx = signed(Some(&signature), "1700000001");
        let outcome = HmacAuth::new("k").handle(&mut ctx).await;
        assert_eq!(outcome.code(), 401);
    }

    #[tokio::test]
    async fn other_secrets_do_not_verify() {
        let signature = sign(b"other", "POST", "/hook", "1700000000", BODY).expect("sign");
        let mut ctx = signed(Some(&signature), "1700000000");
        let outcome = HmacAuth::new("k").handle(&mut ctx).await;
        assert_eq!(outcome.code(), 401);
    }
}
