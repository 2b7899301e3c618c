//! Request shape and origin guards.

use std::collections::HashSet;
use std::net::IpAddr;

use async_trait::async_trait;

use super::Middleware;
use crate::domain::{MiddlewareOutcome, RequestContext};

/// Accept only bodies of the listed media types.
///
/// Parameters such as `charset` are ignored and the comparison is
/// case-insensitive. `GET`, `HEAD` and `DELETE` requests without a body pass.
#[derive(Debug, Clone)]
pub struct ContentTypeValidator {
    allowed: HashSet<String>,
}

impl ContentTypeValidator {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|media| media.as_ref().trim().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Shortcut for `application/json`.
    #[must_use]
    pub fn json() -> Self {
        Self::new(["application/json"])
    }
}

fn media_type(header: &str) -> String {
    header
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

#[async_trait]
impl Middleware for ContentTypeValidator {
    fn name(&self) -> &'static str {
        "Middleware.ContentTypeValidator"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> MiddlewareOutcome {
        let request = ctx.request();
        let bodyless = matches!(request.method.as_str(), "GET" | "HEAD" | "DELETE");
        if bodyless && request.body.is_empty() {
            return MiddlewareOutcome::Proceed;
        }
        match request.header("content-type").map(media_type) {
            None => MiddlewareOutcome::reject(415, "Missing content type"),
            Some(media) if media.is_empty() => {
                MiddlewareOutcome::reject(415, "Missing content type")
            }
            Some(media) if self.allowed.contains(&media) => MiddlewareOutcome::Proceed,
            Some(_) => MiddlewareOutcome::reject(415, "Unsupported content type"),
        }
    }
}

/// Accept only requests from listed peer addresses. IPv4-mapped IPv6
/// entries and peers compare as their IPv4 form.
#[derive(Debug, Clone)]
pub struct IpWhitelist {
    allowed: HashSet<IpAddr>,
}

impl IpWhitelist {
    pub fn new(allowed: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            allowed: allowed.into_iter().map(|ip| ip.to_canonical()).collect(),
        }
    }
}

#[async_trait]
impl Middleware for IpWhitelist {
    fn name(&self) -> &'static str {
        "Middleware.IPWhitelist"
    }

    async fn handle(&self, ctx: &mut RequestContext) -> MiddlewareOutcome {
        match ctx.request().peer_ip {
            Some(ip) if self.allowed.contains(&ip.to_canonical()) => MiddlewareOutcome::Proceed,
            _ => MiddlewareOutcome::reject(403, "Forbidden"),
        }
    }
}
