//! Shared helpers for the integration tests.
//!
//! Each test binary pulls in only part of this module.
#![allow(dead_code)]

use std::io;
use std::sync::Arc;
use std::time::Duration;

use actix_web::web;
use async_trait::async_trait;
use mockable::DefaultClock;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::subscriber::DefaultGuard;

use skeleton::config::Config;
use skeleton::domain::ports::{Claims, TokenIssuer};
use skeleton::domain::{RequestContext, Response, UseCase};
use skeleton::inbound::http::state::HttpState;
use skeleton::outbound::security::JwtIssuer;
use skeleton::telemetry::Tracer;

pub const JWT_SECRET: &str = "integration-secret";

pub fn issuer() -> Arc<dyn TokenIssuer> {
    Arc::new(JwtIssuer::new(
        JWT_SECRET,
        "skeleton",
        Duration::from_secs(3600),
        Duration::from_secs(600),
        Arc::new(DefaultClock),
    ))
}

pub fn token_for(issuer: &dyn TokenIssuer, role: &str) -> String {
    issuer
        .generate(&Claims::for_user("u-1", "ada", "ada@example.com", role))
        .expect("token issued")
}

pub fn http_state() -> web::Data<HttpState> {
    web::Data::new(HttpState::new(
        Arc::new(Config::default()),
        Tracer::default(),
        CancellationToken::new(),
    ))
}

/// `GET /things`: a fixed list.
pub struct ListThings;

#[async_trait]
impl UseCase for ListThings {
    fn name(&self) -> &'static str {
        "UseCase.ListThings"
    }

    async fn serve(&self, _ctx: &mut RequestContext) -> Response {
        Response::ok(json!([{ "id": 1 }]))
    }
}

/// Answers `200` with the request body it received.
pub struct Echo;

#[async_trait]
impl UseCase for Echo {
    fn name(&self) -> &'static str {
        "UseCase.Echo"
    }

    async fn serve(&self, ctx: &mut RequestContext) -> Response {
        match ctx.json::<Value>() {
            Ok(body) => Response::ok(body),
            Err(err) => Response::from(err),
        }
    }
}

/// Collects JSON log lines written while the guard is alive on this thread.
#[derive(Clone, Default)]
pub struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl LogCapture {
    pub fn install(&self) -> DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
