//! Listener lifecycle for the HTTP ingress.
//!
//! The server never installs its own signal handlers; it stops when the
//! shutdown token is cancelled. Stopping is graceful: the listener closes,
//! probes report draining and in-flight requests get `shutdown_timeout` to
//! finish before their cancellation tokens fire.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::health::{HealthState, live, ready};
use super::router::Router;
use super::state::HttpState;
use super::trace::Trace;

/// Bind a listener on `0.0.0.0:port`. Port `0` picks a free port.
///
/// # Errors
/// Propagates the bind failure.
pub fn bind(port: u16) -> std::io::Result<TcpListener> {
    TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port)))
}

/// The HTTP ingress: routes plus shared state.
#[derive(Debug)]
pub struct HttpIngress {
    router: Arc<Router>,
    state: HttpState,
    health: web::Data<HealthState>,
}

impl HttpIngress {
    #[must_use]
    pub fn new(router: Router, state: HttpState) -> Self {
        Self {
            router: Arc::new(router),
            state,
            health: web::Data::new(HealthState::new()),
        }
    }

    /// Probe state, flipped to ready once listening and to draining on stop.
    #[must_use]
    pub fn health(&self) -> web::Data<HealthState> {
        self.health.clone()
    }

    /// Serve on `listener` until `shutdown` is cancelled and in-flight
    /// requests have drained.
    ///
    /// # Errors
    /// Propagates listener and server failures.
    pub async fn run(self, listener: TcpListener, shutdown: CancellationToken) -> std::io::Result<()> {
        let Self {
            router,
            state,
            health,
        } = self;
        let address = listener.local_addr()?;
        let drain = state.config.app.shutdown_timeout;
        let abort = state.abort.clone();
        let tracer = state.tracer.clone();
        let data = web::Data::new(state);
        let probes = health.clone();

        let server = HttpServer::new(move || {
            let routes = Arc::clone(&router);
            App::new()
                .app_data(probes.clone())
                .app_data(data.clone())
                .wrap(Trace::new(tracer.clone()))
                .configure(move |cfg| routes.configure(cfg))
                .service(ready)
                .service(live)
        })
        .disable_signals()
        .shutdown_timeout(drain.as_secs())
        .listen(listener)?
        .run();

        health.mark_ready();
        info!(operation = "Http.Listen", %address, "http ingress listening");

        let handle = server.handle();
        let watcher = tokio::spawn(async move {
            shutdown.cancelled().await;
            health.mark_draining();
            info!(
                operation = "Http.Shutdown",
                drain_secs = drain.as_secs(),
                "http ingress draining"
            );
            handle.stop(true).await;
        });

        let result = server.await;
        watcher.abort();
        // Whatever outlived the drain window is told to stop now.
        abort.cancel();
        info!(operation = "Http.Stopped", "http ingress stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::config::Config;
    use crate::domain::{RequestContext, Response, UseCase};
    use crate::telemetry::Tracer;
    use actix_web::http::Method;

    struct Slow;

    #[async_trait]
    impl UseCase for Slow {
        fn name(&self) -> &'static str {
            "UseCase.Slow"
        }

        async fn serve(&self, _ctx: &mut RequestContext) -> Response {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Response::ok(json!("done"))
        }
    }

    #[actix_web::test]
    async fn in_flight_requests_finish_after_shutdown() {
        let mut router = Router::default();
        router.route(Method::GET, "/slow", Arc::new(Slow), Vec::new());
        let abort = CancellationToken::new();
        let state = HttpState::new(Arc::new(Config::default()), Tracer::default(), abort.clone());
        let in_flight = state.in_flight.clone();
        let ingress = HttpIngress::new(router, state);
        let health = ingress.health();
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let address = listener.local_addr().expect("address");
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(ingress.run(listener, shutdown.clone()));

        let client = reqwest::Client::new();
        let url = format!("http://{address}/slow");
        let requests: Vec<_> = (0..5)
            .map(|_| tokio::spawn(client.get(&url).send()))
            .collect();
        while in_flight.active() < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.cancel();

        for request in requests {
            let response = request.await.expect("join").expect("response");
            assert_eq!(response.status().as_u16(), 200);
        }
        server.await.expect("join").expect("server");
        assert!(abort.is_cancelled());
        assert!(!health.is_ready());
        assert_eq!(in_flight.active(), 0);
    }
}
