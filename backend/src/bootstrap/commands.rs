//! Long-running ingress commands.
//!
//! Each command assembles the capabilities, starts one ingress, waits for
//! shutdown, drains and finally closes every capability in reverse order.

use std::sync::Arc;

use mockable::DefaultClock;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ConfigError;
use crate::domain::ports::PubSubError;
use crate::inbound::http::state::HttpState;
use crate::inbound::http::{HttpIngress, bind};
use crate::outbound::persistence::MigrationError;

use super::wiring::{http_router, pubsub_router, worker_pool};
use super::{Capabilities, InitError, Runtime, ShutdownSupervisor};

/// Failure of a command; the binary reports it and exits non-zero.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Init(#[from] InitError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    PubSub(#[from] PubSubError),
    #[error(transparent)]
    Migration(#[from] MigrationError),
    #[error("ingress task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

async fn start(runtime: &Runtime) -> Result<(ShutdownSupervisor, Capabilities), RunError> {
    let supervisor = ShutdownSupervisor::new(runtime.config.app.shutdown_timeout);
    match Capabilities::assemble(&runtime.config, Arc::new(DefaultClock), &supervisor).await {
        Ok(caps) => Ok((supervisor, caps)),
        Err(err) => {
            supervisor.close_all().await;
            Err(err.into())
        }
    }
}

async fn finish<T>(
    supervisor: &ShutdownSupervisor,
    runtime: &Runtime,
    signals: JoinHandle<()>,
    result: Result<T, RunError>,
) -> Result<T, RunError> {
    signals.abort();
    supervisor.close_all().await;
    runtime.close();
    match &result {
        Ok(_) => info!(operation = "Shutdown.Complete", "shutdown complete"),
        Err(err) => error!(operation = "Shutdown.Complete", error = %err, "stopped with error"),
    }
    result
}

/// Serve HTTP until SIGINT/SIGTERM, draining in-flight requests.
///
/// # Errors
/// Initialisation, bind or server failures.
pub async fn serve_http(runtime: &Runtime) -> Result<(), RunError> {
    let (supervisor, caps) = start(runtime).await?;
    let result = async {
        let router = http_router(&caps, runtime)?;
        let state = HttpState::new(
            Arc::clone(&runtime.config),
            runtime.tracer.clone(),
            supervisor.abort_token(),
        )
        .with_in_flight(supervisor.in_flight());
        let listener = bind(runtime.config.app.port)?;
        Ok::<_, RunError>((HttpIngress::new(router, state), listener))
    }
    .await;
    let signals = supervisor.listen_for_signals();
    let result = match result {
        Ok((ingress, listener)) => ingress
            .run(listener, supervisor.token())
            .await
            .map_err(RunError::from),
        Err(err) => Err(err),
    };
    finish(&supervisor, runtime, signals, result).await
}

/// Run the queue worker until SIGINT/SIGTERM.
///
/// # Errors
/// Initialisation failures, or a worker task that panicked.
pub async fn serve_worker(runtime: &Runtime) -> Result<(), RunError> {
    let (supervisor, caps) = start(runtime).await?;
    let pool = worker_pool(&caps, runtime, &supervisor);
    let signals = supervisor.listen_for_signals();
    let workers = tokio::spawn(pool.run(supervisor.token()));

    supervisor.token().cancelled().await;
    supervisor.drain(supervisor.drain_deadline()).await;
    let result = workers.await.map_err(RunError::from);
    finish(&supervisor, runtime, signals, result).await
}

/// Consume subscriptions until SIGINT/SIGTERM or a transport failure.
///
/// # Errors
/// Initialisation failures or the first receive error.
pub async fn serve_pubsub(runtime: &Runtime) -> Result<(), RunError> {
    let (supervisor, caps) = start(runtime).await?;
    let router = pubsub_router(&caps, runtime, &supervisor);
    let signals = supervisor.listen_for_signals();
    let token = supervisor.token();
    let mut receivers = tokio::spawn(router.start(token.clone()));

    let joined = tokio::select! {
        joined = &mut receivers => joined,
        () = token.cancelled() => {
            supervisor.drain(supervisor.drain_deadline()).await;
            receivers.await
        }
    };
    let result = match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            supervisor.trigger();
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    };
    finish(&supervisor, runtime, signals, result).await
}
