//! Process-wide shutdown coordination.
//!
//! The supervisor owns two tokens. `shutdown` is cancelled when a signal
//! arrives (or [`ShutdownSupervisor::trigger`] is called) and tells every
//! ingress to stop accepting work. `abort` is cancelled only after the drain
//! deadline and interrupts whatever is still running. Capabilities register a
//! closer as they are constructed; [`ShutdownSupervisor::close_all`] runs them
//! newest first.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::inbound::InFlight;

type CloseFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), String>> + Send>;

struct Closer {
    name: String,
    close: CloseFn,
}

/// Coordinates signal handling, draining and capability teardown.
pub struct ShutdownSupervisor {
    shutdown: CancellationToken,
    abort: CancellationToken,
    in_flight: InFlight,
    drain_timeout: Duration,
    closers: Mutex<Vec<Closer>>,
}

impl fmt::Debug for ShutdownSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .closers
            .lock()
            .iter()
            .map(|closer| closer.name.clone())
            .collect();
        f.debug_struct("ShutdownSupervisor")
            .field("shutting_down", &self.shutdown.is_cancelled())
            .field("drain_timeout", &self.drain_timeout)
            .field("in_flight", &self.in_flight.active())
            .field("closers", &names)
            .finish()
    }
}

impl ShutdownSupervisor {
    #[must_use]
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            shutdown: CancellationToken::new(),
            abort: CancellationToken::new(),
            in_flight: InFlight::default(),
            drain_timeout,
            closers: Mutex::new(Vec::new()),
        }
    }

    /// Cancelled when shutdown begins.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancelled once draining has finished or timed out.
    #[must_use]
    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    #[must_use]
    pub fn in_flight(&self) -> InFlight {
        self.in_flight.clone()
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        self.drain_timeout
    }

    /// Begin shutdown without a signal.
    pub fn trigger(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Register a teardown step. Steps run in reverse registration order.
    pub fn register_closer<F, Fut, E>(&self, name: impl Into<String>, close: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: fmt::Display,
    {
        let close: CloseFn = Box::new(move || {
            Box::pin(async move { close().await.map_err(|err| err.to_string()) })
        });
        self.closers.lock().push(Closer {
            name: name.into(),
            close,
        });
    }

    /// Cancel the shutdown token on SIGINT or SIGTERM.
    ///
    /// The task ends quietly if shutdown is triggered some other way first.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {}
                signal = wait_for_signal() => {
                    info!(operation = "Shutdown.Signal", signal, "shutdown requested");
                    shutdown.cancel();
                }
            }
        })
    }

    /// Wait for in-flight work until `deadline`, then cancel the abort
    /// token. Returns whether everything finished in time.
    pub async fn drain(&self, deadline: Instant) -> bool {
        let drained = self.in_flight.wait_idle(deadline).await;
        if drained {
            info!(operation = "Shutdown.Drain", "in-flight work drained");
        } else {
            warn!(
                operation = "Shutdown.Drain",
                remaining = self.in_flight.active(),
                "drain deadline passed; interrupting remaining work"
            );
        }
        self.abort.cancel();
        drained
    }

    /// Deadline for [`drain`](Self::drain) measured from now.
    #[must_use]
    pub fn drain_deadline(&self) -> Instant {
        Instant::now() + self.drain_timeout
    }

    /// Run every registered closer once, newest first.
    ///
    /// Failures are logged and do not stop the remaining closers. Later calls
    /// find nothing left to close. Returns the names of closers that failed.
    pub async fn close_all(&self) -> Vec<String> {
        let closers = std::mem::take(&mut *self.closers.lock());
        let mut failed = Vec::new();
        for Closer { name, close } in closers.into_iter().rev() {
            match close().await {
                Ok(()) => info!(operation = "Shutdown.Close", capability = %name, "closed"),
                Err(err) => {
                    error!(
                        operation = "Shutdown.Close",
                        capability = %name,
                        error = %err,
                        "close failed"
                    );
                    failed.push(name);
                }
            }
        }
        failed
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "SIGTERM handler unavailable; listening for SIGINT only");
            return ctrl_c().await;
        }
    };
    tokio::select! {
        name = ctrl_c() => name,
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "SIGINT",
        Err(err) => {
            error!(error = %err, "SIGINT handler unavailable");
            std::future::pending().await
        }
    }
}
