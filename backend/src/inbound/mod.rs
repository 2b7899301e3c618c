//! Inbound adapters: each turns an external event into a domain context and
//! calls the matching contract.
//!
//! - [`http`]: actix-web server, router, trace propagation and middlewares
//!   in front of [`UseCase`](crate::domain::UseCase)s.
//! - [`queue`]: weighted worker pool dispatching
//!   [`JobHandler`](crate::domain::JobHandler)s.
//! - [`pubsub`]: subscription router dispatching
//!   [`Consumer`](crate::domain::Consumer)s.
//!
//! All three register their in-flight work with [`InFlight`] so shutdown
//! can wait for it to drain.

pub mod http;
pub mod pubsub;
pub mod queue;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
struct Counter {
    active: AtomicUsize,
    idle: Notify,
}

/// Counts units of work currently executing.
///
/// # Examples
/// ```
/// use skeleton::inbound::InFlight;
///
/// let in_flight = InFlight::default();
/// let guard = in_flight.enter();
/// assert_eq!(in_flight.active(), 1);
/// drop(guard);
/// assert_eq!(in_flight.active(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    counter: Arc<Counter>,
}

impl InFlight {
    /// Register one unit of work until the guard drops.
    #[must_use]
    pub fn enter(&self) -> InFlightGuard {
        self.counter.active.fetch_add(1, Ordering::AcqRel);
        InFlightGuard {
            counter: Arc::clone(&self.counter),
        }
    }

    #[must_use]
    pub fn active(&self) -> usize {
        self.counter.active.load(Ordering::Acquire)
    }

    /// Wait until nothing is in flight or `deadline` passes. Returns whether
    /// the work drained.
    pub async fn wait_idle(&self, deadline: Instant) -> bool {
        loop {
            let notified = self.counter.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.active() == 0 {
                return true;
            }
            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep_until(deadline) => return self.active() == 0,
            }
        }
    }
}

/// Marks one unit of work; dropping it ends the work.
#[derive(Debug)]
pub struct InFlightGuard {
    counter: Arc<Counter>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.counter.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.counter.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn idle_immediately_without_work() {
        let in_flight = InFlight::default();
        assert!(in_flight.wait_idle(Instant::now()).await);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_guards_to_drop() {
        let in_flight = InFlight::default();
        let guard = in_flight.enter();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            drop(guard);
        });
        assert!(
            in_flight
                .wait_idle(Instant::now() + Duration::from_secs(5))
                .await
        );
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_at_the_deadline() {
        let in_flight = InFlight::default();
        let _guard = in_flight.enter();
        assert!(
            !in_flight
                .wait_idle(Instant::now() + Duration::from_secs(1))
                .await
        );
        assert_eq!(in_flight.active(), 1);
    }
}
