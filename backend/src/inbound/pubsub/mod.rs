//! Pub/sub ingress: one receiver per subscription dispatching to
//! [`Consumer`]s, acking on success and nacking on failure.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, error, info, warn};

use crate::config::Config;
use crate::domain::ports::{Delivery, PubSubError, PubSubTransport, SubscriptionSpec};
use crate::domain::{Consumer, MessageContext};
use crate::inbound::InFlight;
use crate::telemetry::{TRACEPARENT_HEADER, TRACESTATE_HEADER, TraceContext, Tracer};

/// Concurrent handlers per subscription when none is given.
pub const DEFAULT_MAX_CONCURRENT: usize = 10;

struct Route {
    spec: SubscriptionSpec,
    consumer: Arc<dyn Consumer>,
    max_concurrent: usize,
}

#[derive(Clone)]
struct Dispatch {
    config: Arc<Config>,
    tracer: Tracer,
    in_flight: InFlight,
    abort: CancellationToken,
}

/// Subscriptions and the consumers that handle them.
pub struct PubSubRouter {
    transport: Arc<dyn PubSubTransport>,
    routes: Vec<Arc<Route>>,
    dispatch: Dispatch,
}

impl PubSubRouter {
    pub fn new(transport: Arc<dyn PubSubTransport>, config: Arc<Config>) -> Self {
        Self {
            transport,
            routes: Vec::new(),
            dispatch: Dispatch {
                config,
                tracer: Tracer::default(),
                in_flight: InFlight::default(),
                abort: CancellationToken::new(),
            },
        }
    }

    /// Deliver `spec` to `consumer`, at most `max_concurrent` at a time.
    pub fn subscribe(
        &mut self,
        spec: SubscriptionSpec,
        consumer: Arc<dyn Consumer>,
        max_concurrent: usize,
    ) -> &mut Self {
        self.routes.push(Arc::new(Route {
            spec,
            consumer,
            max_concurrent: max_concurrent.max(1),
        }));
        self
    }

    #[must_use]
    pub fn with_tracer(mut self, tracer: Tracer) -> Self {
        self.dispatch.tracer = tracer;
        self
    }

    #[must_use]
    pub fn with_in_flight(mut self, in_flight: InFlight) -> Self {
        self.dispatch.in_flight = in_flight;
        self
    }

    /// Token cancelling running consumers, fired once the drain deadline
    /// passes.
    #[must_use]
    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.dispatch.abort = abort;
        self
    }

    /// Receive on every subscription until `shutdown` is cancelled.
    ///
    /// Returns once every receiver has stopped and its in-flight handlers
    /// have settled.
    ///
    /// # Errors
    /// The first transport error; the other receivers are stopped first.
    pub async fn start(self, shutdown: CancellationToken) -> Result<(), PubSubError> {
        let stop = shutdown.child_token();
        let mut receivers = JoinSet::new();
        for route in &self.routes {
            let transport = Arc::clone(&self.transport);
            let route = Arc::clone(route);
            let dispatch = self.dispatch.clone();
            let stop = stop.clone();
            receivers.spawn(async move { receive(transport, route, dispatch, stop).await });
        }
        info!(
            operation = "PubSub.Start",
            subscriptions = self.routes.len(),
            "pub/sub ingress started"
        );

        let mut first_error = None;
        while let Some(joined) = receivers.join_next().await {
            let result = joined.unwrap_or_else(|err| Err(PubSubError::backend(err.to_string())));
            if let Err(err) = result {
                stop.cancel();
                first_error.get_or_insert(err);
            }
        }
        info!(operation = "PubSub.Stop", "pub/sub ingress stopped");
        first_error.map_or(Ok(()), Err)
    }
}

async fn receive(
    transport: Arc<dyn PubSubTransport>,
    route: Arc<Route>,
    dispatch: Dispatch,
    stop: CancellationToken,
) -> Result<(), PubSubError> {
    let subscription_id = route.spec.id.clone();
    let mut subscription = transport
        .subscribe(&route.spec, route.max_concurrent)
        .await
        .inspect_err(|err| {
            error!(
                operation = "PubSub.Subscribe",
                subscription = %subscription_id,
                error = %err,
                "subscribe failed"
            );
        })?;
    let permits = Arc::new(Semaphore::new(route.max_concurrent));
    let handlers = TaskTracker::new();

    let result = loop {
        let permit = tokio::select! {
            () = stop.cancelled() => break Ok(()),
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break Ok(()),
            },
        };
        let received = tokio::select! {
            () = stop.cancelled() => break Ok(()),
            received = subscription.receive() => received,
        };
        match received {
            Ok(Some(delivery)) => {
                let route = Arc::clone(&route);
                let dispatch = dispatch.clone();
                handlers.spawn(async move {
                    let _permit = permit;
                    handle(&route, &dispatch, delivery).await;
                });
            }
            Ok(None) => break Ok(()),
            Err(err) => {
                error!(
                    operation = "PubSub.Receive",
                    subscription = %subscription_id,
                    error = %err,
                    "receive failed"
                );
                break Err(err);
            }
        }
    };

    handlers.close();
    handlers.wait().await;
    result
}

async fn handle(route: &Route, dispatch: &Dispatch, delivery: Delivery) {
    let _in_flight = dispatch.in_flight.enter();
    let (message, acker) = delivery.into_parts();
    let mut span = dispatch.tracer.continue_remote(
        format!("pubsub.{}", route.spec.id),
        message.attributes.get(TRACEPARENT_HEADER).map(String::as_str),
        message.attributes.get(TRACESTATE_HEADER).map(String::as_str),
    );
    let trace = span.context().clone();
    let log_span = span.log_span();
    let message_id = message.id.clone();
    let ctx = MessageContext::new(message.id, message.data, Arc::clone(&dispatch.config))
        .with_attributes(message.attributes)
        .with_published_at(message.published_at)
        .with_delivery_attempt(message.delivery_attempt)
        .with_trace(trace.clone())
        .with_tracer(dispatch.tracer.clone())
        .with_cancellation(dispatch.abort.child_token());

    let result = TraceContext::scope(trace, route.consumer.consume(ctx))
        .instrument(log_span.clone())
        .await;

    async {
        let settled = if result.success {
            info!(
                operation = route.consumer.name(),
                subscription = %route.spec.id,
                message_id = %message_id,
                "message consumed"
            );
            acker.ack().await
        } else {
            let reason = result.error.as_deref().unwrap_or("consumer reported failure");
            span.record_error(reason);
            warn!(
                operation = route.consumer.name(),
                subscription = %route.spec.id,
                message_id = %message_id,
                error = %reason,
                "message failed; nacking"
            );
            acker.nack().await
        };
        if let Err(err) = settled {
            error!(
                operation = "PubSub.Settle",
                subscription = %route.spec.id,
                message_id = %message_id,
                error = %err,
                "failed to settle message"
            );
        }
    }
    .instrument(log_span)
    .await;
    span.end();
}
