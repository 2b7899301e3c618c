//! Routes, job handlers and subscriptions of the demonstration service.

use std::sync::Arc;
use std::time::Duration;

use actix_web::http::Method;
use tracing::warn;

use crate::domain::ports::SubscriptionSpec;
use crate::domain::usecases::{
    AuditConsumer, EMAIL_SEND_JOB, Login, ProcessWebhook, Profile, ReceiveWebhook, SendEmail,
    WEBHOOK_PROCESS_JOB,
};
use crate::inbound::http::Router;
use crate::inbound::http::middleware::{
    ContentTypeValidator, HmacAuth, Middleware, RateLimit, TokenAuth,
};
use crate::inbound::pubsub::{DEFAULT_MAX_CONCURRENT, PubSubRouter};
use crate::inbound::queue::{JobRegistry, WorkerPool};
use crate::outbound::persistence::SqlUserRepository;

use super::{Capabilities, InitError, Runtime, ShutdownSupervisor};

/// Topic carrying [`AuditEvent`](crate::domain::usecases::AuditEvent)s.
pub const AUDIT_TOPIC: &str = "audit";
/// Subscription the `pubsub` command consumes.
pub const AUDIT_SUBSCRIPTION: &str = "audit-consumer";

const LOGIN_ATTEMPTS: u64 = 10;
const LOGIN_WINDOW: Duration = Duration::from_secs(60);

/// HTTP routes:
///
/// - `POST /login`: JSON only, rate limited per client.
/// - `GET /profile`: bearer token required.
/// - `POST /hook`: HMAC signed; mounted only when a webhook secret is set.
///
/// # Errors
/// [`InitError::Setup`] when the login use-case cannot prepare its
/// placeholder digest.
pub fn http_router(caps: &Capabilities, runtime: &Runtime) -> Result<Router, InitError> {
    let users = Arc::new(SqlUserRepository::new(Arc::clone(&caps.database)));
    let login = Login::new(users, Arc::clone(&caps.hasher), Arc::clone(&caps.tokens))
        .map_err(|err| InitError::setup("UseCase.Login", err))?;

    let mut router = Router::default();
    router
        .route(
            Method::POST,
            "/login",
            Arc::new(login),
            vec![
                Arc::new(ContentTypeValidator::json()) as Arc<dyn Middleware>,
                Arc::new(RateLimit::new(
                    Arc::clone(&caps.rate_limit),
                    LOGIN_ATTEMPTS,
                    LOGIN_WINDOW,
                )),
            ],
        )
        .route(
            Method::GET,
            "/profile",
            Arc::new(Profile),
            vec![Arc::new(TokenAuth::new(Arc::clone(&caps.tokens))) as Arc<dyn Middleware>],
        );

    match runtime.config.app.webhook_secret.as_deref() {
        Some(secret) => {
            router.route(
                Method::POST,
                "/hook",
                Arc::new(ReceiveWebhook::new(Arc::clone(&caps.queue.producer))),
                vec![
                    Arc::new(HmacAuth::new(secret)) as Arc<dyn Middleware>,
                    Arc::new(ContentTypeValidator::json()),
                ],
            );
        }
        None => warn!(
            operation = "Bootstrap.Routes",
            route = "/hook",
            "WEBHOOK_SECRET is not set; webhook route disabled"
        ),
    }
    Ok(router)
}

/// Handlers for every job type the service enqueues.
#[must_use]
pub fn job_registry(caps: &Capabilities) -> JobRegistry {
    let mut registry = JobRegistry::default();
    registry
        .register(EMAIL_SEND_JOB, Arc::new(SendEmail))
        .register(
            WEBHOOK_PROCESS_JOB,
            Arc::new(ProcessWebhook::new(Arc::clone(&caps.cache))),
        );
    registry
}

/// Worker pool over the configured queue, tied to the supervisor.
#[must_use]
pub fn worker_pool(
    caps: &Capabilities,
    runtime: &Runtime,
    supervisor: &ShutdownSupervisor,
) -> WorkerPool {
    WorkerPool::new(
        Arc::clone(&caps.queue.consumer),
        job_registry(caps),
        &runtime.config.queue,
        Arc::clone(&runtime.config),
    )
    .with_tracer(runtime.tracer.clone())
    .with_in_flight(supervisor.in_flight())
    .with_abort(supervisor.abort_token())
}

/// Subscriptions consumed by the `pubsub` command.
#[must_use]
pub fn pubsub_router(
    caps: &Capabilities,
    runtime: &Runtime,
    supervisor: &ShutdownSupervisor,
) -> PubSubRouter {
    let mut router = PubSubRouter::new(Arc::clone(&caps.pubsub), Arc::clone(&runtime.config))
        .with_tracer(runtime.tracer.clone())
        .with_in_flight(supervisor.in_flight())
        .with_abort(supervisor.abort_token());
    router.subscribe(
        SubscriptionSpec::new(AUDIT_SUBSCRIPTION, AUDIT_TOPIC),
        Arc::new(AuditConsumer::new(Arc::clone(&caps.cache))),
        DEFAULT_MAX_CONCURRENT,
    );
    router
}

#[cfg(test)]
mod tests {
    use mockable::DefaultClock;

    use super::*;
    use crate::config::Config;
    use crate::domain::ports::{MockDatabase, MockHttpClient, MockSymmetricCrypto};
    use crate::outbound::cache::registry_cache;
    use crate::outbound::pubsub::registry_pubsub;
    use crate::outbound::queue::registry_queue;
    use crate::outbound::rate_limit::MemoryRateLimitStore;
    use crate::outbound::security::{registry_hasher, registry_token_issuer};
    use crate::outbound::storage::registry_storage;
    use crate::telemetry::LogFormat;

    async fn capabilities(config: &Config) -> Capabilities {
        let clock: Arc<dyn mockable::Clock> = Arc::new(DefaultClock);
        Capabilities {
            clock: Arc::clone(&clock),
            cache: registry_cache(&config.cache).await.expect("cache"),
            storage: registry_storage(&config.storage).await.expect("storage"),
            queue: registry_queue(&config.queue, Arc::clone(&clock))
                .await
                .expect("queue"),
            database: Arc::new(MockDatabase::new()),
            hasher: registry_hasher(&config.hasher).expect("hasher"),
            tokens: registry_token_issuer(&config.token, clock).expect("tokens"),
            crypto: Arc::new(MockSymmetricCrypto::new()),
            http_client: Arc::new(MockHttpClient::new()),
            pubsub: registry_pubsub(&config.pubsub).await.expect("pubsub"),
            rate_limit: Arc::new(MemoryRateLimitStore::default()),
        }
    }

    fn config(webhook_secret: Option<&str>) -> (Config, tempfile::TempDir) {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default();
        config.storage.local_base_path = temp.path().join("objects");
        config.token.secret = Some("secret".to_owned());
        config.app.webhook_secret = webhook_secret.map(str::to_owned);
        (config, temp)
    }

    #[tokio::test]
    async fn webhook_route_needs_a_secret() {
        let (without, _dir) = config(None);
        let caps = capabilities(&without).await;
        let router = http_router(&caps, &Runtime::new(without, LogFormat::Json)).expect("router");
        assert_eq!(router.len(), 2);

        let (with, _dir) = config(Some("k"));
        let caps = capabilities(&with).await;
        let router = http_router(&caps, &Runtime::new(with, LogFormat::Json)).expect("router");
        assert_eq!(router.len(), 3);
    }

    #[tokio::test]
    async fn every_enqueued_job_type_has_a_handler() {
        let (config, _dir) = config(None);
        let caps = capabilities(&config).await;
        let registry = job_registry(&caps);
        assert!(registry.get(EMAIL_SEND_JOB).is_some());
        assert!(registry.get(WEBHOOK_PROCESS_JOB).is_some());
        assert_eq!(registry.len(), 2);
    }
}
