//! Construction of every capability the ingresses depend on.

use std::sync::Arc;

use mockable::Clock;

use crate::config::Config;
use crate::domain::ports::{
    Cache, Database, Hasher, HttpClient, ObjectStorage, PubSubTransport, RateLimitStore,
    SymmetricCrypto, TokenIssuer,
};
use crate::outbound::cache::registry_cache;
use crate::outbound::http_client::registry_http_client;
use crate::outbound::persistence::registry_database;
use crate::outbound::pubsub::registry_pubsub;
use crate::outbound::queue::{QueueHandles, registry_queue};
use crate::outbound::rate_limit::registry_rate_limit_store;
use crate::outbound::security::{registry_crypto, registry_hasher, registry_token_issuer};
use crate::outbound::storage::registry_storage;

use super::{InitError, ShutdownSupervisor};

/// The fully wired set of drivers, each behind its port.
#[derive(Clone)]
pub struct Capabilities {
    pub clock: Arc<dyn Clock>,
    pub cache: Arc<dyn Cache>,
    pub storage: Arc<dyn ObjectStorage>,
    pub queue: QueueHandles,
    pub database: Arc<dyn Database>,
    pub hasher: Arc<dyn Hasher>,
    pub tokens: Arc<dyn TokenIssuer>,
    pub crypto: Arc<dyn SymmetricCrypto>,
    pub http_client: Arc<dyn HttpClient>,
    pub pubsub: Arc<dyn PubSubTransport>,
    pub rate_limit: Arc<dyn RateLimitStore>,
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities").finish_non_exhaustive()
    }
}

impl Capabilities {
    /// Build every capability in dependency order.
    ///
    /// Each connected driver registers its closer with `supervisor` as soon as
    /// it exists, so a failure part way through still lets the caller release
    /// what was opened.
    ///
    /// # Errors
    /// The first [`InitError`] raised by a registry.
    pub async fn assemble(
        config: &Config,
        clock: Arc<dyn Clock>,
        supervisor: &ShutdownSupervisor,
    ) -> Result<Self, InitError> {
        let cache = registry_cache(&config.cache).await?;
        let closing = Arc::clone(&cache);
        supervisor.register_closer("cache", move || async move { closing.close().await });

        let storage = registry_storage(&config.storage).await?;
        let closing = Arc::clone(&storage);
        supervisor.register_closer("storage", move || async move { closing.close().await });

        let queue = registry_queue(&config.queue, Arc::clone(&clock)).await?;
        let closing = Arc::clone(&queue.producer);
        supervisor.register_closer("queue", move || async move { closing.close().await });

        let database = registry_database(&config.database).await?;
        let closing = Arc::clone(&database);
        supervisor.register_closer("database", move || async move { closing.close().await });

        let pubsub = registry_pubsub(&config.pubsub).await?;
        let closing = Arc::clone(&pubsub);
        supervisor.register_closer("pubsub", move || async move { closing.close().await });

        let hasher = registry_hasher(&config.hasher)?;
        let tokens = registry_token_issuer(&config.token, Arc::clone(&clock))?;
        let crypto = registry_crypto(&config.crypto)?;
        let http_client = registry_http_client(&config.http_client)?;
        let rate_limit =
            registry_rate_limit_store(&config.cache, Arc::clone(&cache), Arc::clone(&clock))?;

        Ok(Self {
            clock,
            cache,
            storage,
            queue,
            database,
            hasher,
            tokens,
            crypto,
            http_client,
            pubsub,
            rate_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockable::DefaultClock;

    #[tokio::test]
    async fn missing_database_credentials_are_fatal_after_earlier_closers_register() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default();
        config.storage.local_base_path = temp.path().join("objects");
        config.database.username = None;
        let supervisor = ShutdownSupervisor::new(std::time::Duration::from_secs(1));

        let err = Capabilities::assemble(&config, Arc::new(DefaultClock), &supervisor)
            .await
            .expect_err("database user is required");

        assert!(matches!(err, InitError::Config(_)), "unexpected error: {err}");
        assert!(supervisor.close_all().await.is_empty());
        assert!(format!("{supervisor:?}").contains("closers: []"));
    }
}
