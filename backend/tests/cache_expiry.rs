//! TTL semantics of the default cache driver, under paused time.

use std::time::Duration;

use skeleton::config::Config;
use skeleton::domain::ports::{Cache, CacheError};
use skeleton::outbound::cache::registry_cache;

#[tokio::test(start_paused = true)]
async fn entries_expire_after_their_ttl() {
    let cache = registry_cache(&Config::default().cache)
        .await
        .expect("memory cache");
    cache
        .set("session:1", b"ada", Duration::from_secs(2))
        .await
        .expect("set");

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(cache.get("session:1").await.expect("still live"), b"ada");

    tokio::time::advance(Duration::from_secs(9)).await;
    assert!(matches!(
        cache.get("session:1").await,
        Err(CacheError::NotFound { .. })
    ));
    assert!(!cache.exists("session:1").await.expect("exists"));
    cache.close().await.expect("close");
}

#[tokio::test(start_paused = true)]
async fn zero_ttl_never_expires() {
    let cache = registry_cache(&Config::default().cache)
        .await
        .expect("memory cache");
    cache.set("config", b"v", Duration::ZERO).await.expect("set");

    tokio::time::advance(Duration::from_secs(86_400)).await;

    assert_eq!(cache.get("config").await.expect("persistent"), b"v");
}
