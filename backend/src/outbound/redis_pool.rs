//! Connection pooling shared by the Redis-backed drivers.

use std::time::Duration;

use bb8_redis::RedisConnectionManager;
use bb8_redis::bb8::{Pool, PooledConnection};
use bb8_redis::redis;

use crate::config::RedisEndpoint;

pub(crate) type RedisPool = Pool<RedisConnectionManager>;
pub(crate) type RedisConnection<'a> = PooledConnection<'a, RedisConnectionManager>;

const POOL_SIZE: u32 = 16;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Build a pool and prove the server answers.
pub(crate) async fn connect(endpoint: &RedisEndpoint) -> Result<RedisPool, String> {
    let manager = RedisConnectionManager::new(endpoint.url()).map_err(|err| err.to_string())?;
    let pool = Pool::builder()
        .max_size(POOL_SIZE)
        .connection_timeout(CONNECT_TIMEOUT)
        .build(manager)
        .await
        .map_err(|err| err.to_string())?;
    ping(&pool).await?;
    Ok(pool)
}

pub(crate) async fn checkout(pool: &RedisPool) -> Result<RedisConnection<'_>, String> {
    pool.get().await.map_err(|err| err.to_string())
}

pub(crate) async fn ping(pool: &RedisPool) -> Result<(), String> {
    let mut conn = checkout(pool).await?;
    let _: String = redis::cmd("PING")
        .query_async(&mut *conn)
        .await
        .map_err(|err| err.to_string())?;
    Ok(())
}

/// `host:port/db` for log lines; never includes the password.
pub(crate) fn describe(endpoint: &RedisEndpoint) -> String {
    format!("{}:{}/{}", endpoint.host, endpoint.port, endpoint.db)
}
