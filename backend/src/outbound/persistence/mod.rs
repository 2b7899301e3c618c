//! PostgreSQL persistence: pool, [`Database`] driver, migrations and the
//! SQL-backed repositories.

mod migrations;
mod pool;
mod postgres;
mod sql_user_repository;

use std::sync::Arc;

pub use migrations::{
    DEFAULT_DIR, DEFAULT_TABLE, Migration, MigrationDir, MigrationError, MigrationStatus, Migrator,
};
pub use pool::{PoolConfig, PoolError, connect};
pub use postgres::PostgresDatabase;
pub use sql_user_repository::SqlUserRepository;

use crate::config::{DatabaseConfig, DatabaseDriver, DriverKind};
use crate::domain::ports::Database;
use crate::outbound::InitError;
use crate::outbound::registry::announce;

/// Construct the configured database and prove it answers.
///
/// # Errors
/// [`InitError::Config`] when the user or database name is missing and
/// [`InitError::Connect`] when the server is unreachable.
pub async fn registry_database(config: &DatabaseConfig) -> Result<Arc<dyn Database>, InitError> {
    let driver = DatabaseDriver::select(&config.driver);
    let pool_config = match PoolConfig::from_config(config) {
        Ok(pool_config) => pool_config,
        Err(err) => {
            return announce(
                "Registry.Database",
                driver,
                &format!("{}:{}", config.host, config.port),
                Err(err.into()),
            );
        }
    };
    let result = match driver {
        DatabaseDriver::Postgres => connect(&pool_config)
            .await
            .map(|pool| Arc::new(PostgresDatabase::new(pool)) as Arc<dyn Database>)
            .map_err(|err| InitError::connect("database", driver, err)),
    };
    let result = match result {
        Ok(db) => db
            .ping()
            .await
            .map(|()| db)
            .map_err(|err| InitError::connect("database", driver, err)),
        Err(err) => Err(err),
    };
    announce(
        "Registry.Database",
        driver,
        &format!("{} max_connections={}", pool_config.describe(), pool_config.max_size()),
        result,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[tokio::test]
    async fn missing_credentials_are_fatal() {
        let err = registry_database(&Config::default().database)
            .await
            .err()
            .expect("DB_USERNAME unset");
        assert!(matches!(err, InitError::Config(_)));
    }
}
