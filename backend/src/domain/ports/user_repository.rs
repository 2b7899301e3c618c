//! Port for looking up user accounts.
use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    /// Errors surfaced by user repositories.
    pub enum UserRepositoryError {
        Query { message: String } => "user repository query failed: {message}",
        Connection { message: String } => "user repository unavailable: {message}",
    }
}

impl From<UserRepositoryError> for crate::domain::Error {
    fn from(err: UserRepositoryError) -> Self {
        match err {
            UserRepositoryError::Connection { .. } => Self::service_unavailable(err.to_string()),
            UserRepositoryError::Query { .. } => Self::internal(err.to_string()),
        }
    }
}

/// A stored account.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub username: String,
    pub email: String,
    pub role: String,
    pub password_hash: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn find_by_username(&self, username: &str)
    -> Result<Option<UserRecord>, UserRepositoryError>;
}

/// In-memory repository seeded with a fixed set of accounts.
#[derive(Debug, Default, Clone)]
pub struct FixtureUserRepository {
    users: Vec<UserRecord>,
}

impl FixtureUserRepository {
    #[must_use]
    pub fn new(users: Vec<UserRecord>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl UserRepository for FixtureUserRepository {
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, UserRepositoryError> {
        Ok(self
            .users
            .iter()
            .find(|user| user.username == username)
            .cloned())
    }
}
