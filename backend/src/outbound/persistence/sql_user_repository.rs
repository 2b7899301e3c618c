//! [`UserRepository`] over the [`Database`] port.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::ports::{
    Database, DatabaseError, DatabaseExt, UserRecord, UserRepository, UserRepositoryError,
};

const FIND_BY_USERNAME: &str = "SELECT id::text AS id, username, email, role, password_hash \
     FROM users WHERE username = $1 LIMIT 1";

fn map_database_error(error: DatabaseError) -> UserRepositoryError {
    match error {
        DatabaseError::Connection { message } => UserRepositoryError::connection(message),
        other => UserRepositoryError::query(other.to_string()),
    }
}

/// Reads accounts from the `users` table.
#[derive(Clone)]
pub struct SqlUserRepository {
    db: Arc<dyn Database>,
}

impl SqlUserRepository {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<UserRecord>, UserRepositoryError> {
        match self.db.get(FIND_BY_USERNAME, &[username.into()]).await {
            Ok(user) => Ok(Some(user)),
            Err(DatabaseError::NoRow) => Ok(None),
            Err(err) => Err(map_database_error(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{MockDatabase, SqlValue};
    use serde_json::{Value, json};

    fn repository(result: Result<Value, DatabaseError>) -> SqlUserRepository {
        let mut db = MockDatabase::new();
        db.expect_query_row()
            .withf(|sql, args| {
                sql.contains("WHERE username = $1") && args.to_vec() == vec![SqlValue::from("ada")]
            })
            .return_once(move |_, _| match result {
                Ok(Value::Object(row)) => Ok(row),
                Ok(_) => Err(DatabaseError::decode("not an object")),
                Err(err) => Err(err),
            });
        SqlUserRepository::new(Arc::new(db))
    }

    #[tokio::test]
    async fn found_rows_decode_into_records() {
        let repo = repository(Ok(json!({
            "id": "7",
            "username": "ada",
            "email": "ada@example.com",
            "role": "admin",
            "password_hash": "$argon2id$..."
        })));
        let user = repo.find_by_username("ada").await.expect("query");
        assert_eq!(user.map(|user| user.id).as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn missing_rows_are_none() {
        let repo = repository(Err(DatabaseError::NoRow));
        assert_eq!(repo.find_by_username("ada").await, Ok(None));
    }

    #[tokio::test]
    async fn outages_stay_distinguishable() {
        let repo = repository(Err(DatabaseError::connection("refused")));
        assert_eq!(
            repo.find_by_username("ada").await,
            Err(UserRepositoryError::connection("refused"))
        );
    }
}
