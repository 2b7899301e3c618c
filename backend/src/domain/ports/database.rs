//! Port for parameterised SQL execution.
//!
//! Statements use the driver's native placeholders (`$1`, `$2`, ...). Rows
//! come back as JSON objects keyed by column name so callers can decode them
//! into their own types with [`DatabaseExt`].
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use super::define_port_error;

define_port_error! {
    /// Errors surfaced by database adapters.
    pub enum DatabaseError {
        /// `query_row` found nothing.
        NoRow => "no rows in result set",
        Query { message: String } => "query failed: {message}",
        Decode { message: String } => "failed to decode row: {message}",
        Connection { message: String } => "database unavailable: {message}",
        Transaction { message: String } => "transaction failed: {message}",
    }
}

impl From<DatabaseError> for crate::domain::Error {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NoRow => Self::not_found(err.to_string()),
            DatabaseError::Connection { .. } => Self::service_unavailable(err.to_string()),
            _ => Self::internal(err.to_string()),
        }
    }
}

/// A bound statement argument.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
}

macro_rules! sql_value_from {
    ($($ty:ty => $variant:ident $(via $conv:path)?),* $(,)?) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(value: $ty) -> Self {
                    Self::$variant($( $conv )?(value))
                }
            }
        )*
    };
}

sql_value_from! {
    bool => Bool,
    i64 => Int,
    i32 => Int via i64::from,
    f64 => Float,
    String => Text,
    Vec<u8> => Bytes,
    Value => Json,
    DateTime<Utc> => Timestamp,
    Uuid => Uuid,
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// One result row, keyed by column name.
pub type Row = Map<String, Value>;

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Populated when the statement has a `RETURNING` clause whose first
    /// column is an integer.
    pub last_insert_id: Option<i64>,
}

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    #[must_use]
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Database: Send + Sync {
    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>, DatabaseError>;

    /// First row of the result; [`DatabaseError::NoRow`] when empty.
    async fn query_row(&self, sql: &str, args: &[SqlValue]) -> Result<Row, DatabaseError>;

    async fn exec(&self, sql: &str, args: &[SqlValue]) -> Result<ExecResult, DatabaseError>;

    /// Run several statements without parameters, e.g. a migration file.
    async fn execute_script(&self, sql: &str) -> Result<(), DatabaseError>;

    /// Open a transaction. Nested transactions are not supported.
    async fn begin(&self, isolation: IsolationLevel)
    -> Result<Box<dyn Transaction>, DatabaseError>;

    async fn ping(&self) -> Result<(), DatabaseError>;

    async fn close(&self) -> Result<(), DatabaseError>;
}

/// An open transaction. Dropping it without committing rolls back.
#[async_trait]
pub trait Transaction: Send {
    async fn query(&mut self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>, DatabaseError>;

    async fn query_row(&mut self, sql: &str, args: &[SqlValue]) -> Result<Row, DatabaseError>;

    async fn exec(&mut self, sql: &str, args: &[SqlValue]) -> Result<ExecResult, DatabaseError>;

    async fn execute_script(&mut self, sql: &str) -> Result<(), DatabaseError>;

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError>;
}

/// Decode a row into a caller type.
///
/// # Errors
/// [`DatabaseError::Decode`] when the row shape does not match `T`.
pub fn decode_row<T: DeserializeOwned>(row: Row) -> Result<T, DatabaseError> {
    serde_json::from_value(Value::Object(row)).map_err(|err| DatabaseError::decode(err.to_string()))
}

/// Typed query helpers over any [`Database`].
#[async_trait]
pub trait DatabaseExt: Database {
    async fn select<T: DeserializeOwned>(
        &self,
        sql: &str,
        args: &[SqlValue],
    ) -> Result<Vec<T>, DatabaseError> {
        self.query(sql, args)
            .await?
            .into_iter()
            .map(decode_row)
            .collect()
    }

    async fn get<T: DeserializeOwned>(&self, sql: &str, args: &[SqlValue]) -> Result<T, DatabaseError> {
        decode_row(self.query_row(sql, args).await?)
    }
}

impl<D: Database + ?Sized> DatabaseExt for D {}

/// Run `work` inside a transaction: commit on `Ok`, roll back on `Err`.
///
/// # Errors
/// The error returned by `work`, or a [`DatabaseError`] converted into `E`
/// when the transaction cannot be opened or committed.
pub async fn run_in_transaction<R, E, F>(
    db: &dyn Database,
    isolation: IsolationLevel,
    work: F,
) -> Result<R, E>
where
    F: for<'t> FnOnce(&'t mut dyn Transaction) -> BoxFuture<'t, Result<R, E>> + Send,
    E: From<DatabaseError> + std::fmt::Display,
{
    let mut tx = db.begin(isolation).await?;
    match work(tx.as_mut()).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, cause = %err, "transaction rollback failed");
            }
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        id: i64,
        name: String,
    }

    #[derive(Default)]
    struct Ledger {
        statements: Vec<String>,
        committed: bool,
        rolled_back: bool,
    }

    struct RecordingTransaction {
        ledger: Arc<Mutex<Ledger>>,
    }

    #[async_trait]
    impl Transaction for RecordingTransaction {
        async fn query(&mut self, sql: &str, _: &[SqlValue]) -> Result<Vec<Row>, DatabaseError> {
            self.ledger.lock().statements.push(sql.to_owned());
            Ok(Vec::new())
        }

        async fn query_row(&mut self, _: &str, _: &[SqlValue]) -> Result<Row, DatabaseError> {
            Err(DatabaseError::no_row())
        }

        async fn exec(&mut self, sql: &str, _: &[SqlValue]) -> Result<ExecResult, DatabaseError> {
            self.ledger.lock().statements.push(sql.to_owned());
            Ok(ExecResult {
                rows_affected: 1,
                last_insert_id: None,
            })
        }

        async fn execute_script(&mut self, sql: &str) -> Result<(), DatabaseError> {
            self.ledger.lock().statements.push(sql.to_owned());
            Ok(())
        }

        async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
            self.ledger.lock().committed = true;
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> Result<(), DatabaseError> {
            self.ledger.lock().rolled_back = true;
            Ok(())
        }
    }

    fn database_with_ledger() -> (MockDatabase, Arc<Mutex<Ledger>>) {
        let ledger = Arc::new(Mutex::new(Ledger::default()));
        let shared = Arc::clone(&ledger);
        let mut db = MockDatabase::new();
        db.expect_begin().returning(move |_| {
            Ok(Box::new(RecordingTransaction {
                ledger: Arc::clone(&shared),
            }) as Box<dyn Transaction>)
        });
        (db, ledger)
    }

    #[tokio::test]
    async fn commits_when_work_succeeds() {
        let (db, ledger) = database_with_ledger();
        let result: Result<u64, DatabaseError> =
            run_in_transaction(&db, IsolationLevel::Serializable, |tx| {
                Box::pin(async move {
                    let done = tx.exec("UPDATE accounts SET balance = 0", &[]).await?;
                    Ok(done.rows_affected)
                })
            })
            .await;

        assert_eq!(result, Ok(1));
        let ledger = ledger.lock();
        assert!(ledger.committed);
        assert!(!ledger.rolled_back);
        assert_eq!(ledger.statements, vec!["UPDATE accounts SET balance = 0"]);
    }

    #[tokio::test]
    async fn rolls_back_when_work_fails() {
        let (db, ledger) = database_with_ledger();
        let result: Result<(), DatabaseError> =
            run_in_transaction(&db, IsolationLevel::default(), |tx| {
                Box::pin(async move {
                    tx.query_row("SELECT 1 WHERE false", &[]).await?;
                    Ok(())
                })
            })
            .await;

        assert_eq!(result, Err(DatabaseError::NoRow));
        let ledger = ledger.lock();
        assert!(!ledger.committed);
        assert!(ledger.rolled_back);
    }

    #[tokio::test]
    async fn select_decodes_rows() {
        let mut db = MockDatabase::new();
        db.expect_query().returning(|_, _| {
            let row = json!({ "id": 1, "name": "ada" });
            match row {
                Value::Object(map) => Ok(vec![map]),
                _ => Ok(Vec::new()),
            }
        });
        let users: Vec<User> = db
            .select("SELECT id, name FROM users", &[])
            .await
            .expect("select");
        assert_eq!(
            users,
            vec![User {
                id: 1,
                name: "ada".to_owned()
            }]
        );
    }

    #[test]
    fn optional_values_become_null() {
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("x")), SqlValue::Text("x".to_owned()));
    }
}
