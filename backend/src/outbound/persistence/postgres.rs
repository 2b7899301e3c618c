//! PostgreSQL implementation of the [`Database`] port on `sqlx`.
//!
//! Row-returning statements are wrapped in a CTE and projected through
//! `to_jsonb`, so every column arrives as JSON keyed by its name without a
//! per-type decoding table.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::{Executor, PgPool, Postgres, Row as _};
use tracing::debug;

use crate::domain::ports::{
    Database, DatabaseError, ExecResult, IsolationLevel, Row, SqlValue, Transaction,
};

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

fn map_err(err: sqlx::Error) -> DatabaseError {
    match err {
        sqlx::Error::RowNotFound => DatabaseError::no_row(),
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => DatabaseError::connection(err.to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            DatabaseError::decode(err.to_string())
        }
        other => DatabaseError::query(other.to_string()),
    }
}

/// Untyped `NULL` is sent as text; cast the placeholder (`$1::int`) when the
/// column type cannot be inferred.
fn bind<'q>(mut query: PgQuery<'q>, args: &[SqlValue]) -> PgQuery<'q> {
    for arg in args {
        query = match arg.clone() {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Bool(value) => query.bind(value),
            SqlValue::Int(value) => query.bind(value),
            SqlValue::Float(value) => query.bind(value),
            SqlValue::Text(value) => query.bind(value),
            SqlValue::Bytes(value) => query.bind(value),
            SqlValue::Json(value) => query.bind(sqlx::types::Json(value)),
            SqlValue::Timestamp(value) => query.bind(value),
            SqlValue::Uuid(value) => query.bind(value),
        };
    }
    query
}

fn wrap_rows(sql: &str) -> String {
    let statement = sql.trim().trim_end_matches(';');
    format!("WITH q AS ({statement}) SELECT to_jsonb(q) AS row FROM q")
}

fn returns_rows(sql: &str) -> bool {
    sql.split_whitespace()
        .any(|word| word.eq_ignore_ascii_case("returning"))
}

fn decode(row: &PgRow) -> Result<Row, DatabaseError> {
    match row.try_get::<Value, _>("row").map_err(map_err)? {
        Value::Object(columns) => Ok(columns),
        other => Err(DatabaseError::decode(format!("expected a JSON object, got {other}"))),
    }
}

fn first_integer(row: &PgRow) -> Option<i64> {
    row.try_get::<i64, _>(0)
        .ok()
        .or_else(|| row.try_get::<i32, _>(0).ok().map(i64::from))
}

async fn fetch_rows<'c, E>(executor: E, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>, DatabaseError>
where
    E: Executor<'c, Database = Postgres>,
{
    let wrapped = wrap_rows(sql);
    let rows = bind(sqlx::query(&wrapped), args)
        .fetch_all(executor)
        .await
        .map_err(map_err)?;
    rows.iter().map(decode).collect()
}

async fn fetch_first<'c, E>(executor: E, sql: &str, args: &[SqlValue]) -> Result<Row, DatabaseError>
where
    E: Executor<'c, Database = Postgres>,
{
    fetch_rows(executor, sql, args)
        .await?
        .into_iter()
        .next()
        .ok_or(DatabaseError::NoRow)
}

async fn execute<'c, E>(executor: E, sql: &str, args: &[SqlValue]) -> Result<ExecResult, DatabaseError>
where
    E: Executor<'c, Database = Postgres>,
{
    if returns_rows(sql) {
        let rows = bind(sqlx::query(sql), args)
            .fetch_all(executor)
            .await
            .map_err(map_err)?;
        return Ok(ExecResult {
            rows_affected: u64::try_from(rows.len()).unwrap_or(u64::MAX),
            last_insert_id: rows.first().and_then(first_integer),
        });
    }
    let done = bind(sqlx::query(sql), args)
        .execute(executor)
        .await
        .map_err(map_err)?;
    Ok(ExecResult {
        rows_affected: done.rows_affected(),
        last_insert_id: None,
    })
}

async fn execute_batch(pool: &PgPool, sql: &str) -> Result<(), DatabaseError> {
    sqlx::raw_sql(sql)
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(map_err)
}

async fn execute_batch_on(conn: &mut PgConnection, sql: &str) -> Result<(), DatabaseError> {
    sqlx::Executor::execute(conn, sqlx::raw_sql(sql))
        .await
        .map(|_| ())
        .map_err(map_err)
}

/// Pooled PostgreSQL database.
#[derive(Clone)]
pub struct PostgresDatabase {
    pool: PgPool,
}

impl PostgresDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    async fn query(&self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>, DatabaseError> {
        fetch_rows(&self.pool, sql, args).await
    }

    async fn query_row(&self, sql: &str, args: &[SqlValue]) -> Result<Row, DatabaseError> {
        fetch_first(&self.pool, sql, args).await
    }

    async fn exec(&self, sql: &str, args: &[SqlValue]) -> Result<ExecResult, DatabaseError> {
        execute(&self.pool, sql, args).await
    }

    async fn execute_script(&self, sql: &str) -> Result<(), DatabaseError> {
        execute_batch(&self.pool, sql).await
    }

    async fn begin(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn Transaction>, DatabaseError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| DatabaseError::transaction(err.to_string()))?;
        let statement = format!("SET TRANSACTION ISOLATION LEVEL {}", isolation.as_sql());
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(|err| DatabaseError::transaction(err.to_string()))?;
        debug!(isolation = isolation.as_sql(), "transaction opened");
        Ok(Box::new(PostgresTransaction { tx }))
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|err| DatabaseError::connection(err.to_string()))
    }

    async fn close(&self) -> Result<(), DatabaseError> {
        self.pool.close().await;
        Ok(())
    }
}

struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn query(&mut self, sql: &str, args: &[SqlValue]) -> Result<Vec<Row>, DatabaseError> {
        fetch_rows(&mut *self.tx, sql, args).await
    }

    async fn query_row(&mut self, sql: &str, args: &[SqlValue]) -> Result<Row, DatabaseError> {
        fetch_first(&mut *self.tx, sql, args).await
    }

    async fn exec(&mut self, sql: &str, args: &[SqlValue]) -> Result<ExecResult, DatabaseError> {
        execute(&mut *self.tx, sql, args).await
    }

    async fn execute_script(&mut self, sql: &str) -> Result<(), DatabaseError> {
        execute_batch_on(&mut self.tx, sql).await
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        self.tx
            .commit()
            .await
            .map_err(|err| DatabaseError::transaction(err.to_string()))
    }

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError> {
        self.tx
            .rollback()
            .await
            .map_err(|err| DatabaseError::transaction(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn row_statements_are_projected_as_json() {
        assert_eq!(
            wrap_rows("SELECT id FROM users WHERE id = $1;"),
            "WITH q AS (SELECT id FROM users WHERE id = $1) SELECT to_jsonb(q) AS row FROM q"
        );
    }

    #[rstest]
    #[case("INSERT INTO users (name) VALUES ($1) RETURNING id", true)]
    #[case("insert into users (name) values ($1)\nreturning id", true)]
    #[case("UPDATE users SET returning_customer = true", false)]
    #[case("DELETE FROM users", false)]
    fn returning_clause_detection(#[case] sql: &str, #[case] expected: bool) {
        assert_eq!(returns_rows(sql), expected);
    }

    #[test]
    fn sqlx_errors_keep_their_category() {
        assert_eq!(map_err(sqlx::Error::RowNotFound), DatabaseError::NoRow);
        assert!(matches!(
            map_err(sqlx::Error::PoolTimedOut),
            DatabaseError::Connection { .. }
        ));
        assert!(matches!(
            map_err(sqlx::Error::Protocol("bad message".to_owned())),
            DatabaseError::Query { .. }
        ));
    }
}
