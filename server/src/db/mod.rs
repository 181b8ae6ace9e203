use std::time::Duration;

use futures_util::future::BoxFuture;
use rand::Rng;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Executor, PgConnection, PgPool};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::DbConfig;

pub mod archived_reports;
pub mod audit_logs;
pub mod bug_reports;
pub mod instance_settings;
pub mod migrations;
pub mod projects;
pub mod refresh_tokens;
pub mod retention_policies;
pub mod sessions;
pub mod tickets;
pub mod users;

/// Hard cap on rows per multi-row INSERT.
pub const MAX_BATCH_ROWS: usize = 1_000;

pub const MAX_PAGE_LIMIT: u32 = 1_000;

const READ_RETRY_ATTEMPTS: u32 = 3;
const READ_RETRY_BASE_MS: u64 = 100;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("row not found")]
    NotFound,
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),
    #[error("check constraint violated: {0}")]
    CheckViolation(String),
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),
    #[error("invalid pagination: {0}")]
    InvalidPagination(String),
    #[error("batch of {len} rows exceeds the {max} row cap")]
    BatchTooLarge { len: usize, max: usize },
    #[error("query timed out")]
    QueryTimeout,
    #[error("connection pool exhausted")]
    PoolExhausted,
    #[error("database connection failed: {0}")]
    Connection(String),
    #[error("database error: {0}")]
    Other(String),
}

impl DbError {
    /// Transient failures are safe to retry on read paths only.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::Connection(_) | DbError::PoolExhausted)
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => DbError::NotFound,
            sqlx::Error::PoolTimedOut => DbError::PoolExhausted,
            sqlx::Error::Io(io) => DbError::Connection(io.to_string()),
            sqlx::Error::Tls(tls) => DbError::Connection(tls.to_string()),
            sqlx::Error::Protocol(proto) => DbError::Connection(proto.to_string()),
            sqlx::Error::PoolClosed => DbError::Connection("pool closed".to_string()),
            sqlx::Error::Database(db) => {
                let constraint = db.constraint().unwrap_or("unknown").to_string();
                match db.code().as_deref() {
                    Some("23505") => DbError::UniqueViolation(constraint),
                    Some("23503") => DbError::ForeignKeyViolation(constraint),
                    Some("23514") => DbError::CheckViolation(constraint),
                    // statement_timeout cancels with 57014.
                    Some("57014") => DbError::QueryTimeout,
                    Some("08000") | Some("08003") | Some("08006") => {
                        DbError::Connection(db.message().to_string())
                    }
                    _ => DbError::Other(db.message().to_string()),
                }
            }
            other => DbError::Other(other.to_string()),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// Caller-supplied identifiers (sort keys, column names) must match
/// `^[A-Za-z0-9_]+$` before they are ever embedded in SQL text.
pub fn validate_identifier(name: &str) -> DbResult<()> {
    if name.is_empty()
        || !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_')
    {
        return Err(DbError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

/// Validate a caller-supplied sort key against a repository allowlist.
pub fn validate_sort_key(name: &str, allowed: &[&str]) -> DbResult<()> {
    validate_identifier(name)?;
    if allowed.contains(&name) {
        Ok(())
    } else {
        Err(DbError::InvalidIdentifier(name.to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    pub fn validated(page: i64, limit: i64) -> DbResult<Self> {
        if page < 1 {
            return Err(DbError::InvalidPagination(format!(
                "page must be >= 1, got {page}"
            )));
        }
        if !(1..=MAX_PAGE_LIMIT as i64).contains(&limit) {
            return Err(DbError::InvalidPagination(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}, got {limit}"
            )));
        }
        Ok(Self { page: page as u32, limit: limit as u32 })
    }

    pub fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.limit as i64
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { page: 1, limit: 50 }
    }
}

/// A page of rows plus the total the filters matched.
#[derive(Debug)]
pub struct Paged<T> {
    pub rows: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

pub fn ensure_batch_size(len: usize) -> DbResult<()> {
    if len > MAX_BATCH_ROWS {
        return Err(DbError::BatchTooLarge { len, max: MAX_BATCH_ROWS });
    }
    Ok(())
}

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(config: &DbConfig) -> DbResult<Self> {
        let options: PgConnectOptions = config
            .url
            .parse::<PgConnectOptions>()
            .map_err(|err| DbError::Connection(err.to_string()))?;

        let statement_timeout = config.query_timeout_ms;
        let pool = PgPoolOptions::new()
            .min_connections(config.pool_min)
            .max_connections(config.pool_max)
            .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
            .idle_timeout(Duration::from_millis(config.idle_timeout_ms))
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    conn.execute(
                        format!("SET statement_timeout = {statement_timeout}").as_str(),
                    )
                    .await?;
                    Ok(())
                })
            })
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
    /// The closure receives the transaction connection; repository free
    /// functions taking `&mut PgConnection` compose under it.
    pub async fn transaction<T, F>(&self, f: F) -> DbResult<T>
    where
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, DbResult<T>>,
    {
        let mut tx = self.pool.begin().await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "transaction rollback failed");
                }
                Err(err)
            }
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Retry policy for read paths only: up to 3 attempts, 100/200/400 ms with
/// jitter, retrying connection-layer failures. Write paths never pass
/// through here; the caller owns idempotency for those.
pub async fn with_read_retry<T, F, Fut>(op: F) -> DbResult<T>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = DbResult<T>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < READ_RETRY_ATTEMPTS => {
                let base = READ_RETRY_BASE_MS * 2u64.pow(attempt - 1);
                let jitter = rand::thread_rng().gen_range(0..=base / 2);
                debug!(attempt, delay_ms = base + jitter, error = %err, "retrying read");
                tokio::time::sleep(Duration::from_millis(base + jitter)).await;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_validator_rejects_injection() {
        assert!(validate_identifier("created_at").is_ok());
        assert!(validate_identifier("Title2").is_ok());
        assert!(validate_identifier("created_at; DROP TABLE bug_reports--").is_err());
        assert!(validate_identifier("name with space").is_err());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("naïve").is_err());
    }

    #[test]
    fn sort_key_must_be_allowlisted() {
        let allowed = ["created_at", "priority"];
        assert!(validate_sort_key("created_at", &allowed).is_ok());
        assert!(matches!(
            validate_sort_key("updated_at", &allowed),
            Err(DbError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn pagination_bounds() {
        assert!(Page::validated(1, 1).is_ok());
        assert!(Page::validated(1, 1_000).is_ok());
        assert!(Page::validated(0, 10).is_err());
        assert!(Page::validated(1, 0).is_err());
        assert!(Page::validated(1, 1_001).is_err());
        assert_eq!(Page::validated(3, 50).unwrap().offset(), 100);
    }

    #[test]
    fn batch_cap_enforced_before_sql() {
        assert!(ensure_batch_size(0).is_ok());
        assert!(ensure_batch_size(1_000).is_ok());
        assert!(matches!(
            ensure_batch_size(1_001),
            Err(DbError::BatchTooLarge { len: 1_001, max: 1_000 })
        ));
    }
}
