use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite, Transaction};
use tracing::{info, instrument};

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 20,
            idle_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(2),
        }
    }
}

#[instrument(skip(settings))]
pub async fn connect_pool(
    database_url: &str,
    settings: &PoolSettings,
) -> Result<Pool<Sqlite>, AppError> {
    info!(
        max_connections = settings.max_connections,
        idle_timeout_secs = settings.idle_timeout.as_secs(),
        acquire_timeout_secs = settings.acquire_timeout.as_secs(),
        "Connecting to SQLite database"
    );

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(settings.max_connections)
        .idle_timeout(settings.idle_timeout)
        .acquire_timeout(settings.acquire_timeout)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Opens a transaction and logs which operation it belongs to.
pub async fn begin_logged(
    pool: &Pool<Sqlite>,
    operation: &str,
) -> Result<Transaction<'static, Sqlite>, AppError> {
    info!(operation = %operation, "Beginning transaction");
    Ok(pool.begin().await?)
}

/// Like [`begin_logged`] but takes the write lock up front. Needed by
/// transactions that read before they write: a deferred transaction
/// cannot upgrade to a writer while another connection holds the lock,
/// and SQLite fails it with SQLITE_BUSY instead of waiting.
pub async fn begin_immediate_logged(
    pool: &Pool<Sqlite>,
    operation: &str,
) -> Result<Transaction<'static, Sqlite>, AppError> {
    info!(operation = %operation, "Beginning immediate transaction");
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

pub async fn commit_logged(tx: Transaction<'_, Sqlite>, operation: &str) -> Result<(), AppError> {
    tx.commit().await?;
    info!(operation = %operation, "Committed transaction");
    Ok(())
}
