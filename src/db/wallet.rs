use chrono::Utc;
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument, warn};

use crate::database::{begin_immediate_logged, commit_logged};
use crate::error::AppError;
use crate::models::{
    DbVirtualTransaction, DbVirtualWallet, TransactionKind, VirtualTransaction, VirtualWallet,
};

pub const INSUFFICIENT_BALANCE_MESSAGE: &str = "Insufficient balance";
pub const NON_FINITE_VALUE_MESSAGE: &str = "Transaction value is out of range";

const WALLET_COLUMNS: &str = "id, user_id, balance, created_at, updated_at";

const TRANSACTION_COLUMNS: &str =
    "id, wallet_id, kind, asset, amount, price, balance_after, created_at";

async fn ensure_wallet(
    conn: &mut SqliteConnection,
    user_id: i64,
    starting_balance: f64,
) -> Result<DbVirtualWallet, AppError> {
    let now = Utc::now().naive_utc();
    sqlx::query(
        "INSERT INTO virtual_wallets (user_id, balance, created_at, updated_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(starting_balance)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    let wallet = sqlx::query_as::<_, DbVirtualWallet>(&format!(
        "SELECT {} FROM virtual_wallets WHERE user_id = ?",
        WALLET_COLUMNS
    ))
    .bind(user_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(wallet)
}

/// Returns the user's wallet, opening it with `starting_balance` on first use.
#[instrument(skip(pool))]
pub async fn get_or_create_wallet(
    pool: &Pool<Sqlite>,
    user_id: i64,
    starting_balance: f64,
) -> Result<VirtualWallet, AppError> {
    info!("Fetching virtual wallet");
    let mut conn = pool.acquire().await?;
    let wallet = ensure_wallet(&mut conn, user_id, starting_balance).await?;
    Ok(VirtualWallet::from(wallet))
}

#[instrument(skip(pool))]
pub async fn list_transactions(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<VirtualTransaction>, AppError> {
    info!("Listing wallet transactions");
    let rows = sqlx::query_as::<_, DbVirtualTransaction>(&format!(
        "SELECT {} FROM virtual_transactions
         WHERE wallet_id = (SELECT id FROM virtual_wallets WHERE user_id = ?)
         ORDER BY created_at DESC, id DESC",
        TRANSACTION_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(VirtualTransaction::try_from).collect()
}

/// Applies a transaction to the wallet balance and appends it to the log.
#[instrument(skip(pool))]
pub async fn record_transaction(
    pool: &Pool<Sqlite>,
    user_id: i64,
    starting_balance: f64,
    kind: TransactionKind,
    asset: &str,
    amount: f64,
    price: Option<f64>,
) -> Result<VirtualTransaction, AppError> {
    info!("Recording wallet transaction");
    let price = price.unwrap_or(1.0);
    let value = amount * price;
    if !value.is_finite() {
        warn!(amount, price, "Rejected transaction with non-finite value");
        return Err(AppError::Validation(NON_FINITE_VALUE_MESSAGE.to_string()));
    }
    let delta = if kind.credits() { value } else { -value };

    let mut tx = begin_immediate_logged(pool, "record_transaction").await?;
    let wallet = ensure_wallet(&mut tx, user_id, starting_balance).await?;
    let now = Utc::now().naive_utc();

    // The guard in the WHERE clause keeps the balance non-negative even when
    // two debits race.
    let balance_after: Option<f64> = sqlx::query_scalar(
        "UPDATE virtual_wallets
         SET balance = balance + ?, updated_at = ?
         WHERE id = ? AND balance + ? >= 0
         RETURNING balance",
    )
    .bind(delta)
    .bind(now)
    .bind(wallet.id)
    .bind(delta)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(balance_after) = balance_after else {
        warn!(balance = wallet.balance, value, "Rejected transaction on insufficient balance");
        tx.rollback().await?;
        return Err(AppError::Validation(INSUFFICIENT_BALANCE_MESSAGE.to_string()));
    };
    if !balance_after.is_finite() {
        warn!(balance = wallet.balance, value, "Rejected transaction overflowing the balance");
        tx.rollback().await?;
        return Err(AppError::Validation(NON_FINITE_VALUE_MESSAGE.to_string()));
    }

    let row = sqlx::query_as::<_, DbVirtualTransaction>(&format!(
        "INSERT INTO virtual_transactions
             (wallet_id, kind, asset, amount, price, balance_after, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)
         RETURNING {}",
        TRANSACTION_COLUMNS
    ))
    .bind(wallet.id)
    .bind(kind.as_str())
    .bind(asset)
    .bind(amount)
    .bind(price)
    .bind(balance_after)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    commit_logged(tx, "record_transaction").await?;

    VirtualTransaction::try_from(row)
}
