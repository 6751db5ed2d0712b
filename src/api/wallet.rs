use rocket::State;
use rocket::http::Status;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::auth::{Permission, User};
use crate::db;
use crate::env::AppConfig;
use crate::error::AppError;
use crate::models::{TransactionKind, VirtualTransaction, VirtualWallet};
use crate::validation::JsonValidateExt;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct TransactionRequest {
    pub kind: TransactionKind,
    #[validate(length(min = 1, max = 32))]
    pub asset: String,
    #[validate(range(exclusive_min = 0.0, max = 1_000_000_000.0))]
    pub amount: f64,
    #[validate(range(exclusive_min = 0.0, max = 1_000_000_000.0))]
    pub price: Option<f64>,
}

#[get("/wallet")]
pub async fn get_wallet(
    user: User,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Json<VirtualWallet>, AppError> {
    user.require_permission(Permission::UseVirtualWallet)?;
    let wallet = db::get_or_create_wallet(db, user.id, config.wallet_starting_balance).await?;
    Ok(Json(wallet))
}

#[get("/wallet/transactions")]
pub async fn list_transactions(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<VirtualTransaction>>, AppError> {
    user.require_permission(Permission::UseVirtualWallet)?;
    Ok(Json(db::list_transactions(db, user.id).await?))
}

#[post("/wallet/transactions", data = "<request>")]
pub async fn create_transaction(
    request: Json<TransactionRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<(Status, Json<VirtualTransaction>), AppError> {
    user.require_permission(Permission::UseVirtualWallet)?;
    let request = request.into_validated()?;

    let transaction = db::record_transaction(
        db,
        user.id,
        config.wallet_starting_balance,
        request.kind,
        &request.asset,
        request.amount,
        request.price,
    )
    .await?;

    Ok((Status::Created, Json(transaction)))
}
