use chrono::{NaiveDateTime, Utc};
use serde_json::Value;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use super::conflict_or_database;
use crate::auth::{DbUser, DbUserSession, Role, User, UserSession};
use crate::error::AppError;

#[cfg(not(test))]
const BCRYPT_COST: u32 = bcrypt::DEFAULT_COST;
#[cfg(test)]
const BCRYPT_COST: u32 = 4;

const USER_COLUMNS: &str = "id, username, role, display_name, learning_preferences";

#[instrument]
pub async fn get_user(pool: &Pool<Sqlite>, id: i64) -> Result<User, AppError> {
    info!("Fetching user by ID");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users WHERE id = ?",
        USER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(user) => User::try_from(user),
        _ => Err(AppError::NotFound(format!(
            "User with id {} not found in database",
            id
        ))),
    }
}

#[instrument]
pub async fn find_user_by_username(
    pool: &Pool<Sqlite>,
    username: &str,
) -> Result<Option<User>, AppError> {
    info!("Looking up user by username");
    let row = sqlx::query_as::<_, DbUser>(&format!(
        "SELECT {} FROM users WHERE username = ?",
        USER_COLUMNS
    ))
    .bind(username)
    .fetch_optional(pool)
    .await?;

    row.map(User::try_from).transpose()
}

#[instrument(skip(pool, password))]
pub async fn create_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
    role: Role,
    display_name: Option<&str>,
) -> Result<i64, AppError> {
    info!("Creating new user");

    let hashed_password = bcrypt::hash(password, BCRYPT_COST)?;

    let res = sqlx::query(
        "INSERT INTO users (username, password, role, display_name) VALUES (?, ?, ?, ?)",
    )
    .bind(username)
    .bind(hashed_password)
    .bind(role.as_str())
    .bind(display_name)
    .execute(pool)
    .await
    .map_err(|e| conflict_or_database(e, "Username already exists"))?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, password))]
pub async fn authenticate_user(
    pool: &Pool<Sqlite>,
    username: &str,
    password: &str,
) -> Result<Option<User>, AppError> {
    info!("Authenticating user");

    #[derive(sqlx::FromRow)]
    struct Credentials {
        id: i64,
        password: String,
    }

    let credentials =
        sqlx::query_as::<_, Credentials>("SELECT id, password FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(pool)
            .await?;

    let Some(credentials) = credentials else {
        return Ok(None);
    };

    match bcrypt::verify(password, &credentials.password) {
        Ok(true) => Ok(Some(get_user(pool, credentials.id).await?)),
        _ => Ok(None),
    }
}

#[instrument(skip(pool, learning_preferences))]
pub async fn update_user_profile(
    pool: &Pool<Sqlite>,
    user_id: i64,
    display_name: Option<&str>,
    learning_preferences: Option<&Value>,
) -> Result<User, AppError> {
    info!("Updating user profile");

    let preferences = learning_preferences.map(serde_json::to_string).transpose()?;

    sqlx::query(
        "UPDATE users
         SET display_name = COALESCE(?, display_name),
             learning_preferences = COALESCE(?, learning_preferences)
         WHERE id = ?",
    )
    .bind(display_name)
    .bind(preferences)
    .bind(user_id)
    .execute(pool)
    .await?;

    get_user(pool, user_id).await
}

#[instrument(skip(pool, token))]
pub async fn create_user_session(
    pool: &Pool<Sqlite>,
    user_id: i64,
    token: &str,
    expires_at: NaiveDateTime,
) -> Result<i64, AppError> {
    info!("Creating user session");

    let res =
        sqlx::query("INSERT INTO user_sessions (user_id, token, expires_at) VALUES (?, ?, ?)")
            .bind(user_id)
            .bind(token)
            .bind(expires_at)
            .execute(pool)
            .await?;

    Ok(res.last_insert_rowid())
}

#[instrument(skip(pool, token))]
pub async fn get_session_by_token(
    pool: &Pool<Sqlite>,
    token: &str,
) -> Result<UserSession, AppError> {
    info!("Getting session by token");

    let session = sqlx::query_as::<_, DbUserSession>(
        "SELECT id, user_id, token, created_at, expires_at FROM user_sessions WHERE token = ?",
    )
    .bind(token)
    .fetch_optional(pool)
    .await?;

    match session {
        Some(session) => Ok(UserSession::from(session)),
        _ => Err(AppError::Authentication(
            "Invalid session token".to_string(),
        )),
    }
}

#[instrument(skip(pool, token))]
pub async fn invalidate_session(pool: &Pool<Sqlite>, token: &str) -> Result<(), AppError> {
    info!("Invalidating session");

    sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;

    Ok(())
}

#[instrument(skip(pool))]
pub async fn clean_expired_sessions(pool: &Pool<Sqlite>) -> Result<u64, AppError> {
    info!("Cleaning expired sessions");

    let now = Utc::now().naive_utc();

    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at < ?")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
