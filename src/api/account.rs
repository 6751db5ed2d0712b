use chrono::{Duration, Utc};
use rocket::State;
use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::auth::{Permission, Role, SESSION_COOKIE, User, UserSession};
use crate::db::{
    authenticate_user, create_user, create_user_session, get_user, invalidate_session,
    update_user_profile,
};
use crate::env::AppConfig;
use crate::error::AppError;
use crate::validation::{JsonValidateExt, USERNAME_RE, validate_learning_preferences};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    #[validate(regex(
        path = *USERNAME_RE,
        message = "Username must be 3-32 letters, digits, '_', '.' or '-'"
    ))]
    pub username: String,
    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,
    #[validate(length(min = 1, max = 64))]
    pub display_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1))]
    pub username: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdateRequest {
    #[validate(length(min = 1, max = 64))]
    pub display_name: Option<String>,
    #[validate(custom(function = "validate_learning_preferences"))]
    pub learning_preferences: Option<Value>,
}

#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}

#[post("/signup", data = "<signup>")]
pub async fn signup(
    signup: Json<SignupRequest>,
    db: &State<Pool<Sqlite>>,
) -> Result<(Status, Json<User>), AppError> {
    let signup = signup.into_validated()?;

    let user_id = create_user(
        db,
        &signup.username,
        &signup.password,
        Role::Learner,
        signup.display_name.as_deref(),
    )
    .await?;

    Ok((Status::Created, Json(get_user(db, user_id).await?)))
}

#[post("/login", data = "<login>")]
pub async fn login(
    login: Json<LoginRequest>,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Json<LoginResponse>, AppError> {
    let login = login.into_validated()?;

    let Some(user) = authenticate_user(db, &login.username, &login.password).await? else {
        return Ok(Json(LoginResponse {
            success: false,
            user: None,
            error: Some("Invalid username or password".to_string()),
        }));
    };

    let token = UserSession::generate_token();
    let expires_at = Utc::now() + Duration::hours(config.session_ttl_hours);
    create_user_session(db, user.id, &token, expires_at.naive_utc()).await?;

    cookies.add_private(
        Cookie::build((SESSION_COOKIE, token))
            .same_site(SameSite::Lax)
            .http_only(true)
            .max_age(rocket::time::Duration::hours(config.session_ttl_hours)),
    );

    Ok(Json(LoginResponse {
        success: true,
        user: Some(user),
        error: None,
    }))
}

#[post("/logout")]
pub async fn logout(
    _user: User,
    cookies: &CookieJar<'_>,
    db: &State<Pool<Sqlite>>,
) -> Result<Status, AppError> {
    if let Some(cookie) = cookies.get_private(SESSION_COOKIE) {
        invalidate_session(db, cookie.value()).await?;
    }
    cookies.remove_private(Cookie::build(SESSION_COOKIE));

    Ok(Status::Ok)
}

#[get("/me")]
pub fn me(user: User) -> Result<Json<User>, AppError> {
    user.require_permission(Permission::ViewOwnProfile)?;
    Ok(Json(user))
}

#[put("/profile", data = "<profile>")]
pub async fn update_profile(
    profile: Json<ProfileUpdateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<User>, AppError> {
    user.require_permission(Permission::EditOwnProfile)?;
    let profile = profile.into_validated()?;

    let updated = update_user_profile(
        db,
        user.id,
        profile.display_name.as_deref(),
        profile.learning_preferences.as_ref(),
    )
    .await?;

    Ok(Json(updated))
}
