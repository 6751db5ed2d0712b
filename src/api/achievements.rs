use rocket::State;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::auth::{Permission, User};
use crate::db;
use crate::error::AppError;
use crate::models::{Achievement, AwardSource, EarnedAchievement, UserAchievement};
use crate::validation::JsonValidateExt;

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ModuleCompletionRequest {
    #[validate(range(min = 1))]
    pub module_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModuleCompletionResponse {
    pub awarded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub achievement: Option<EarnedAchievement>,
}

#[get("/achievements")]
pub async fn list_achievements(
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Achievement>>, AppError> {
    Ok(Json(db::list_achievements(db).await?))
}

#[get("/achievements/earned")]
pub async fn earned_achievements(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<EarnedAchievement>>, AppError> {
    Ok(Json(db::get_earned_achievements(db, user.id).await?))
}

#[post("/achievements/check-module-completion", data = "<request>")]
pub async fn check_module_completion(
    request: Json<ModuleCompletionRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ModuleCompletionResponse>, AppError> {
    user.require_permission(Permission::EarnAchievements)?;
    let request = request.into_validated()?;

    let achievement = db::check_module_completion(db, user.id, request.module_id).await?;

    Ok(Json(ModuleCompletionResponse {
        awarded: achievement.is_some(),
        achievement,
    }))
}

#[post("/achievements/<achievement_id>/award")]
pub async fn award_achievement(
    achievement_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<UserAchievement>, AppError> {
    user.require_permission(Permission::EarnAchievements)?;

    let award = db::award_achievement(db, user.id, achievement_id, AwardSource::Manual).await?;
    Ok(Json(award))
}
