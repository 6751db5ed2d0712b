use rocket::State;
use rocket::http::Status;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::auth::{Permission, User};
use crate::db::{self, NewSection};
use crate::error::AppError;
use crate::models::{
    Achievement, AchievementKind, AdminUserSummary, AwardSource, GlossaryTerm, ModuleDetail,
    PlatformStats, QuizQuestion, UserAchievement,
};
use crate::validation::{JsonValidateExt, SECTION_ID_RE, validate_achievement_criteria};

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SectionRequest {
    #[validate(regex(path = *SECTION_ID_RE, message = "Invalid section id"))]
    pub section_id: String,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRequest {
    #[validate(range(min = 1))]
    pub id: Option<i64>,
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    #[validate(nested)]
    pub sections: Vec<SectionRequest>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AchievementRequest {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[validate(custom(function = "validate_achievement_criteria"))]
    pub criteria: Value,
    pub kind: AchievementKind,
    #[validate(url)]
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QuizRequest {
    #[validate(range(min = 1))]
    pub module_id: i64,
    #[validate(length(min = 1))]
    pub question: String,
    #[validate(length(min = 2, message = "A question needs at least two options"))]
    pub options: Vec<String>,
    #[validate(length(min = 1))]
    pub correct_answer: String,
    pub explanation: Option<String>,
    #[serde(default)]
    pub position: i64,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GlossaryTermRequest {
    #[validate(length(min = 1, max = 100))]
    pub term: String,
    #[validate(length(min = 1))]
    pub definition: String,
    #[validate(length(min = 1, max = 50))]
    pub category: Option<String>,
    #[validate(length(min = 1, max = 50))]
    pub difficulty: Option<String>,
    #[serde(default)]
    pub related_terms: Vec<String>,
}

#[post("/admin/modules", data = "<request>")]
pub async fn create_module(
    request: Json<ModuleRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<(Status, Json<ModuleDetail>), AppError> {
    user.require_permission(Permission::ManageCatalog)?;
    let request = request.into_validated()?;

    let sections: Vec<NewSection> = request
        .sections
        .into_iter()
        .map(|s| NewSection {
            section_id: s.section_id,
            title: s.title,
        })
        .collect();

    let module = db::create_module(
        db,
        request.id,
        &request.title,
        &request.description,
        request.position,
        &sections,
    )
    .await?;

    Ok((Status::Created, Json(module)))
}

#[post("/admin/achievements", data = "<request>")]
pub async fn create_achievement(
    request: Json<AchievementRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<(Status, Json<Achievement>), AppError> {
    user.require_permission(Permission::ManageAchievements)?;
    let request = request.into_validated()?;

    let achievement = db::create_achievement(
        db,
        &request.name,
        &request.description,
        &request.criteria,
        request.kind,
        request.image_url.as_deref(),
    )
    .await?;

    Ok((Status::Created, Json(achievement)))
}

#[post("/admin/quizzes", data = "<request>")]
pub async fn create_quiz(
    request: Json<QuizRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<(Status, Json<QuizQuestion>), AppError> {
    user.require_permission(Permission::ManageCatalog)?;
    let request = request.into_validated()?;

    let quiz = db::create_quiz(
        db,
        request.module_id,
        &request.question,
        &request.options,
        &request.correct_answer,
        request.explanation.as_deref(),
        request.position,
    )
    .await?;

    Ok((Status::Created, Json(quiz)))
}

#[post("/admin/glossary", data = "<request>")]
pub async fn create_glossary_term(
    request: Json<GlossaryTermRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<(Status, Json<GlossaryTerm>), AppError> {
    user.require_permission(Permission::ManageCatalog)?;
    let request = request.into_validated()?;

    let term = db::create_term(
        db,
        &request.term,
        &request.definition,
        request.category.as_deref().unwrap_or("general"),
        request.difficulty.as_deref().unwrap_or("beginner"),
        &request.related_terms,
    )
    .await?;

    Ok((Status::Created, Json(term)))
}

#[get("/admin/users")]
pub async fn list_users(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<AdminUserSummary>>, AppError> {
    user.require_permission(Permission::ViewAllUsers)?;
    Ok(Json(db::list_user_summaries(db).await?))
}

#[get("/admin/stats")]
pub async fn stats(user: User, db: &State<Pool<Sqlite>>) -> Result<Json<PlatformStats>, AppError> {
    user.require_permission(Permission::ViewAllUsers)?;
    Ok(Json(db::platform_stats(db).await?))
}

#[post("/admin/users/<user_id>/achievements/<achievement_id>")]
pub async fn award_to_user(
    user_id: i64,
    achievement_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<UserAchievement>, AppError> {
    user.require_permission(Permission::AwardAchievements)?;

    db::get_user(db, user_id).await?;
    let award = db::award_achievement(db, user_id, achievement_id, AwardSource::Admin).await?;
    Ok(Json(award))
}
