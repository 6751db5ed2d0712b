use rocket::State;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use tracing::info;
use validator::Validate;

use crate::auth::{Permission, User};
use crate::db::{
    get_enrollments, get_module_progress, get_user_metrics, record_learning_time,
    record_quiz_completion, record_section_progress,
};
use crate::error::AppError;
use crate::models::{Enrollment, ModuleProgressReport, UserMetrics};
use crate::validation::{JsonValidateExt, SECTION_ID_RE};

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdateRequest {
    #[validate(range(min = 1))]
    pub module_id: i64,
    #[validate(regex(path = *SECTION_ID_RE, message = "Invalid section id"))]
    pub section_id: String,
    pub completed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProgressUpdateResponse {
    pub success: bool,
    pub progress: i64,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QuizCompleteRequest {
    #[validate(range(min = 1))]
    pub module_id: i64,
    #[validate(regex(path = *SECTION_ID_RE, message = "Invalid quiz id"))]
    pub quiz_id: String,
    #[validate(range(min = 0, max = 100))]
    pub score: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QuizCompleteResponse {
    pub success: bool,
    pub progress: i64,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LearningTimeRequest {
    #[validate(range(min = 1))]
    pub module_id: i64,
    #[validate(regex(path = *SECTION_ID_RE, message = "Invalid section id"))]
    pub section_id: String,
    #[validate(range(min = 1, max = 86400))]
    pub seconds: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningTimeResponse {
    pub success: bool,
    pub time_spent: i64,
}

#[post("/progress/update", data = "<update>")]
pub async fn update_progress(
    update: Json<ProgressUpdateRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ProgressUpdateResponse>, AppError> {
    user.require_permission(Permission::TrackOwnProgress)?;
    let update = update.into_validated()?;

    let result = record_section_progress(
        db,
        user.id,
        update.module_id,
        &update.section_id,
        update.completed,
    )
    .await?;

    let progress = result.completion.progress;
    info!(module_id = update.module_id, progress, "Progress updated");

    Ok(Json(ProgressUpdateResponse {
        success: true,
        progress,
        message: format!("Module progress is now {}%", progress),
    }))
}

#[post("/progress/quiz-complete", data = "<quiz>")]
pub async fn quiz_complete(
    quiz: Json<QuizCompleteRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<QuizCompleteResponse>, AppError> {
    user.require_permission(Permission::TrackOwnProgress)?;
    let quiz = quiz.into_validated()?;

    let result =
        record_quiz_completion(db, user.id, quiz.module_id, &quiz.quiz_id, quiz.score).await?;

    Ok(Json(QuizCompleteResponse {
        success: true,
        progress: result.completion.progress,
    }))
}

#[post("/progress/time", data = "<time>")]
pub async fn track_time(
    time: Json<LearningTimeRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<LearningTimeResponse>, AppError> {
    user.require_permission(Permission::TrackOwnProgress)?;
    let time = time.into_validated()?;

    let result =
        record_learning_time(db, user.id, time.module_id, &time.section_id, time.seconds).await?;

    Ok(Json(LearningTimeResponse {
        success: true,
        time_spent: result.section.time_spent,
    }))
}

#[get("/progress")]
pub async fn list_progress(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<Enrollment>>, AppError> {
    Ok(Json(get_enrollments(db, user.id).await?))
}

#[get("/progress/<module_id>")]
pub async fn module_progress(
    module_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ModuleProgressReport>, AppError> {
    Ok(Json(get_module_progress(db, user.id, module_id).await?))
}

#[get("/user-metrics")]
pub async fn user_metrics(
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<UserMetrics>, AppError> {
    Ok(Json(get_user_metrics(db, user.id).await?))
}
