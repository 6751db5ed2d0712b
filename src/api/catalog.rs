use rocket::State;
use rocket::serde::json::Json;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use validator::Validate;

use crate::auth::User;
use crate::db;
use crate::env::AppConfig;
use crate::error::AppError;
use crate::models::{CourseModule, ModuleDetail, QuizAnswerResult, QuizQuestion, QuizSummary};
use crate::validation::JsonValidateExt;

#[derive(Debug, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QuizAnswerRequest {
    #[validate(length(min = 1, max = 512))]
    pub selected_answer: String,
    #[validate(range(min = 0, max = 86400))]
    pub time_spent: Option<i64>,
}

#[get("/modules")]
pub async fn list_modules(
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<CourseModule>>, AppError> {
    Ok(Json(db::list_modules(db).await?))
}

#[get("/modules/<module_id>")]
pub async fn get_module(
    module_id: i64,
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<ModuleDetail>, AppError> {
    Ok(Json(db::get_module(db, module_id).await?))
}

#[get("/modules/<module_id>/quizzes")]
pub async fn module_quizzes(
    module_id: i64,
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<QuizQuestion>>, AppError> {
    Ok(Json(db::list_module_quizzes(db, module_id).await?))
}

#[post("/quizzes/<quiz_id>/responses", data = "<answer>")]
pub async fn answer_quiz(
    quiz_id: i64,
    answer: Json<QuizAnswerRequest>,
    user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<QuizAnswerResult>, AppError> {
    let answer = answer.into_validated()?;

    let result = db::record_quiz_response(
        db,
        user.id,
        quiz_id,
        &answer.selected_answer,
        answer.time_spent.unwrap_or(0),
    )
    .await?;

    Ok(Json(result))
}

#[get("/modules/<module_id>/quiz-summary")]
pub async fn quiz_summary(
    module_id: i64,
    user: User,
    db: &State<Pool<Sqlite>>,
    config: &State<AppConfig>,
) -> Result<Json<QuizSummary>, AppError> {
    let summary =
        db::get_quiz_summary(db, user.id, module_id, config.quiz_pass_threshold).await?;
    Ok(Json(summary))
}
