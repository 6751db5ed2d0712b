use chrono::Utc;
use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::{
    DbQuiz, QuizAnswerResult, QuizQuestion, QuizSummary, completion_percentage,
};

const QUIZ_COLUMNS: &str =
    "id, module_id, question, options, correct_answer, explanation, position";

#[instrument]
pub async fn list_module_quizzes(
    pool: &Pool<Sqlite>,
    module_id: i64,
) -> Result<Vec<QuizQuestion>, AppError> {
    info!("Listing module quiz questions");
    let rows = sqlx::query_as::<_, DbQuiz>(&format!(
        "SELECT {} FROM quizzes WHERE module_id = ? ORDER BY position, id",
        QUIZ_COLUMNS
    ))
    .bind(module_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(QuizQuestion::from).collect())
}

#[instrument(skip(pool, options, explanation))]
pub async fn create_quiz(
    pool: &Pool<Sqlite>,
    module_id: i64,
    question: &str,
    options: &[String],
    correct_answer: &str,
    explanation: Option<&str>,
    position: i64,
) -> Result<QuizQuestion, AppError> {
    info!("Creating quiz question");
    if !options.iter().any(|option| option == correct_answer) {
        return Err(AppError::Validation(
            "Correct answer must be one of the options".to_string(),
        ));
    }

    let row = sqlx::query_as::<_, DbQuiz>(&format!(
        "INSERT INTO quizzes (module_id, question, options, correct_answer, explanation, position)
         VALUES (?, ?, ?, ?, ?, ?)
         RETURNING {}",
        QUIZ_COLUMNS
    ))
    .bind(module_id)
    .bind(question)
    .bind(serde_json::to_string(options)?)
    .bind(correct_answer)
    .bind(explanation)
    .bind(position)
    .fetch_one(pool)
    .await?;

    Ok(QuizQuestion::from(row))
}

#[instrument(skip(pool, selected_answer))]
pub async fn record_quiz_response(
    pool: &Pool<Sqlite>,
    user_id: i64,
    quiz_id: i64,
    selected_answer: &str,
    time_spent: i64,
) -> Result<QuizAnswerResult, AppError> {
    info!("Recording quiz response");
    let quiz = sqlx::query_as::<_, DbQuiz>(&format!(
        "SELECT {} FROM quizzes WHERE id = ?",
        QUIZ_COLUMNS
    ))
    .bind(quiz_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Quiz question {} not found", quiz_id)))?;

    let correct = quiz.correct_answer == selected_answer;

    let res = sqlx::query(
        "INSERT INTO user_quiz_responses
             (user_id, quiz_id, selected_answer, is_correct, time_spent, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(quiz_id)
    .bind(selected_answer)
    .bind(correct)
    .bind(time_spent)
    .bind(Utc::now().naive_utc())
    .execute(pool)
    .await?;

    Ok(QuizAnswerResult {
        response_id: res.last_insert_rowid(),
        correct,
        correct_answer: quiz.correct_answer,
        explanation: quiz.explanation.unwrap_or_default(),
    })
}

/// Scores a module's quiz from the user's latest answer to each question.
#[instrument(skip(pool))]
pub async fn get_quiz_summary(
    pool: &Pool<Sqlite>,
    user_id: i64,
    module_id: i64,
    pass_threshold: i64,
) -> Result<QuizSummary, AppError> {
    info!("Computing quiz summary");

    let (total_questions, answered, correct): (i64, i64, i64) = sqlx::query_as(
        "SELECT
             (SELECT COUNT(*) FROM quizzes WHERE module_id = ?),
             COUNT(latest.quiz_id),
             COALESCE(SUM(CASE WHEN latest.is_correct THEN 1 ELSE 0 END), 0)
         FROM (
             SELECT r.quiz_id, r.is_correct
             FROM user_quiz_responses r
             JOIN quizzes q ON q.id = r.quiz_id
             WHERE r.user_id = ? AND q.module_id = ?
               AND r.id = (
                   SELECT MAX(r2.id) FROM user_quiz_responses r2
                   WHERE r2.user_id = r.user_id AND r2.quiz_id = r.quiz_id
               )
         ) AS latest",
    )
    .bind(module_id)
    .bind(user_id)
    .bind(module_id)
    .fetch_one(pool)
    .await?;

    let score = completion_percentage(correct, total_questions);

    Ok(QuizSummary {
        module_id,
        total_questions,
        answered,
        correct,
        score,
        passed: total_questions > 0 && score >= pass_threshold,
    })
}
