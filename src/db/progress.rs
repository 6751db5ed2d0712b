use chrono::{NaiveDateTime, Utc};
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument};

use crate::database::{begin_immediate_logged, commit_logged};
use crate::error::AppError;
use crate::models::{
    DbEnrollment, DbSectionProgress, Enrollment, ModuleCompletion, ModuleProgressReport,
    SectionProgress, UserMetrics, completion_percentage,
};

const PROGRESS_COLUMNS: &str =
    "id, user_id, module_id, section_id, completed, score, time_spent, last_accessed, completed_at";

const ENROLLMENT_COLUMNS: &str =
    "id, user_id, module_id, progress, enrolled_at, last_accessed_at, completed_at";

/// Score recorded for a completed quiz when the caller does not report one.
pub const DEFAULT_QUIZ_SCORE: i64 = 100;

/// Section id under which a finished quiz is tracked.
pub fn quiz_section_id(quiz_id: &str) -> String {
    format!("quiz-{}", quiz_id)
}

/// Result of any progress write: the section row as stored and the module
/// completion recomputed in the same transaction.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub section: SectionProgress,
    pub completion: ModuleCompletion,
}

enum SectionWrite {
    Completion { completed: bool },
    QuizPassed { score: i64 },
    Time { seconds: i64 },
}

async fn upsert_section(
    conn: &mut SqliteConnection,
    user_id: i64,
    module_id: i64,
    section_id: &str,
    write: SectionWrite,
    now: NaiveDateTime,
) -> Result<DbSectionProgress, AppError> {
    let row = match write {
        SectionWrite::Completion { completed } => {
            let completed_at = completed.then_some(now);
            sqlx::query_as::<_, DbSectionProgress>(&format!(
                "INSERT INTO module_progress
                     (user_id, module_id, section_id, completed, time_spent, last_accessed, completed_at)
                 VALUES (?, ?, ?, ?, 0, ?, ?)
                 ON CONFLICT (user_id, module_id, section_id) DO UPDATE SET
                     completed = excluded.completed,
                     last_accessed = excluded.last_accessed,
                     completed_at = excluded.completed_at
                 RETURNING {}",
                PROGRESS_COLUMNS
            ))
            .bind(user_id)
            .bind(module_id)
            .bind(section_id)
            .bind(completed)
            .bind(now)
            .bind(completed_at)
            .fetch_one(&mut *conn)
            .await?
        }
        SectionWrite::QuizPassed { score } => {
            sqlx::query_as::<_, DbSectionProgress>(&format!(
                "INSERT INTO module_progress
                     (user_id, module_id, section_id, completed, score, time_spent, last_accessed, completed_at)
                 VALUES (?, ?, ?, TRUE, ?, 0, ?, ?)
                 ON CONFLICT (user_id, module_id, section_id) DO UPDATE SET
                     completed = TRUE,
                     score = excluded.score,
                     last_accessed = excluded.last_accessed,
                     completed_at = excluded.completed_at
                 RETURNING {}",
                PROGRESS_COLUMNS
            ))
            .bind(user_id)
            .bind(module_id)
            .bind(section_id)
            .bind(score)
            .bind(now)
            .bind(now)
            .fetch_one(&mut *conn)
            .await?
        }
        SectionWrite::Time { seconds } => {
            sqlx::query_as::<_, DbSectionProgress>(&format!(
                "INSERT INTO module_progress
                     (user_id, module_id, section_id, completed, time_spent, last_accessed)
                 VALUES (?, ?, ?, FALSE, ?, ?)
                 ON CONFLICT (user_id, module_id, section_id) DO UPDATE SET
                     time_spent = module_progress.time_spent + excluded.time_spent,
                     last_accessed = excluded.last_accessed
                 RETURNING {}",
                PROGRESS_COLUMNS
            ))
            .bind(user_id)
            .bind(module_id)
            .bind(section_id)
            .bind(seconds)
            .bind(now)
            .fetch_one(&mut *conn)
            .await?
        }
    };

    Ok(row)
}

/// Completion of a module for a user. Catalog sections are the known
/// sections when the module has any; otherwise the user's own progress rows
/// are.
pub async fn module_completion(
    conn: &mut SqliteConnection,
    user_id: i64,
    module_id: i64,
) -> Result<ModuleCompletion, AppError> {
    let catalog_sections: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM module_sections WHERE module_id = ?")
            .bind(module_id)
            .fetch_one(&mut *conn)
            .await?;

    let (completed, total) = if catalog_sections > 0 {
        let completed: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM module_progress p
             JOIN module_sections s ON s.module_id = p.module_id AND s.section_id = p.section_id
             WHERE p.user_id = ? AND p.module_id = ? AND p.completed = TRUE",
        )
        .bind(user_id)
        .bind(module_id)
        .fetch_one(&mut *conn)
        .await?;
        (completed, catalog_sections)
    } else {
        let (completed, total): (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(CASE WHEN completed THEN 1 ELSE 0 END), 0), COUNT(*)
             FROM module_progress
             WHERE user_id = ? AND module_id = ?",
        )
        .bind(user_id)
        .bind(module_id)
        .fetch_one(&mut *conn)
        .await?;
        (completed, total)
    };

    Ok(ModuleCompletion::new(module_id, completed, total))
}

async fn sync_enrollment(
    conn: &mut SqliteConnection,
    user_id: i64,
    module_id: i64,
    progress: i64,
    now: NaiveDateTime,
) -> Result<(), AppError> {
    let completed_at = (progress >= 100).then_some(now);

    sqlx::query(
        "INSERT INTO course_enrollments
             (user_id, module_id, progress, enrolled_at, last_accessed_at, completed_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT (user_id, module_id) DO UPDATE SET
             progress = excluded.progress,
             last_accessed_at = excluded.last_accessed_at,
             completed_at = CASE
                 WHEN excluded.progress >= 100
                     THEN COALESCE(course_enrollments.completed_at, excluded.completed_at)
                 ELSE NULL
             END",
    )
    .bind(user_id)
    .bind(module_id)
    .bind(progress)
    .bind(now)
    .bind(now)
    .bind(completed_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn write_progress(
    pool: &Pool<Sqlite>,
    operation: &str,
    user_id: i64,
    module_id: i64,
    section_id: &str,
    write: SectionWrite,
) -> Result<ProgressUpdate, AppError> {
    let now = Utc::now().naive_utc();
    let mut tx = begin_immediate_logged(pool, operation).await?;

    let section = upsert_section(&mut tx, user_id, module_id, section_id, write, now).await?;
    let completion = module_completion(&mut tx, user_id, module_id).await?;
    sync_enrollment(&mut tx, user_id, module_id, completion.progress, now).await?;

    commit_logged(tx, operation).await?;

    info!(
        module_id,
        completed_sections = completion.completed_sections,
        total_sections = completion.total_sections,
        progress = completion.progress,
        "Module progress recomputed"
    );

    Ok(ProgressUpdate {
        section: SectionProgress::from(section),
        completion,
    })
}

#[instrument(skip(pool))]
pub async fn record_section_progress(
    pool: &Pool<Sqlite>,
    user_id: i64,
    module_id: i64,
    section_id: &str,
    completed: bool,
) -> Result<ProgressUpdate, AppError> {
    info!("Recording section progress");
    write_progress(
        pool,
        "record_section_progress",
        user_id,
        module_id,
        section_id,
        SectionWrite::Completion { completed },
    )
    .await
}

#[instrument(skip(pool))]
pub async fn record_quiz_completion(
    pool: &Pool<Sqlite>,
    user_id: i64,
    module_id: i64,
    quiz_id: &str,
    score: Option<i64>,
) -> Result<ProgressUpdate, AppError> {
    info!("Recording quiz completion");
    write_progress(
        pool,
        "record_quiz_completion",
        user_id,
        module_id,
        &quiz_section_id(quiz_id),
        SectionWrite::QuizPassed {
            score: score.unwrap_or(DEFAULT_QUIZ_SCORE),
        },
    )
    .await
}

#[instrument(skip(pool))]
pub async fn record_learning_time(
    pool: &Pool<Sqlite>,
    user_id: i64,
    module_id: i64,
    section_id: &str,
    seconds: i64,
) -> Result<ProgressUpdate, AppError> {
    info!("Recording learning time");
    write_progress(
        pool,
        "record_learning_time",
        user_id,
        module_id,
        section_id,
        SectionWrite::Time { seconds },
    )
    .await
}

#[instrument(skip(pool))]
pub async fn get_module_progress(
    pool: &Pool<Sqlite>,
    user_id: i64,
    module_id: i64,
) -> Result<ModuleProgressReport, AppError> {
    info!("Getting module progress");
    let mut conn = pool.acquire().await?;

    let rows = sqlx::query_as::<_, DbSectionProgress>(&format!(
        "SELECT {} FROM module_progress
         WHERE user_id = ? AND module_id = ?
         ORDER BY section_id",
        PROGRESS_COLUMNS
    ))
    .bind(user_id)
    .bind(module_id)
    .fetch_all(&mut *conn)
    .await?;

    let completion = module_completion(&mut conn, user_id, module_id).await?;

    Ok(ModuleProgressReport {
        completion,
        sections: rows.into_iter().map(SectionProgress::from).collect(),
    })
}

#[instrument(skip(pool))]
pub async fn get_section_rows(
    pool: &Pool<Sqlite>,
    user_id: i64,
    module_id: i64,
    section_id: &str,
) -> Result<Vec<SectionProgress>, AppError> {
    let rows = sqlx::query_as::<_, DbSectionProgress>(&format!(
        "SELECT {} FROM module_progress
         WHERE user_id = ? AND module_id = ? AND section_id = ?",
        PROGRESS_COLUMNS
    ))
    .bind(user_id)
    .bind(module_id)
    .bind(section_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(SectionProgress::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_enrollments(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<Enrollment>, AppError> {
    info!("Getting enrollments");
    let rows = sqlx::query_as::<_, DbEnrollment>(&format!(
        "SELECT {} FROM course_enrollments WHERE user_id = ? ORDER BY module_id",
        ENROLLMENT_COLUMNS
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(Enrollment::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_enrollment(
    pool: &Pool<Sqlite>,
    user_id: i64,
    module_id: i64,
) -> Result<Option<Enrollment>, AppError> {
    let row = sqlx::query_as::<_, DbEnrollment>(&format!(
        "SELECT {} FROM course_enrollments WHERE user_id = ? AND module_id = ?",
        ENROLLMENT_COLUMNS
    ))
    .bind(user_id)
    .bind(module_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(Enrollment::from))
}

#[instrument(skip(pool))]
pub async fn get_user_metrics(pool: &Pool<Sqlite>, user_id: i64) -> Result<UserMetrics, AppError> {
    info!("Computing user metrics");

    #[derive(sqlx::FromRow)]
    struct DbUserMetrics {
        modules_started: i64,
        modules_completed: i64,
        sections_completed: i64,
        total_time_spent: i64,
        quiz_questions_answered: i64,
        quiz_correct: i64,
        achievements_earned: i64,
    }

    let row = sqlx::query_as::<_, DbUserMetrics>(
        "SELECT
             (SELECT COUNT(*) FROM course_enrollments WHERE user_id = ?) AS modules_started,
             (SELECT COUNT(*) FROM course_enrollments WHERE user_id = ? AND progress >= 100)
                 AS modules_completed,
             (SELECT COUNT(*) FROM module_progress WHERE user_id = ? AND completed = TRUE)
                 AS sections_completed,
             (SELECT COALESCE(SUM(time_spent), 0) FROM module_progress WHERE user_id = ?)
                 AS total_time_spent,
             (SELECT COUNT(*) FROM user_quiz_responses WHERE user_id = ?)
                 AS quiz_questions_answered,
             (SELECT COUNT(*) FROM user_quiz_responses WHERE user_id = ? AND is_correct = TRUE)
                 AS quiz_correct,
             (SELECT COUNT(*) FROM user_achievements WHERE user_id = ?) AS achievements_earned",
    )
    .bind(user_id)
    .bind(user_id)
    .bind(user_id)
    .bind(user_id)
    .bind(user_id)
    .bind(user_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(UserMetrics {
        modules_started: row.modules_started,
        modules_completed: row.modules_completed,
        sections_completed: row.sections_completed,
        total_time_spent: row.total_time_spent,
        quiz_questions_answered: row.quiz_questions_answered,
        quiz_accuracy: completion_percentage(row.quiz_correct, row.quiz_questions_answered),
        achievements_earned: row.achievements_earned,
    })
}
