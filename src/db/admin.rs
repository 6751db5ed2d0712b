use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use crate::error::AppError;
use crate::models::{AdminUserSummary, PlatformStats};

#[instrument]
pub async fn list_user_summaries(
    pool: &Pool<Sqlite>,
) -> Result<Vec<AdminUserSummary>, AppError> {
    info!("Listing user summaries");
    let rows = sqlx::query_as::<_, AdminUserSummary>(
        "SELECT u.id, u.username, u.display_name, u.role,
                (SELECT COUNT(*) FROM course_enrollments e WHERE e.user_id = u.id)
                    AS modules_started,
                (SELECT COUNT(*) FROM course_enrollments e
                    WHERE e.user_id = u.id AND e.completed_at IS NOT NULL)
                    AS modules_completed,
                (SELECT COUNT(*) FROM user_achievements ua WHERE ua.user_id = u.id)
                    AS achievements_earned
         FROM users u
         ORDER BY u.username",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

#[instrument]
pub async fn platform_stats(pool: &Pool<Sqlite>) -> Result<PlatformStats, AppError> {
    info!("Computing platform stats");
    let (users, enrollments, completed_modules, achievements_awarded, quiz_responses, total_time_spent): (
        i64,
        i64,
        i64,
        i64,
        i64,
        i64,
    ) = sqlx::query_as(
        "SELECT
             (SELECT COUNT(*) FROM users),
             (SELECT COUNT(*) FROM course_enrollments),
             (SELECT COUNT(*) FROM course_enrollments WHERE completed_at IS NOT NULL),
             (SELECT COUNT(*) FROM user_achievements),
             (SELECT COUNT(*) FROM user_quiz_responses),
             (SELECT COALESCE(SUM(time_spent), 0) FROM module_progress)",
    )
    .fetch_one(pool)
    .await?;

    Ok(PlatformStats {
        users,
        enrollments,
        completed_modules,
        achievements_awarded,
        quiz_responses,
        total_time_spent,
    })
}
