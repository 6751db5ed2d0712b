use chrono::Utc;
use serde_json::Value;
use sqlx::{Pool, Sqlite, SqliteConnection};
use tracing::{info, instrument};

use super::{conflict_or_database, module_completion};
use crate::database::{begin_immediate_logged, begin_logged, commit_logged};
use crate::error::AppError;
use crate::models::{
    Achievement, AchievementKind, AwardMetadata, AwardSource, DbAchievement,
    DbEarnedAchievement, DbUserAchievement, EarnedAchievement, UserAchievement,
};

pub const ALREADY_EARNED_MESSAGE: &str = "Achievement already earned";

const ACHIEVEMENT_COLUMNS: &str = "id, name, description, criteria, kind, image_url";

const USER_ACHIEVEMENT_COLUMNS: &str = "id, user_id, achievement_id, earned_at, metadata";

#[instrument]
pub async fn list_achievements(pool: &Pool<Sqlite>) -> Result<Vec<Achievement>, AppError> {
    info!("Listing achievements");
    let rows = sqlx::query_as::<_, DbAchievement>(&format!(
        "SELECT {} FROM achievements ORDER BY name",
        ACHIEVEMENT_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(Achievement::try_from).collect()
}

#[instrument]
pub async fn get_achievement(
    pool: &Pool<Sqlite>,
    achievement_id: i64,
) -> Result<Achievement, AppError> {
    let row = sqlx::query_as::<_, DbAchievement>(&format!(
        "SELECT {} FROM achievements WHERE id = ?",
        ACHIEVEMENT_COLUMNS
    ))
    .bind(achievement_id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Achievement::try_from(row),
        None => Err(AppError::NotFound(format!(
            "Achievement {} not found",
            achievement_id
        ))),
    }
}

#[instrument(skip(pool, criteria))]
pub async fn create_achievement(
    pool: &Pool<Sqlite>,
    name: &str,
    description: &str,
    criteria: &Value,
    kind: AchievementKind,
    image_url: Option<&str>,
) -> Result<Achievement, AppError> {
    info!("Creating achievement");
    let res = sqlx::query(
        "INSERT INTO achievements (name, description, criteria, kind, image_url)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(name)
    .bind(description)
    .bind(serde_json::to_string(criteria)?)
    .bind(kind.as_str())
    .bind(image_url)
    .execute(pool)
    .await
    .map_err(|e| conflict_or_database(e, "An achievement with that name already exists"))?;

    get_achievement(pool, res.last_insert_rowid()).await
}

#[instrument(skip(pool))]
pub async fn get_earned_achievements(
    pool: &Pool<Sqlite>,
    user_id: i64,
) -> Result<Vec<EarnedAchievement>, AppError> {
    info!("Getting earned achievements");
    let rows = sqlx::query_as::<_, DbEarnedAchievement>(
        "SELECT ua.id, ua.user_id, ua.achievement_id, ua.earned_at, ua.metadata,
                a.name, a.description, a.criteria, a.kind, a.image_url
         FROM user_achievements ua
         JOIN achievements a ON a.id = ua.achievement_id
         WHERE ua.user_id = ?
         ORDER BY ua.earned_at DESC, ua.id DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(EarnedAchievement::try_from).collect()
}

async fn find_module_certificate(
    conn: &mut SqliteConnection,
    module_id: i64,
) -> Result<Option<Achievement>, AppError> {
    let row = sqlx::query_as::<_, DbAchievement>(&format!(
        "SELECT {} FROM achievements
         WHERE kind = 'certificate'
           AND CAST(json_extract(criteria, '$.moduleId') AS INTEGER) = ?
         ORDER BY id
         LIMIT 1",
        ACHIEVEMENT_COLUMNS
    ))
    .bind(module_id)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(Achievement::try_from).transpose()
}

/// Inserts the award unless the user already holds it. `None` means the
/// pair already existed.
async fn insert_award(
    conn: &mut SqliteConnection,
    user_id: i64,
    achievement: &Achievement,
    metadata: &AwardMetadata,
) -> Result<Option<UserAchievement>, AppError> {
    let row = sqlx::query_as::<_, DbUserAchievement>(&format!(
        "INSERT INTO user_achievements (user_id, achievement_id, earned_at, metadata)
         VALUES (?, ?, ?, ?)
         ON CONFLICT (user_id, achievement_id) DO NOTHING
         RETURNING {}",
        USER_ACHIEVEMENT_COLUMNS
    ))
    .bind(user_id)
    .bind(achievement.id)
    .bind(Utc::now().naive_utc())
    .bind(serde_json::to_string(metadata)?)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(UserAchievement::from))
}

fn award_metadata(
    achievement: &Achievement,
    source: AwardSource,
    module_id: Option<i64>,
) -> AwardMetadata {
    AwardMetadata {
        source,
        module_id,
        achievement_name: achievement.name.clone(),
        description: achievement.description.clone(),
    }
}

/// Awards the module's certificate when every known section of the module
/// is complete. Returns the award only when it was granted by this call.
#[instrument(skip(pool))]
pub async fn check_module_completion(
    pool: &Pool<Sqlite>,
    user_id: i64,
    module_id: i64,
) -> Result<Option<EarnedAchievement>, AppError> {
    info!("Checking module completion");
    // Reads before it writes, so it must hold the write lock from the start.
    let mut tx = begin_immediate_logged(pool, "check_module_completion").await?;

    let completion = module_completion(&mut tx, user_id, module_id).await?;
    if !completion.is_complete() {
        info!(
            completed_sections = completion.completed_sections,
            total_sections = completion.total_sections,
            "Module not complete, no certificate awarded"
        );
        commit_logged(tx, "check_module_completion").await?;
        return Ok(None);
    }

    let Some(achievement) = find_module_certificate(&mut tx, module_id).await? else {
        info!("No certificate defined for module");
        commit_logged(tx, "check_module_completion").await?;
        return Ok(None);
    };

    let metadata = award_metadata(&achievement, AwardSource::ModuleCompletion, Some(module_id));
    let award = insert_award(&mut tx, user_id, &achievement, &metadata).await?;
    commit_logged(tx, "check_module_completion").await?;

    match award {
        Some(award) => {
            info!(achievement_id = achievement.id, "Module certificate awarded");
            Ok(Some(EarnedAchievement { award, achievement }))
        }
        None => {
            info!(achievement_id = achievement.id, "Module certificate already held");
            Ok(None)
        }
    }
}

/// Grants an achievement directly. Holding it already is a validation error.
#[instrument(skip(pool))]
pub async fn award_achievement(
    pool: &Pool<Sqlite>,
    user_id: i64,
    achievement_id: i64,
    source: AwardSource,
) -> Result<UserAchievement, AppError> {
    info!("Awarding achievement");
    let achievement = get_achievement(pool, achievement_id).await?;
    let metadata = award_metadata(&achievement, source, None);

    let mut tx = begin_logged(pool, "award_achievement").await?;
    let award = insert_award(&mut tx, user_id, &achievement, &metadata).await?;
    commit_logged(tx, "award_achievement").await?;

    award.ok_or_else(|| AppError::Validation(ALREADY_EARNED_MESSAGE.to_string()))
}
