use sqlx::{Pool, Sqlite};
use tracing::{info, instrument};

use super::conflict_or_database;
use crate::database::{begin_logged, commit_logged};
use crate::error::AppError;
use crate::models::{CourseModule, DbCourseModule, ModuleDetail, ModuleSection};

#[derive(Debug, Clone)]
pub struct NewSection {
    pub section_id: String,
    pub title: String,
}

const MODULE_SELECT: &str = "SELECT m.id, m.title, m.description, m.position,
        (SELECT COUNT(*) FROM module_sections s WHERE s.module_id = m.id) AS section_count
     FROM course_modules m";

#[instrument]
pub async fn list_modules(pool: &Pool<Sqlite>) -> Result<Vec<CourseModule>, AppError> {
    info!("Listing course modules");
    let rows = sqlx::query_as::<_, DbCourseModule>(&format!(
        "{} ORDER BY m.position, m.id",
        MODULE_SELECT
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(CourseModule::from).collect())
}

#[instrument]
pub async fn get_module(pool: &Pool<Sqlite>, module_id: i64) -> Result<ModuleDetail, AppError> {
    info!("Fetching course module");
    let row = sqlx::query_as::<_, DbCourseModule>(&format!("{} WHERE m.id = ?", MODULE_SELECT))
        .bind(module_id)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Err(AppError::NotFound(format!("Module {} not found", module_id)));
    };

    let sections = sqlx::query_as::<_, ModuleSection>(
        "SELECT module_id, section_id, title, position FROM module_sections
         WHERE module_id = ?
         ORDER BY position, section_id",
    )
    .bind(module_id)
    .fetch_all(pool)
    .await?;

    Ok(ModuleDetail {
        module: CourseModule::from(row),
        sections,
    })
}

#[instrument(skip(pool, sections))]
pub async fn create_module(
    pool: &Pool<Sqlite>,
    id: Option<i64>,
    title: &str,
    description: &str,
    position: i64,
    sections: &[NewSection],
) -> Result<ModuleDetail, AppError> {
    info!(section_count = sections.len(), "Creating course module");
    let mut tx = begin_logged(pool, "create_module").await?;

    let res = sqlx::query(
        "INSERT INTO course_modules (id, title, description, position) VALUES (?, ?, ?, ?)",
    )
    .bind(id)
    .bind(title)
    .bind(description)
    .bind(position)
    .execute(&mut *tx)
    .await
    .map_err(|e| conflict_or_database(e, "Module already exists"))?;
    let module_id = res.last_insert_rowid();

    for (index, section) in sections.iter().enumerate() {
        sqlx::query(
            "INSERT INTO module_sections (module_id, section_id, title, position)
             VALUES (?, ?, ?, ?)",
        )
        .bind(module_id)
        .bind(&section.section_id)
        .bind(&section.title)
        .bind(index as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_or_database(e, "Duplicate section id in module"))?;
    }

    commit_logged(tx, "create_module").await?;

    get_module(pool, module_id).await
}
