use sqlx::{Pool, QueryBuilder, Sqlite};
use tracing::{info, instrument};

use super::conflict_or_database;
use crate::error::AppError;
use crate::models::{DbGlossaryTerm, GlossaryTerm};

const TERM_COLUMNS: &str = "id, term, definition, category, difficulty, related_terms";

#[derive(Debug, Default, Clone)]
pub struct GlossaryFilter<'a> {
    pub category: Option<&'a str>,
    pub difficulty: Option<&'a str>,
    pub search: Option<&'a str>,
}

#[instrument(skip(pool))]
pub async fn list_terms(
    pool: &Pool<Sqlite>,
    filter: GlossaryFilter<'_>,
) -> Result<Vec<GlossaryTerm>, AppError> {
    info!("Listing glossary terms");
    let mut query: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT {} FROM glossary_terms WHERE 1 = 1", TERM_COLUMNS));

    if let Some(category) = filter.category {
        query.push(" AND category = ").push_bind(category);
    }
    if let Some(difficulty) = filter.difficulty {
        query.push(" AND difficulty = ").push_bind(difficulty);
    }
    if let Some(search) = filter.search.filter(|s| !s.trim().is_empty()) {
        let pattern = format!("%{}%", search.trim());
        query
            .push(" AND (term LIKE ")
            .push_bind(pattern.clone())
            .push(" OR definition LIKE ")
            .push_bind(pattern)
            .push(")");
    }
    query.push(" ORDER BY term COLLATE NOCASE");

    let rows = query
        .build_query_as::<DbGlossaryTerm>()
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(GlossaryTerm::from).collect())
}

#[instrument(skip(pool))]
pub async fn get_term(pool: &Pool<Sqlite>, term: &str) -> Result<GlossaryTerm, AppError> {
    info!("Fetching glossary term");
    let row = sqlx::query_as::<_, DbGlossaryTerm>(&format!(
        "SELECT {} FROM glossary_terms WHERE term = ? COLLATE NOCASE",
        TERM_COLUMNS
    ))
    .bind(term)
    .fetch_optional(pool)
    .await?;

    row.map(GlossaryTerm::from)
        .ok_or_else(|| AppError::NotFound(format!("Glossary term '{}' not found", term)))
}

#[instrument(skip(pool, definition, related_terms))]
pub async fn create_term(
    pool: &Pool<Sqlite>,
    term: &str,
    definition: &str,
    category: &str,
    difficulty: &str,
    related_terms: &[String],
) -> Result<GlossaryTerm, AppError> {
    info!("Creating glossary term");
    let row = sqlx::query_as::<_, DbGlossaryTerm>(&format!(
        "INSERT INTO glossary_terms (term, definition, category, difficulty, related_terms)
         VALUES (?, ?, ?, ?, ?)
         RETURNING {}",
        TERM_COLUMNS
    ))
    .bind(term)
    .bind(definition)
    .bind(category)
    .bind(difficulty)
    .bind(serde_json::to_string(related_terms)?)
    .fetch_one(pool)
    .await
    .map_err(|e| conflict_or_database(e, "Glossary term already exists"))?;

    Ok(GlossaryTerm::from(row))
}
