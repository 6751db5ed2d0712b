use rocket::State;
use rocket::serde::json::Json;
use sqlx::{Pool, Sqlite};

use crate::auth::User;
use crate::db::{self, GlossaryFilter};
use crate::error::AppError;
use crate::models::GlossaryTerm;

#[get("/glossary?<category>&<difficulty>&<search>")]
pub async fn list_terms(
    category: Option<&str>,
    difficulty: Option<&str>,
    search: Option<&str>,
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<Vec<GlossaryTerm>>, AppError> {
    let filter = GlossaryFilter {
        category,
        difficulty,
        search,
    };
    Ok(Json(db::list_terms(db, filter).await?))
}

#[get("/glossary/<term>")]
pub async fn get_term(
    term: &str,
    _user: User,
    db: &State<Pool<Sqlite>>,
) -> Result<Json<GlossaryTerm>, AppError> {
    Ok(Json(db::get_term(db, term).await?))
}
