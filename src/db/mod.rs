pub mod achievements;
pub mod admin;
pub mod catalog;
pub mod glossary;
pub mod progress;
pub mod quizzes;
pub mod users;
pub mod wallet;

pub use achievements::*;
pub use admin::*;
pub use catalog::*;
pub use glossary::*;
pub use progress::*;
pub use quizzes::*;
pub use users::*;
pub use wallet::*;

use crate::error::AppError;

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

/// Maps a UNIQUE violation to `AppError::Conflict`, anything else to a
/// database error.
pub(crate) fn conflict_or_database(err: sqlx::Error, message: &str) -> AppError {
    if is_unique_violation(&err) {
        AppError::Conflict(message.to_string())
    } else {
        AppError::Database(err)
    }
}
