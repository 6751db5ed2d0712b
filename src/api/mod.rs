use rocket::Request;
use rocket::serde::json::Json;

use crate::error::{ErrorResponse, INTERNAL_ERROR_MESSAGE};

pub mod account;
pub mod achievements;
pub mod admin;
pub mod catalog;
pub mod glossary;
pub mod progress;
pub mod wallet;

pub fn routes() -> Vec<rocket::Route> {
    routes![
        account::health,
        account::signup,
        account::login,
        account::logout,
        account::me,
        account::update_profile,
        progress::update_progress,
        progress::quiz_complete,
        progress::track_time,
        progress::list_progress,
        progress::module_progress,
        progress::user_metrics,
        achievements::list_achievements,
        achievements::earned_achievements,
        achievements::check_module_completion,
        achievements::award_achievement,
        catalog::list_modules,
        catalog::get_module,
        catalog::module_quizzes,
        catalog::answer_quiz,
        catalog::quiz_summary,
        wallet::get_wallet,
        wallet::list_transactions,
        wallet::create_transaction,
        glossary::list_terms,
        glossary::get_term,
        admin::create_module,
        admin::create_achievement,
        admin::create_quiz,
        admin::create_glossary_term,
        admin::list_users,
        admin::stats,
        admin::award_to_user,
    ]
}

pub fn catchers() -> Vec<rocket::Catcher> {
    catchers![
        bad_request,
        unauthorized,
        forbidden,
        not_found,
        unprocessable,
        internal_error
    ]
}

#[catch(400)]
fn bad_request(_req: &Request) -> Json<ErrorResponse> {
    Json(ErrorResponse::new("Bad request"))
}

#[catch(401)]
fn unauthorized(_req: &Request) -> Json<ErrorResponse> {
    Json(ErrorResponse::new("Unauthorized"))
}

#[catch(403)]
fn forbidden(_req: &Request) -> Json<ErrorResponse> {
    Json(ErrorResponse::new("Forbidden"))
}

#[catch(404)]
fn not_found(req: &Request) -> Json<ErrorResponse> {
    Json(ErrorResponse::new(&format!("No resource at {}", req.uri().path())))
}

// Rocket answers malformed JSON bodies with 422 before a handler runs.
#[catch(422)]
fn unprocessable(_req: &Request) -> Json<ErrorResponse> {
    Json(ErrorResponse::new("Malformed request body"))
}

#[catch(500)]
fn internal_error(_req: &Request) -> Json<ErrorResponse> {
    Json(ErrorResponse::new(INTERNAL_ERROR_MESSAGE))
}
