use rocket::Request;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use sqlx::SqlitePool;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::db::{get_session_by_token, get_user};

use super::User;

pub const SESSION_COOKIE: &str = "session_token";

/// Resolves a session token to its user. Unknown and expired sessions are
/// 401; failing to load the user behind a live session is a 500.
async fn resolve_session(pool: &SqlitePool, token: &str) -> Result<User, Status> {
    let session = get_session_by_token(pool, token).await.map_err(|err| {
        warn!(error = %err, "Rejected session token");
        Status::Unauthorized
    })?;

    if !session.is_valid() {
        warn!(user_id = session.user_id, "Session expired");
        return Err(Status::Unauthorized);
    }

    get_user(pool, session.user_id).await.map_err(|err| {
        error!(user_id = session.user_id, error = %err, "No user behind live session");
        Status::InternalServerError
    })
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for User {
    type Error = ();

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let span = info_span!("session_guard", path = %request.uri().path());
        authenticate(request).instrument(span).await
    }
}

async fn authenticate(request: &Request<'_>) -> Outcome<User, ()> {
    let Some(cookie) = request.cookies().get_private(SESSION_COOKIE) else {
        debug!("Request carries no session cookie");
        return Outcome::Error((Status::Unauthorized, ()));
    };

    let Some(pool) = request.rocket().state::<SqlitePool>() else {
        error!("SQLite pool is not managed by this Rocket instance");
        return Outcome::Error((Status::InternalServerError, ()));
    };

    match resolve_session(pool, cookie.value()).await {
        Ok(user) => {
            debug!(user_id = user.id, role = user.role.as_str(), "Session accepted");
            Outcome::Success(user)
        }
        Err(status) => Outcome::Error((status, ())),
    }
}
