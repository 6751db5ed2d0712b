#[macro_use]
extern crate rocket;

pub mod api;
pub mod auth;
pub mod client;
pub mod database;
pub mod db;
pub mod env;
pub mod error;
pub mod models;
pub mod telemetry;
pub mod validation;
#[cfg(test)]
mod test;

use rocket::{Build, Rocket};
use sqlx::SqlitePool;
use tracing::info;

use env::AppConfig;
use telemetry::TelemetryFairing;

pub async fn init_rocket(pool: SqlitePool, config: AppConfig) -> Rocket<Build> {
    info!("Starting sulla");

    rocket::build()
        .manage(pool)
        .manage(config)
        .mount("/api", api::routes())
        .register("/api", api::catchers())
        .attach(TelemetryFairing)
}
