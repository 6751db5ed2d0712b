use std::time::Duration;

use rocket::tokio;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{error, info};

use sulla::database::{CURRENT_SCHEMA, connect_pool, migrate_database_declaratively};
use sulla::db::clean_expired_sessions;
use sulla::env::{AppConfig, load_environment};
use sulla::error::AppError;
use sulla::init_rocket;
use sulla::telemetry::init_tracing;

const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Rocket(Box<rocket::Error>),
    #[error("Application error: {0}")]
    App(#[from] AppError),
}

impl From<rocket::Error> for Error {
    fn from(value: rocket::Error) -> Self {
        Error::Rocket(Box::new(value))
    }
}

fn spawn_session_sweeper(pool: SqlitePool) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;

        loop {
            match clean_expired_sessions(&pool).await {
                Ok(count) if count > 0 => info!("Cleaned up {} expired sessions", count),
                Ok(_) => {}
                Err(e) => error!("Failed to clean expired sessions: {}", e),
            }

            tokio::time::sleep(SESSION_SWEEP_INTERVAL).await;
        }
    });
}

#[rocket::main]
async fn main() -> Result<(), Error> {
    let env_report = load_environment()?;
    let _telemetry = init_tracing()?;
    env_report.log();

    let config = AppConfig::from_env()?;
    let pool = connect_pool(&config.database_url, &config.pool).await?;

    info!("Running declarative database migration");
    let changed =
        migrate_database_declaratively(pool.clone(), CURRENT_SCHEMA, config.guard.clone()).await?;
    info!(changed, "Database schema is up to date");

    spawn_session_sweeper(pool.clone());

    init_rocket(pool, config).await.launch().await?;
    Ok(())
}
