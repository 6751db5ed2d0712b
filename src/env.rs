use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::{info, warn};

use crate::database::{DestructiveGuard, PoolSettings};
use crate::error::AppError;

pub fn is_production() -> bool {
    dotenvy::var("ROCKET_PROFILE").unwrap_or("development".to_string()) == "production"
}

/// Outcome of loading env files. Loading runs before the tracing
/// subscriber exists, so it is logged afterwards through [`EnvReport::log`].
#[derive(Debug, Default, PartialEq)]
pub struct EnvReport {
    pub loaded: Vec<String>,
    pub missing: Vec<String>,
}

impl EnvReport {
    pub fn log(&self) {
        for path in &self.loaded {
            info!("Loaded environment from: {}", path);
        }
        for path in &self.missing {
            warn!("Environment file {} not found, skipped", path);
        }
    }
}

pub fn load_environment() -> Result<EnvReport, AppError> {
    let env_files = if is_production() {
        ["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        ["config/common.env", "config/dev.env", ".secrets.env"]
    };

    load_env_files(&env_files)
}

/// Loads each existing file in order, later files overriding earlier ones.
pub fn load_env_files<P: AsRef<Path>>(paths: &[P]) -> Result<EnvReport, AppError> {
    let mut report = EnvReport::default();

    for path in paths {
        let path = path.as_ref();
        let name = path.display().to_string();
        if !path.exists() {
            report.missing.push(name);
            continue;
        }

        dotenvy::from_filename_override(path)
            .map_err(|e| AppError::Config(format!("Failed to load {}: {}", name, e)))?;
        report.loaded.push(name);
    }

    Ok(report)
}

/// Service settings that are not Rocket's own.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub pool: PoolSettings,
    pub guard: DestructiveGuard,
    pub session_ttl_hours: i64,
    pub quiz_pass_threshold: i64,
    pub wallet_starting_balance: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://sulla.db?mode=rwc".to_string(),
            pool: PoolSettings::default(),
            guard: DestructiveGuard::new(false, PathBuf::from(".backup-verified")),
            session_ttl_hours: 24,
            quiz_pass_threshold: 70,
            wallet_starting_balance: 10_000.0,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let pool = PoolSettings {
            max_connections: parse_var("DB_MAX_CONNECTIONS", defaults.pool.max_connections)?,
            idle_timeout: Duration::from_secs(parse_var(
                "DB_IDLE_TIMEOUT_SECS",
                defaults.pool.idle_timeout.as_secs(),
            )?),
            acquire_timeout: Duration::from_secs(parse_var(
                "DB_ACQUIRE_TIMEOUT_SECS",
                defaults.pool.acquire_timeout.as_secs(),
            )?),
        };

        let marker = dotenvy::var("BACKUP_MARKER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| defaults.guard.backup_marker().to_path_buf());

        let quiz_pass_threshold = parse_var("QUIZ_PASS_THRESHOLD", defaults.quiz_pass_threshold)?;
        if !(0..=100).contains(&quiz_pass_threshold) {
            return Err(AppError::Config(format!(
                "QUIZ_PASS_THRESHOLD must be between 0 and 100, got {}",
                quiz_pass_threshold
            )));
        }

        let session_ttl_hours = parse_var("SESSION_TTL_HOURS", defaults.session_ttl_hours)?;
        if session_ttl_hours <= 0 {
            return Err(AppError::Config(
                "SESSION_TTL_HOURS must be positive".to_string(),
            ));
        }

        Ok(Self {
            database_url: dotenvy::var("DATABASE_URL").unwrap_or(defaults.database_url),
            pool,
            guard: DestructiveGuard::new(is_production(), marker),
            session_ttl_hours,
            quiz_pass_threshold,
            wallet_starting_balance: parse_var(
                "WALLET_STARTING_BALANCE",
                defaults.wallet_starting_balance,
            )?,
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match dotenvy::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}
