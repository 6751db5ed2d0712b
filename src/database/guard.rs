use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::AppError;

/// Decides whether destructive database operations (dropping tables, columns
/// or indices) may run. Outside production they always may; in production
/// only once a backup has been verified and its marker file written.
#[derive(Debug, Clone)]
pub struct DestructiveGuard {
    production: bool,
    backup_marker: PathBuf,
}

impl DestructiveGuard {
    pub fn new(production: bool, backup_marker: impl Into<PathBuf>) -> Self {
        Self {
            production,
            backup_marker: backup_marker.into(),
        }
    }

    pub fn backup_marker(&self) -> &Path {
        &self.backup_marker
    }

    pub fn permits_destructive(&self) -> bool {
        !self.production || self.backup_marker.exists()
    }

    pub fn check(&self, operation: &str) -> Result<(), AppError> {
        if self.permits_destructive() {
            if self.production {
                info!(
                    operation = %operation,
                    marker = %self.backup_marker.display(),
                    "Backup marker present, allowing destructive operation"
                );
            }
            return Ok(());
        }

        warn!(
            operation = %operation,
            marker = %self.backup_marker.display(),
            "Refusing destructive operation in production without a verified backup"
        );
        Err(AppError::Internal(format!(
            "Destructive operation '{}' refused: backup marker {} not found",
            operation,
            self.backup_marker.display()
        )))
    }
}
