use std::path::Path;

use anyhow::Context;

use sulla::database::{CURRENT_SCHEMA, DestructiveChange, SchemaMigrator, connect_pool};
use sulla::env::{AppConfig, load_environment};

/// Reports destructive changes the declared schema would make to the
/// database at `DATABASE_URL` without applying anything. `SCHEMA_PATH`
/// overrides the built-in schema.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_report = load_environment()?;
    for path in &env_report.missing {
        eprintln!("Environment file {} not found, skipped", path);
    }
    let config = AppConfig::from_env()?;

    let schema = match std::env::var("SCHEMA_PATH") {
        Ok(path) => std::fs::read_to_string(Path::new(&path))
            .with_context(|| format!("Failed to read schema file {}", path))?,
        Err(_) => CURRENT_SCHEMA.to_string(),
    };

    let pool = connect_pool(&config.database_url, &config.pool)
        .await
        .context("Failed to connect to SQLite database")?;

    let migrator = SchemaMigrator::new(pool, &schema, config.guard.clone());
    let diff = migrator.diff().await?;
    let destructive = diff.destructive_changes();

    if destructive.is_empty() {
        println!("Changes passed the check ✓");
        return Ok(());
    }

    println!("Destructive changes detected:");
    for change in &destructive {
        match change {
            DestructiveChange::TableRemoved(table) => println!("    Table removed: {}", table),
            DestructiveChange::IndexRemoved(index) => println!("    Index removed: {}", index),
            DestructiveChange::ColumnRemoved { table, column } => {
                println!("    Column removed from table {}: {}", table, column)
            }
        }
    }

    if !config.guard.permits_destructive() {
        println!(
            "Backup marker {} is missing; startup migration will refuse these changes",
            config.guard.backup_marker().display()
        );
    }

    std::process::exit(1);
}
