use std::collections::{HashMap, HashSet};
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Connection, Pool, Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::{info, instrument, warn};

use super::DestructiveGuard;
use crate::error::AppError;

static COMMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"--[^\n]*(\n|$)").expect("comment pattern is valid"));
static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));
static PUNCTUATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r" *([(),]) *").expect("punctuation pattern is valid"));
static QUOTED_IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""(\w+)""#).expect("identifier pattern is valid"));

/// Reduces a `CREATE` statement to a canonical form so that formatting
/// differences do not register as schema changes.
pub fn normalize_sql(sql: &str) -> String {
    let sql = COMMENT_RE.replace_all(sql, " ");
    let sql = WHITESPACE_RE.replace_all(&sql, " ");
    let sql = PUNCTUATION_RE.replace_all(&sql, "$1");
    let sql = QUOTED_IDENT_RE.replace_all(&sql, "$1");
    sql.trim().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableChange {
    pub name: String,
    pub removed_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestructiveChange {
    TableRemoved(String),
    ColumnRemoved { table: String, column: String },
    IndexRemoved(String),
}

impl fmt::Display for DestructiveChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DestructiveChange::TableRemoved(table) => write!(f, "drop table {}", table),
            DestructiveChange::ColumnRemoved { table, column } => {
                write!(f, "drop column {}.{}", table, column)
            }
            DestructiveChange::IndexRemoved(index) => write!(f, "drop index {}", index),
        }
    }
}

/// Difference between the live database and the declared schema.
#[derive(Debug, Default, Clone)]
pub struct SchemaDiff {
    pub new_tables: Vec<String>,
    pub removed_tables: Vec<String>,
    pub modified_tables: Vec<TableChange>,
    pub new_indices: Vec<String>,
    pub removed_indices: Vec<String>,
    pub changed_indices: Vec<String>,
}

impl SchemaDiff {
    pub fn is_empty(&self) -> bool {
        self.new_tables.is_empty()
            && self.removed_tables.is_empty()
            && self.modified_tables.is_empty()
            && self.new_indices.is_empty()
            && self.removed_indices.is_empty()
            && self.changed_indices.is_empty()
    }

    pub fn destructive_changes(&self) -> Vec<DestructiveChange> {
        let mut changes: Vec<DestructiveChange> = self
            .removed_tables
            .iter()
            .cloned()
            .map(DestructiveChange::TableRemoved)
            .collect();

        for table in &self.modified_tables {
            for column in &table.removed_columns {
                changes.push(DestructiveChange::ColumnRemoved {
                    table: table.name.clone(),
                    column: column.clone(),
                });
            }
        }

        changes.extend(
            self.removed_indices
                .iter()
                .cloned()
                .map(DestructiveChange::IndexRemoved),
        );

        changes
    }
}

#[derive(Debug, Default)]
struct SchemaSnapshot {
    tables: HashMap<String, String>,
    indices: HashMap<String, String>,
}

pub struct SchemaMigrator {
    pool: Pool<Sqlite>,
    target_schema: String,
    guard: DestructiveGuard,
    changes_applied: u32,
}

impl SchemaMigrator {
    pub fn new(pool: Pool<Sqlite>, target_schema: &str, guard: DestructiveGuard) -> Self {
        Self {
            pool,
            target_schema: target_schema.to_string(),
            guard,
            changes_applied: 0,
        }
    }

    /// Computes what `migrate` would do without touching the database.
    #[instrument(skip(self))]
    pub async fn diff(&self) -> Result<SchemaDiff, AppError> {
        let pristine = pristine_pool(&self.target_schema).await?;
        let mut conn = self.pool.acquire().await?;
        diff_between(&mut conn, &pristine).await
    }

    /// Brings the live database in line with the declared schema. Returns
    /// whether anything changed.
    #[instrument(skip(self))]
    pub async fn migrate(&mut self) -> Result<bool, AppError> {
        info!("Starting declarative database migration");
        let pristine = pristine_pool(&self.target_schema).await?;

        // Rebuilding a table drops it, which would cascade deletes into
        // dependent tables unless enforcement is off for the duration.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&mut *conn)
            .await?;

        let result = self.migrate_on(&mut conn, &pristine).await;

        sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&mut *conn)
            .await?;
        drop(conn);

        let changed = result?;
        if changed {
            info!("Running VACUUM after migration");
            sqlx::query("VACUUM").execute(&self.pool).await?;
        }

        info!(
            "Migration completed. Schema changes made: {}",
            self.changes_applied
        );
        Ok(changed)
    }

    async fn migrate_on(
        &mut self,
        conn: &mut SqliteConnection,
        pristine: &SqlitePool,
    ) -> Result<bool, AppError> {
        let mut tx = conn.begin().await?;

        let diff = diff_between(&mut tx, pristine).await?;
        if diff.is_empty() {
            tx.commit().await?;
            info!("No schema changes needed");
            return Ok(false);
        }

        let destructive = diff.destructive_changes();
        if !destructive.is_empty() {
            let summary = destructive
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            warn!(changes = %summary, "Schema migration contains destructive changes");
            self.guard.check(&format!("schema migration ({})", summary))?;
        }

        self.apply(&mut tx, pristine, &diff).await?;

        let violations = sqlx::query("PRAGMA foreign_key_check")
            .fetch_all(&mut *tx)
            .await?;
        if !violations.is_empty() {
            return Err(AppError::Internal(format!(
                "Migration left {} foreign key violations",
                violations.len()
            )));
        }

        tx.commit().await?;
        Ok(self.changes_applied > 0)
    }

    async fn apply(
        &mut self,
        conn: &mut SqliteConnection,
        pristine: &SqlitePool,
        diff: &SchemaDiff,
    ) -> Result<(), AppError> {
        let target = snapshot(pristine).await?;

        for table in &diff.new_tables {
            if let Some(sql) = target.tables.get(table) {
                self.execute_schema_change(&format!("Create new table {}", table), sql, conn)
                    .await?;
            }
        }

        for table in &diff.modified_tables {
            if let Some(sql) = target.tables.get(&table.name) {
                self.rebuild_table(conn, pristine, &table.name, sql).await?;
            }
        }

        for table in &diff.removed_tables {
            self.execute_schema_change(
                &format!("Drop table {}", table),
                &format!("DROP TABLE \"{}\"", table),
                conn,
            )
            .await?;
        }

        // Rebuilt tables lose their indices, so compare against what is
        // actually there now rather than the initial diff.
        let current = snapshot(&mut *conn).await?;
        for (name, sql) in &current.indices {
            let keep = target
                .indices
                .get(name)
                .is_some_and(|target_sql| normalize_sql(target_sql) == normalize_sql(sql));
            if !keep {
                self.execute_schema_change(
                    &format!("Drop index {}", name),
                    &format!("DROP INDEX \"{}\"", name),
                    conn,
                )
                .await?;
            }
        }

        for (name, sql) in &target.indices {
            let present = current
                .indices
                .get(name)
                .is_some_and(|current_sql| normalize_sql(current_sql) == normalize_sql(sql));
            if !present {
                self.execute_schema_change(&format!("Create index {}", name), sql, conn)
                    .await?;
            }
        }

        Ok(())
    }

    async fn rebuild_table(
        &mut self,
        conn: &mut SqliteConnection,
        pristine: &SqlitePool,
        table: &str,
        target_sql: &str,
    ) -> Result<(), AppError> {
        info!("Rebuilding table: {}", table);

        let temp_name = format!("{}_migration_new", table);
        let temp_sql = target_sql.replacen(
            &format!("CREATE TABLE {}", table),
            &format!("CREATE TABLE {}", temp_name),
            1,
        );
        self.execute_schema_change(
            &format!("Create replacement table for {}", table),
            &temp_sql,
            conn,
        )
        .await?;

        let current_columns = table_columns(&mut *conn, table).await?;
        let target_columns: HashSet<String> = table_columns(pristine, table)
            .await?
            .into_iter()
            .collect();

        let common: Vec<String> = current_columns
            .into_iter()
            .filter(|c| target_columns.contains(c))
            .map(|c| format!("\"{}\"", c))
            .collect();

        if !common.is_empty() {
            let columns = common.join(", ");
            self.execute_schema_change(
                &format!("Copy rows into replacement {}", table),
                &format!(
                    "INSERT INTO \"{}\" ({}) SELECT {} FROM \"{}\"",
                    temp_name, columns, columns, table
                ),
                conn,
            )
            .await?;
        }

        self.execute_schema_change(
            &format!("Drop old table {}", table),
            &format!("DROP TABLE \"{}\"", table),
            conn,
        )
        .await?;

        self.execute_schema_change(
            &format!("Rename replacement to {}", table),
            &format!("ALTER TABLE \"{}\" RENAME TO \"{}\"", temp_name, table),
            conn,
        )
        .await
    }

    async fn execute_schema_change(
        &mut self,
        description: &str,
        sql: &str,
        conn: &mut SqliteConnection,
    ) -> Result<(), AppError> {
        info!("Database migration: {} with SQL:\n{}", description, sql);
        sqlx::query(sql).execute(&mut *conn).await?;
        self.changes_applied += 1;
        Ok(())
    }
}

async fn pristine_pool(target_schema: &str) -> Result<SqlitePool, AppError> {
    // A single connection, otherwise every new connection would see its own
    // empty in-memory database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    if !target_schema.trim().is_empty() {
        sqlx::raw_sql(target_schema)
            .execute(&pool)
            .await
            .map_err(|e| AppError::Internal(format!("Failed to create pristine schema: {}", e)))?;
    }

    Ok(pool)
}

async fn diff_between(
    current_conn: &mut SqliteConnection,
    pristine: &SqlitePool,
) -> Result<SchemaDiff, AppError> {
    let current = snapshot(&mut *current_conn).await?;
    let target = snapshot(pristine).await?;

    let mut diff = SchemaDiff::default();

    for (name, sql) in &target.tables {
        match current.tables.get(name) {
            None => diff.new_tables.push(name.clone()),
            Some(current_sql) if normalize_sql(current_sql) != normalize_sql(sql) => {
                let current_columns = table_columns(&mut *current_conn, name).await?;
                let target_columns: HashSet<String> =
                    table_columns(pristine, name).await?.into_iter().collect();
                diff.modified_tables.push(TableChange {
                    name: name.clone(),
                    removed_columns: current_columns
                        .into_iter()
                        .filter(|c| !target_columns.contains(c))
                        .collect(),
                });
            }
            Some(_) => {}
        }
    }

    diff.removed_tables = current
        .tables
        .keys()
        .filter(|name| !target.tables.contains_key(*name))
        .cloned()
        .collect();

    for (name, sql) in &target.indices {
        match current.indices.get(name) {
            None => diff.new_indices.push(name.clone()),
            Some(current_sql) if normalize_sql(current_sql) != normalize_sql(sql) => {
                diff.changed_indices.push(name.clone())
            }
            Some(_) => {}
        }
    }

    diff.removed_indices = current
        .indices
        .keys()
        .filter(|name| !target.indices.contains_key(*name))
        .cloned()
        .collect();

    diff.new_tables.sort();
    diff.removed_tables.sort();
    diff.modified_tables.sort_by(|a, b| a.name.cmp(&b.name));
    diff.new_indices.sort();
    diff.removed_indices.sort();
    diff.changed_indices.sort();

    Ok(diff)
}

async fn snapshot<'e, E>(executor: E) -> Result<SchemaSnapshot, AppError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        "SELECT type, name, sql FROM sqlite_master
         WHERE type IN ('table', 'index') AND sql IS NOT NULL AND name NOT LIKE 'sqlite_%'",
    )
    .fetch_all(executor)
    .await?;

    let mut snapshot = SchemaSnapshot::default();
    for row in rows {
        let kind: String = row.get(0);
        let name: String = row.get(1);
        let sql: String = row.get(2);
        match kind.as_str() {
            "table" => snapshot.tables.insert(name, sql),
            _ => snapshot.indices.insert(name, sql),
        };
    }
    Ok(snapshot)
}

async fn table_columns<'e, E>(executor: E, table: &str) -> Result<Vec<String>, AppError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(&format!("PRAGMA table_info(\"{}\")", table))
        .fetch_all(executor)
        .await?;

    Ok(rows.into_iter().map(|row| row.get::<String, _>(1)).collect())
}

#[instrument(skip(pool, guard))]
pub async fn migrate_database_declaratively(
    pool: Pool<Sqlite>,
    target_schema: &str,
    guard: DestructiveGuard,
) -> Result<bool, AppError> {
    let mut migrator = SchemaMigrator::new(pool, target_schema, guard);
    migrator.migrate().await
}
