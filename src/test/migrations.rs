#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use rocket::tokio;
    use sqlx::{Row, SqlitePool};
    use tempfile::TempDir;

    use crate::database::{
        CURRENT_SCHEMA, DestructiveChange, DestructiveGuard, SchemaMigrator,
        migrate_database_declaratively, normalize_sql,
    };
    use crate::error::AppError;
    use crate::test::test_db::memory_pool;

    const LEARNERS_SCHEMA: &str = r#"
        CREATE TABLE learners (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL
        );
    "#;

    const LEARNERS_AND_NOTES_SCHEMA: &str = r#"
        CREATE TABLE learners (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL
        );

        CREATE TABLE notes (
            id INTEGER PRIMARY KEY,
            learner_id INTEGER NOT NULL,
            body TEXT NOT NULL,
            FOREIGN KEY (learner_id) REFERENCES learners (id) ON DELETE CASCADE
        );
    "#;

    const LEARNERS_WITH_EMAIL_SCHEMA: &str = r#"
        CREATE TABLE learners (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL,
            email TEXT
        );

        CREATE TABLE notes (
            id INTEGER PRIMARY KEY,
            learner_id INTEGER NOT NULL,
            body TEXT NOT NULL,
            FOREIGN KEY (learner_id) REFERENCES learners (id) ON DELETE CASCADE
        );
    "#;

    const LEARNERS_WITHOUT_USERNAME_SCHEMA: &str = r#"
        CREATE TABLE learners (
            id INTEGER PRIMARY KEY
        );
    "#;

    const LEARNERS_WITH_INDEX_SCHEMA: &str = r#"
        CREATE TABLE learners (
            id INTEGER PRIMARY KEY,
            username TEXT NOT NULL
        );

        CREATE INDEX idx_learners_username ON learners (username);
    "#;

    async fn create_test_db() -> SqlitePool {
        memory_pool()
            .await
            .expect("Failed to create in-memory database")
    }

    fn development_guard() -> DestructiveGuard {
        DestructiveGuard::new(false, PathBuf::from(".backup-verified"))
    }

    /// Production guard whose backup marker was never written.
    fn unverified_production_guard(dir: &TempDir) -> DestructiveGuard {
        DestructiveGuard::new(true, dir.path().join(".backup-verified"))
    }

    fn verified_production_guard(dir: &TempDir) -> DestructiveGuard {
        let marker = dir.path().join(".backup-verified");
        std::fs::write(&marker, "verified").expect("Failed to write backup marker");
        DestructiveGuard::new(true, marker)
    }

    async fn table_names(pool: &SqlitePool) -> Vec<String> {
        sqlx::query(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .fetch_all(pool)
        .await
        .expect("Failed to fetch table names")
        .into_iter()
        .map(|row| row.get::<String, _>(0))
        .collect()
    }

    async fn column_names(pool: &SqlitePool, table: &str) -> Vec<String> {
        sqlx::query(&format!("PRAGMA table_info({})", table))
            .fetch_all(pool)
            .await
            .expect("Failed to fetch columns")
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .collect()
    }

    #[tokio::test]
    async fn test_current_schema_applies_once() {
        let pool = create_test_db().await;

        let changed = migrate_database_declaratively(pool.clone(), CURRENT_SCHEMA, development_guard())
            .await
            .expect("Initial migration failed");
        assert!(changed, "Fresh database should be migrated");

        let tables = table_names(&pool).await;
        for expected in [
            "achievements",
            "course_enrollments",
            "module_progress",
            "user_achievements",
            "users",
            "virtual_wallets",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing table {}", expected);
        }

        let changed = migrate_database_declaratively(pool.clone(), CURRENT_SCHEMA, development_guard())
            .await
            .expect("Second migration failed");
        assert!(!changed, "Re-running the same schema should be a no-op");

        let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(foreign_keys, 1, "Foreign keys must be re-enabled after migrating");
    }

    #[tokio::test]
    async fn test_added_column_keeps_rows_and_children() {
        let pool = create_test_db().await;
        sqlx::raw_sql(LEARNERS_AND_NOTES_SCHEMA)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO learners (id, username) VALUES (1, 'ada')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO notes (learner_id, body) VALUES (1, 'hashes chain blocks')")
            .execute(&pool)
            .await
            .unwrap();

        let changed =
            migrate_database_declaratively(pool.clone(), LEARNERS_WITH_EMAIL_SCHEMA, development_guard())
                .await
                .expect("Migration failed");
        assert!(changed);

        assert!(column_names(&pool, "learners").await.contains(&"email".to_string()));

        let username: String = sqlx::query_scalar("SELECT username FROM learners WHERE id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(username, "ada");

        // Rebuilding the parent must not cascade into its children.
        let notes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM notes")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(notes, 1);
    }

    #[tokio::test]
    async fn test_diff_reports_destructive_changes_without_applying() {
        let pool = create_test_db().await;
        sqlx::raw_sql(LEARNERS_AND_NOTES_SCHEMA)
            .execute(&pool)
            .await
            .unwrap();
        sqlx::raw_sql("CREATE INDEX idx_notes_learner ON notes (learner_id);")
            .execute(&pool)
            .await
            .unwrap();

        let migrator =
            SchemaMigrator::new(pool.clone(), LEARNERS_WITHOUT_USERNAME_SCHEMA, development_guard());
        let diff = migrator.diff().await.expect("Diff failed");
        let destructive = diff.destructive_changes();

        assert!(destructive.contains(&DestructiveChange::TableRemoved("notes".to_string())));
        assert!(destructive.contains(&DestructiveChange::ColumnRemoved {
            table: "learners".to_string(),
            column: "username".to_string(),
        }));
        assert!(destructive.contains(&DestructiveChange::IndexRemoved(
            "idx_notes_learner".to_string()
        )));

        assert_eq!(table_names(&pool).await, vec!["learners", "notes"]);
    }

    #[tokio::test]
    async fn test_production_refuses_table_drop_without_backup_marker() {
        let dir = TempDir::new().unwrap();
        let pool = create_test_db().await;
        sqlx::raw_sql(LEARNERS_AND_NOTES_SCHEMA)
            .execute(&pool)
            .await
            .unwrap();

        let result = migrate_database_declaratively(
            pool.clone(),
            LEARNERS_SCHEMA,
            unverified_production_guard(&dir),
        )
        .await;

        match result {
            Err(AppError::Internal(msg)) => {
                assert!(msg.contains("drop table notes"), "unexpected message: {}", msg);
                assert!(msg.contains("backup marker"), "unexpected message: {}", msg);
            }
            other => panic!("Expected refusal, got {:?}", other),
        }
        assert_eq!(table_names(&pool).await, vec!["learners", "notes"]);

        let changed =
            migrate_database_declaratively(pool.clone(), LEARNERS_SCHEMA, verified_production_guard(&dir))
                .await
                .expect("Verified backup should permit the drop");
        assert!(changed);
        assert_eq!(table_names(&pool).await, vec!["learners"]);
    }

    #[tokio::test]
    async fn test_production_refuses_column_drop_without_backup_marker() {
        let dir = TempDir::new().unwrap();
        let pool = create_test_db().await;
        sqlx::raw_sql(LEARNERS_SCHEMA).execute(&pool).await.unwrap();

        let result = migrate_database_declaratively(
            pool.clone(),
            LEARNERS_WITHOUT_USERNAME_SCHEMA,
            unverified_production_guard(&dir),
        )
        .await;
        assert!(result.is_err());
        assert!(column_names(&pool, "learners").await.contains(&"username".to_string()));
    }

    #[tokio::test]
    async fn test_index_drop_allowed_outside_production() {
        let pool = create_test_db().await;
        sqlx::raw_sql(LEARNERS_WITH_INDEX_SCHEMA)
            .execute(&pool)
            .await
            .unwrap();

        let changed = migrate_database_declaratively(pool.clone(), LEARNERS_SCHEMA, development_guard())
            .await
            .expect("Development migrations may drop indices");
        assert!(changed);

        let indices: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = 'idx_learners_username'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(indices, 0);
    }

    #[test]
    fn test_normalize_sql_ignores_formatting() {
        assert_eq!(
            normalize_sql("CREATE TABLE t( -- comment\n  id INTEGER )"),
            "CREATE TABLE t(id INTEGER)"
        );
        assert_eq!(
            normalize_sql("CREATE TABLE \"learners\" (id INTEGER ,  name TEXT)"),
            "CREATE TABLE learners(id INTEGER,name TEXT)"
        );
    }
}
