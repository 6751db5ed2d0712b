#[cfg(test)]
pub mod test_db {
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Once;
    use std::time::Duration;

    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::{Pool, Sqlite};
    use tempfile::TempDir;

    use crate::auth::Role;
    use crate::database::{
        CURRENT_SCHEMA, DestructiveGuard, PoolSettings, connect_pool, migrate_database_declaratively,
    };
    use crate::db::{NewSection, create_achievement, create_module, create_quiz, create_term, create_user};
    use crate::error::AppError;
    use crate::models::AchievementKind;

    static INIT: Once = Once::new();
    pub static STANDARD_PASSWORD: &str = "password123";

    /// One connection only: every `sqlite::memory:` connection is its own
    /// database.
    pub async fn memory_pool() -> Result<Pool<Sqlite>, AppError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        Ok(pool)
    }

    /// A database file inside `dir` behind several connections, for tests
    /// that need real lock contention between writers.
    pub async fn file_pool(dir: &TempDir) -> Result<Pool<Sqlite>, AppError> {
        let url = format!("sqlite://{}", dir.path().join("sulla-test.db").display());
        let settings = PoolSettings {
            max_connections: 8,
            acquire_timeout: Duration::from_secs(10),
            ..PoolSettings::default()
        };
        connect_pool(&url, &settings).await
    }

    pub async fn migrated_pool() -> Result<Pool<Sqlite>, AppError> {
        migrate(memory_pool().await?).await
    }

    async fn migrate(pool: Pool<Sqlite>) -> Result<Pool<Sqlite>, AppError> {
        migrate_database_declaratively(
            pool.clone(),
            CURRENT_SCHEMA,
            DestructiveGuard::new(false, PathBuf::from(".backup-verified")),
        )
        .await?;
        Ok(pool)
    }

    struct TestUser {
        username: String,
        display_name: Option<String>,
        role: Role,
    }

    struct TestModule {
        id: i64,
        title: String,
        sections: Vec<String>,
    }

    struct TestAchievement {
        name: String,
        kind: AchievementKind,
        criteria: serde_json::Value,
    }

    struct TestQuiz {
        module_id: i64,
        question: String,
        options: Vec<String>,
        correct_answer: String,
    }

    struct TestTerm {
        term: String,
        category: String,
        difficulty: String,
    }

    #[derive(Default)]
    pub struct TestDbBuilder {
        users: Vec<TestUser>,
        modules: Vec<TestModule>,
        achievements: Vec<TestAchievement>,
        quizzes: Vec<TestQuiz>,
        terms: Vec<TestTerm>,
    }

    impl TestDbBuilder {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn learner(mut self, username: &str, display_name: Option<&str>) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role: Role::Learner,
            });
            self
        }

        pub fn admin(mut self, username: &str, display_name: Option<&str>) -> Self {
            self.users.push(TestUser {
                username: username.to_string(),
                display_name: display_name.map(String::from),
                role: Role::Admin,
            });
            self
        }

        pub fn module(mut self, id: i64, title: &str, sections: &[&str]) -> Self {
            self.modules.push(TestModule {
                id,
                title: title.to_string(),
                sections: sections.iter().map(|s| s.to_string()).collect(),
            });
            self
        }

        /// Certificate awarded when `module_id` is complete.
        pub fn certificate(mut self, name: &str, module_id: i64) -> Self {
            self.achievements.push(TestAchievement {
                name: name.to_string(),
                kind: AchievementKind::Certificate,
                criteria: json!({ "moduleId": module_id }),
            });
            self
        }

        pub fn badge(mut self, name: &str) -> Self {
            self.achievements.push(TestAchievement {
                name: name.to_string(),
                kind: AchievementKind::Badge,
                criteria: json!({}),
            });
            self
        }

        pub fn quiz(mut self, module_id: i64, question: &str, options: &[&str], correct: &str) -> Self {
            self.quizzes.push(TestQuiz {
                module_id,
                question: question.to_string(),
                options: options.iter().map(|o| o.to_string()).collect(),
                correct_answer: correct.to_string(),
            });
            self
        }

        pub fn glossary_term(mut self, term: &str, category: &str, difficulty: &str) -> Self {
            self.terms.push(TestTerm {
                term: term.to_string(),
                category: category.to_string(),
                difficulty: difficulty.to_string(),
            });
            self
        }

        pub async fn build(self) -> Result<TestDb, AppError> {
            self.build_on(migrated_pool().await?, None).await
        }

        /// Builds on a multi-connection database file that lives as long
        /// as the returned `TestDb`.
        pub async fn build_file_backed(self) -> Result<TestDb, AppError> {
            let dir = TempDir::new().map_err(|err| AppError::Internal(err.to_string()))?;
            let pool = migrate(file_pool(&dir).await?).await?;
            self.build_on(pool, Some(dir)).await
        }

        async fn build_on(self, pool: Pool<Sqlite>, dir: Option<TempDir>) -> Result<TestDb, AppError> {
            INIT.call_once(|| {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter("debug")
                    .with_test_writer()
                    .try_init();
            });

            let mut user_id_map = HashMap::new();
            for user in &self.users {
                let user_id = create_user(
                    &pool,
                    &user.username,
                    STANDARD_PASSWORD,
                    user.role,
                    user.display_name.as_deref(),
                )
                .await?;
                user_id_map.insert(user.username.clone(), user_id);
            }

            for module in &self.modules {
                let sections: Vec<NewSection> = module
                    .sections
                    .iter()
                    .map(|id| NewSection {
                        section_id: id.clone(),
                        title: format!("Section {}", id),
                    })
                    .collect();
                create_module(
                    &pool,
                    Some(module.id),
                    &module.title,
                    "",
                    module.id,
                    &sections,
                )
                .await?;
            }

            let mut achievement_id_map = HashMap::new();
            for achievement in &self.achievements {
                let created = create_achievement(
                    &pool,
                    &achievement.name,
                    &format!("{} description", achievement.name),
                    &achievement.criteria,
                    achievement.kind,
                    None,
                )
                .await?;
                achievement_id_map.insert(achievement.name.clone(), created.id);
            }

            let mut quiz_ids = Vec::new();
            for (position, quiz) in self.quizzes.iter().enumerate() {
                let created = create_quiz(
                    &pool,
                    quiz.module_id,
                    &quiz.question,
                    &quiz.options,
                    &quiz.correct_answer,
                    Some("Because it is."),
                    position as i64,
                )
                .await?;
                quiz_ids.push(created.id);
            }

            for term in &self.terms {
                create_term(
                    &pool,
                    &term.term,
                    &format!("Definition of {}", term.term),
                    &term.category,
                    &term.difficulty,
                    &[],
                )
                .await?;
            }

            Ok(TestDb {
                pool,
                user_id_map,
                achievement_id_map,
                quiz_ids,
                _dir: dir,
            })
        }
    }

    pub struct TestDb {
        pub pool: Pool<Sqlite>,
        pub user_id_map: HashMap<String, i64>,
        pub achievement_id_map: HashMap<String, i64>,
        pub quiz_ids: Vec<i64>,
        _dir: Option<TempDir>,
    }

    impl TestDb {
        pub fn user_id(&self, username: &str) -> Option<i64> {
            self.user_id_map.get(username).copied()
        }

        pub fn achievement_id(&self, name: &str) -> Option<i64> {
            self.achievement_id_map.get(name).copied()
        }
    }
}

#[cfg(test)]
pub mod test_utils {
    use rocket::http::{ContentType, Cookie, Status};
    use rocket::local::asynchronous::Client;
    use serde_json::json;

    use super::test_db::{TestDb, TestDbBuilder};
    use crate::env::AppConfig;
    use crate::init_rocket;

    pub async fn setup_test_client(test_db: TestDb) -> (Client, TestDb) {
        let rocket = init_rocket(test_db.pool.clone(), AppConfig::default()).await;
        let client = Client::untracked(rocket)
            .await
            .expect("valid rocket instance");
        (client, test_db)
    }

    /// Two learners, an admin, a four-section module with its certificate,
    /// a sectionless module, a badge, two quiz questions and glossary terms.
    pub async fn create_standard_test_db() -> TestDb {
        standard_builder()
            .build()
            .await
            .expect("Failed to build standard test database")
    }

    /// The standard database on a file shared by several connections.
    pub async fn create_file_backed_test_db() -> TestDb {
        standard_builder()
            .build_file_backed()
            .await
            .expect("Failed to build file-backed test database")
    }

    fn standard_builder() -> TestDbBuilder {
        TestDbBuilder::new()
            .learner("learner_one", Some("Learner One"))
            .learner("learner_two", None)
            .admin("admin_user", Some("Admin"))
            .module(1, "Blockchain Basics", &["intro", "blocks", "hashing", "consensus"])
            .module(2, "Wallets", &[])
            .certificate("Blockchain Basics Certificate", 1)
            .badge("Early Bird")
            .quiz(1, "What links blocks?", &["Hashes", "Emails", "Cookies"], "Hashes")
            .quiz(1, "Who validates blocks?", &["Miners", "Banks"], "Miners")
            .glossary_term("Blockchain", "fundamentals", "beginner")
            .glossary_term("Merkle Tree", "fundamentals", "advanced")
            .glossary_term("Gas", "ethereum", "intermediate")
    }

    pub async fn login_test_user(
        client: &Client,
        username: &str,
        password: &str,
    ) -> Vec<Cookie<'static>> {
        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(json!({ "username": username, "password": password }).to_string())
            .dispatch()
            .await;

        assert_eq!(response.status(), Status::Ok);

        response
            .cookies()
            .iter()
            .map(|cookie| cookie.clone().into_owned())
            .collect()
    }
}
