#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Cookie, Status};
    use serde_json::json;

    use crate::api::account::LoginResponse;
    use crate::auth::{Role, SESSION_COOKIE, User};
    use crate::error::ErrorResponse;
    use crate::models::{AdminUserSummary, ModuleDetail, PlatformStats, UserAchievement};
    use crate::test::test_db::STANDARD_PASSWORD;
    use crate::test::test_utils::{create_standard_test_db, login_test_user, setup_test_client};

    #[rocket::async_test]
    async fn test_health_needs_no_session() {
        let (client, _) = setup_test_client(create_standard_test_db().await).await;

        let response = client.get("/api/health").dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        assert_eq!(response.into_string().await.unwrap(), "OK");
    }

    #[rocket::async_test]
    async fn test_auth_required_apis() {
        let (client, _) = setup_test_client(create_standard_test_db().await).await;

        let endpoints = [
            "/api/me",
            "/api/progress",
            "/api/progress/1",
            "/api/user-metrics",
            "/api/achievements",
            "/api/achievements/earned",
            "/api/modules",
            "/api/wallet",
            "/api/glossary",
            "/api/admin/users",
        ];

        for endpoint in endpoints {
            let response = client.get(endpoint).dispatch().await;
            assert_eq!(
                response.status(),
                Status::Unauthorized,
                "Endpoint {} did not require authentication",
                endpoint
            );
            let body: ErrorResponse = response.into_json().await.unwrap();
            assert_eq!(body.error, "Unauthorized");
        }

        let response = client
            .post("/api/progress/update")
            .header(ContentType::JSON)
            .body(json!({ "moduleId": 1, "sectionId": "intro", "completed": true }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn test_login_api() {
        let (client, _) = setup_test_client(create_standard_test_db().await).await;

        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(json!({ "username": "learner_one", "password": STANDARD_PASSWORD }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        assert!(response.cookies().get_private(SESSION_COOKIE).is_some());

        let login: LoginResponse = response.into_json().await.unwrap();
        assert!(login.success);
        let user = login.user.expect("user in login response");
        assert_eq!(user.username, "learner_one");
        assert_eq!(user.display_name, "Learner One");
        assert_eq!(user.role, Role::Learner);

        let response = client
            .post("/api/login")
            .header(ContentType::JSON)
            .body(json!({ "username": "learner_one", "password": "wrong_password" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let login: LoginResponse = response.into_json().await.unwrap();
        assert!(!login.success);
        assert!(login.user.is_none());
        assert!(login.error.is_some());
    }

    #[rocket::async_test]
    async fn test_forged_session_cookie_is_rejected() {
        let (client, _) = setup_test_client(create_standard_test_db().await).await;

        let response = client
            .get("/api/me")
            .private_cookie(Cookie::new(SESSION_COOKIE, "fake_token"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);

        // Unencrypted cookies never reach the session lookup.
        let response = client
            .get("/api/me")
            .cookie(Cookie::new(SESSION_COOKIE, "fake_token"))
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn test_signup_then_login() {
        let (client, _) = setup_test_client(create_standard_test_db().await).await;

        let signup = json!({
            "username": "new.learner",
            "password": "long enough",
            "displayName": "New Learner"
        })
        .to_string();

        let response = client
            .post("/api/signup")
            .header(ContentType::JSON)
            .body(signup.clone())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);
        let user: User = response.into_json().await.unwrap();
        assert_eq!(user.username, "new.learner");
        assert_eq!(user.role, Role::Learner);

        let response = client
            .post("/api/signup")
            .header(ContentType::JSON)
            .body(signup)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Conflict);
        let body: ErrorResponse = response.into_json().await.unwrap();
        assert_eq!(body.error, "Username already exists");

        let response = client
            .post("/api/signup")
            .header(ContentType::JSON)
            .body(json!({ "username": "x", "password": "short" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::UnprocessableEntity);
        let body: ErrorResponse = response.into_json().await.unwrap();
        assert_eq!(body.fields.map(|f| f.len()), Some(2));

        let cookies = login_test_user(&client, "new.learner", "long enough").await;
        let response = client.get("/api/me").cookies(cookies).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
    }

    #[rocket::async_test]
    async fn test_update_profile_api() {
        let (client, _) = setup_test_client(create_standard_test_db().await).await;
        let cookies = login_test_user(&client, "learner_two", STANDARD_PASSWORD).await;

        let response = client
            .put("/api/profile")
            .header(ContentType::JSON)
            .cookies(cookies.clone())
            .body(
                json!({
                    "displayName": "Second Learner",
                    "learningPreferences": { "pace": "slow", "topics": ["defi"] }
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let user: User = response.into_json().await.unwrap();
        assert_eq!(user.display_name, "Second Learner");
        assert_eq!(
            user.learning_preferences,
            Some(json!({ "pace": "slow", "topics": ["defi"] }))
        );

        let response = client
            .put("/api/profile")
            .header(ContentType::JSON)
            .cookies(cookies.clone())
            .body(json!({ "learningPreferences": ["not", "an", "object"] }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::UnprocessableEntity);

        // Omitted fields keep their stored values.
        let response = client
            .put("/api/profile")
            .header(ContentType::JSON)
            .cookies(cookies)
            .body(json!({}).to_string())
            .dispatch()
            .await;
        let user: User = response.into_json().await.unwrap();
        assert_eq!(user.display_name, "Second Learner");
        assert!(user.learning_preferences.is_some());
    }

    #[rocket::async_test]
    async fn test_admin_apis_forbidden_for_learners() {
        let (client, _) = setup_test_client(create_standard_test_db().await).await;
        let cookies = login_test_user(&client, "learner_one", STANDARD_PASSWORD).await;

        for endpoint in ["/api/admin/users", "/api/admin/stats"] {
            let response = client.get(endpoint).cookies(cookies.clone()).dispatch().await;
            assert_eq!(response.status(), Status::Forbidden, "{}", endpoint);
            let body: ErrorResponse = response.into_json().await.unwrap();
            assert_eq!(body.error, "Forbidden");
        }

        let response = client
            .post("/api/admin/modules")
            .header(ContentType::JSON)
            .cookies(cookies)
            .body(json!({ "title": "Sneaky" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Forbidden);
    }

    #[rocket::async_test]
    async fn test_admin_catalog_management() {
        let (client, _) = setup_test_client(create_standard_test_db().await).await;
        let cookies = login_test_user(&client, "admin_user", STANDARD_PASSWORD).await;

        let response = client
            .post("/api/admin/modules")
            .header(ContentType::JSON)
            .cookies(cookies.clone())
            .body(
                json!({
                    "id": 7,
                    "title": "DeFi",
                    "description": "Lending and swaps",
                    "sections": [
                        { "sectionId": "amm", "title": "Market makers" },
                        { "sectionId": "lending", "title": "Lending" }
                    ]
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);
        let module: ModuleDetail = response.into_json().await.unwrap();
        assert_eq!(module.module.id, 7);
        assert_eq!(module.sections.len(), 2);

        let response = client
            .post("/api/admin/modules")
            .header(ContentType::JSON)
            .cookies(cookies.clone())
            .body(
                json!({ "title": "Bad", "sections": [{ "sectionId": "no spaces allowed", "title": "x" }] })
                    .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::UnprocessableEntity);

        let response = client
            .post("/api/admin/achievements")
            .header(ContentType::JSON)
            .cookies(cookies.clone())
            .body(
                json!({
                    "name": "DeFi Certificate",
                    "criteria": { "moduleId": 7 },
                    "kind": "certificate",
                    "imageUrl": "https://example.com/defi.png"
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);

        let response = client
            .post("/api/admin/quizzes")
            .header(ContentType::JSON)
            .cookies(cookies.clone())
            .body(
                json!({
                    "moduleId": 7,
                    "question": "What prices an AMM?",
                    "options": ["A curve", "An auctioneer"],
                    "correctAnswer": "A curve"
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Created);

        let response = client
            .post("/api/admin/glossary")
            .header(ContentType::JSON)
            .cookies(cookies.clone())
            .body(json!({ "term": "gas", "definition": "Duplicate of Gas" }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Conflict);

        let response = client
            .get("/api/modules/7")
            .cookies(cookies)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
    }

    #[rocket::async_test]
    async fn test_admin_reporting_and_awards() {
        let test_db = create_standard_test_db().await;
        let learner_id = test_db.user_id("learner_one").unwrap();
        let badge_id = test_db.achievement_id("Early Bird").unwrap();
        let (client, _test_db) = setup_test_client(test_db).await;

        let learner = login_test_user(&client, "learner_one", STANDARD_PASSWORD).await;
        let response = client
            .post("/api/progress/update")
            .header(ContentType::JSON)
            .cookies(learner)
            .body(json!({ "moduleId": 1, "sectionId": "intro", "completed": true }).to_string())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);

        let admin = login_test_user(&client, "admin_user", STANDARD_PASSWORD).await;

        let response = client
            .post(format!("/api/admin/users/{}/achievements/{}", learner_id, badge_id))
            .cookies(admin.clone())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Ok);
        let award: UserAchievement = response.into_json().await.unwrap();
        assert_eq!(award.metadata["source"], "admin");

        let response = client
            .post(format!("/api/admin/users/9999/achievements/{}", badge_id))
            .cookies(admin.clone())
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::NotFound);

        let response = client.get("/api/admin/users").cookies(admin.clone()).dispatch().await;
        assert_eq!(response.status(), Status::Ok);
        let users: Vec<AdminUserSummary> = response.into_json().await.unwrap();
        assert_eq!(users.len(), 3);
        let learner = users
            .iter()
            .find(|u| u.username == "learner_one")
            .expect("learner_one listed");
        assert_eq!(learner.modules_started, 1);
        assert_eq!(learner.modules_completed, 0);
        assert_eq!(learner.achievements_earned, 1);

        let response = client.get("/api/admin/stats").cookies(admin).dispatch().await;
        let stats: PlatformStats = response.into_json().await.unwrap();
        assert_eq!(stats.users, 3);
        assert_eq!(stats.enrollments, 1);
        assert_eq!(stats.achievements_awarded, 1);
    }

    #[rocket::async_test]
    async fn test_unknown_route_returns_json_404() {
        let (client, _) = setup_test_client(create_standard_test_db().await).await;
        let cookies = login_test_user(&client, "learner_one", STANDARD_PASSWORD).await;

        let response = client.get("/api/nowhere").cookies(cookies.clone()).dispatch().await;
        assert_eq!(response.status(), Status::NotFound);
        let body: ErrorResponse = response.into_json().await.unwrap();
        assert_eq!(body.error, "No resource at /api/nowhere");

        let response = client.get("/api/modules/404").cookies(cookies).dispatch().await;
        assert_eq!(response.status(), Status::NotFound);
    }
}
