//! Typed HTTP client for the progress endpoints.
//!
//! Mutations post to the server and, on success, drop the cached
//! `user-metrics` result so the next read refetches it.

use std::sync::Mutex;

use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::api::account::{LoginRequest, LoginResponse};
use crate::api::progress::{
    LearningTimeRequest, LearningTimeResponse, ProgressUpdateRequest, ProgressUpdateResponse,
    QuizCompleteRequest, QuizCompleteResponse,
};
use crate::auth::User;
use crate::error::ErrorResponse;
use crate::models::UserMetrics;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Login rejected: {0}")]
    LoginRejected(String),
}

impl ClientError {
    pub fn requires_reauth(&self) -> bool {
        matches!(self, ClientError::Api { status: 401, .. } | ClientError::LoginRejected(_))
    }
}

/// Last `user-metrics` result, cleared by every successful mutation.
#[derive(Debug, Default)]
pub struct MetricsCache {
    metrics: Mutex<Option<UserMetrics>>,
}

impl MetricsCache {
    pub fn get(&self) -> Option<UserMetrics> {
        self.metrics.lock().ok().and_then(|m| m.clone())
    }

    pub fn store(&self, metrics: UserMetrics) {
        if let Ok(mut cached) = self.metrics.lock() {
            *cached = Some(metrics);
        }
    }

    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.metrics.lock() {
            *cached = None;
        }
    }
}

pub struct ProgressClient {
    client: Client,
    base_url: String,
    metrics: MetricsCache,
}

impl ProgressClient {
    /// `base_url` is the server root, e.g. `http://localhost:8000`.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            metrics: MetricsCache::default(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{}", self.base_url, path)
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, ClientError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        Self::decode(response).await
    }

    async fn decode<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let message = match response.json::<ErrorResponse>().await {
            Ok(body) => body.error,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string(),
        };
        Err(ClientError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// Logs in and keeps the session cookie for later calls.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> Result<User, ClientError> {
        let body = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let response: LoginResponse = self.post("login", &body).await?;
        self.metrics.invalidate();

        match (response.success, response.user) {
            (true, Some(user)) => Ok(user),
            _ => Err(ClientError::LoginRejected(
                response.error.unwrap_or_else(|| "Login failed".to_string()),
            )),
        }
    }

    #[instrument(skip(self))]
    pub async fn update_progress(
        &self,
        module_id: i64,
        section_id: &str,
        completed: bool,
    ) -> Result<ProgressUpdateResponse, ClientError> {
        let body = ProgressUpdateRequest {
            module_id,
            section_id: section_id.to_string(),
            completed,
        };
        let response = self.post("progress/update", &body).await?;
        self.metrics.invalidate();
        Ok(response)
    }

    #[instrument(skip(self))]
    pub async fn track_learning_time(
        &self,
        module_id: i64,
        section_id: &str,
        seconds: i64,
    ) -> Result<LearningTimeResponse, ClientError> {
        let body = LearningTimeRequest {
            module_id,
            section_id: section_id.to_string(),
            seconds,
        };
        let response = self.post("progress/time", &body).await?;
        self.metrics.invalidate();
        Ok(response)
    }

    #[instrument(skip(self))]
    pub async fn mark_quiz_complete(
        &self,
        module_id: i64,
        quiz_id: &str,
        score: Option<i64>,
    ) -> Result<QuizCompleteResponse, ClientError> {
        let body = QuizCompleteRequest {
            module_id,
            quiz_id: quiz_id.to_string(),
            score,
        };
        let response = self.post("progress/quiz-complete", &body).await?;
        self.metrics.invalidate();
        Ok(response)
    }

    /// Serves the cached metrics, fetching them when the cache is empty.
    #[instrument(skip(self))]
    pub async fn user_metrics(&self) -> Result<UserMetrics, ClientError> {
        if let Some(metrics) = self.metrics.get() {
            debug!("Serving user metrics from cache");
            return Ok(metrics);
        }

        let response = self.client.get(self.url("user-metrics")).send().await?;
        let metrics: UserMetrics = Self::decode(response).await?;
        self.metrics.store(metrics.clone());
        Ok(metrics)
    }

    /// Metrics from the last fetch, if no mutation has happened since.
    /// Never touches the network.
    pub fn cached_metrics(&self) -> Option<UserMetrics> {
        self.metrics.get()
    }
}
