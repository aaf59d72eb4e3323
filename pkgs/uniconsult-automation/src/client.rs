//! HTTP client for the automation service
//!
//! Task submission is latency-sensitive: it runs under an explicit request
//! timeout and a bounded retry policy, unlike the chat stores which lean on
//! the backend client's defaults. Status polling and confirmation are sent
//! once; the caller decides what a failure means for the running job.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{AutomationError, Result};
use crate::models::{
    ApplicationRequest, ApplicationStarted, ConfirmAction, HealthStatus, ServiceHealth,
    TaskStarted, TaskStatus,
};

/// Bridge configuration. The service listens on its mandated local port by
/// default.
#[derive(Debug, Clone)]
pub struct AutomationConfig {
    pub base_url: String,

    /// Per-request timeout; submission must fail fast.
    pub request_timeout: Duration,

    /// Total attempts for task submission, first try included.
    pub max_attempts: u32,

    /// Fixed delay between submission attempts.
    pub retry_delay: Duration,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8765".to_string(),
            request_timeout: Duration::from_secs(5),
            max_attempts: 3,
            retry_delay: Duration::from_secs(2),
        }
    }
}

/// The sole interface between the application and the external automation
/// agent.
pub struct AutomationClient {
    http: reqwest::Client,
    config: AutomationConfig,
}

impl AutomationClient {
    pub fn new(config: AutomationConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AutomationError::Unknown(e.to_string()))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Reachability probe for the status indicator. Never fails; transport
    /// errors degrade to `Unreachable`.
    pub async fn check_health(&self) -> ServiceHealth {
        let url = self.url("/health");
        match self.get_once::<HealthStatus>(&url).await {
            Ok(health) => ServiceHealth::Reachable(health),
            Err(e) => {
                warn!("automation service unreachable: {e}");
                ServiceHealth::Unreachable
            }
        }
    }

    /// Submit a free-form task. Connect and timeout failures are retried up
    /// to the configured attempt ceiling with a fixed delay.
    pub async fn start_task(&self, task: &str) -> Result<TaskStarted> {
        debug!(task_len = task.len(), "submitting task");
        let started: TaskStarted = self
            .post_with_retry("/run-task", &serde_json::json!({ "task": task }))
            .await?;
        info!(task_id = %started.task_id, "task started");
        Ok(started)
    }

    /// Submit a full university-application run. Same retry policy as
    /// `start_task`.
    pub async fn start_application(&self, request: &ApplicationRequest) -> Result<ApplicationStarted> {
        let started: ApplicationStarted = self.post_with_retry("/api/apply", request).await?;
        info!(task_id = %started.task_id, university = %request.university_name, "application started");
        Ok(started)
    }

    /// Poll one task's status. Sent once; polling loops live with the
    /// caller.
    pub async fn task_status(&self, task_id: &str) -> Result<TaskStatus> {
        let url = self.url(&format!("/api/status/{task_id}"));
        self.get_once(&url).await
    }

    /// Confirm or cancel a run awaiting teacher review.
    pub async fn confirm(&self, task_id: &str, action: ConfirmAction) -> Result<()> {
        let url = self.url(&format!("/api/confirm/{task_id}"));
        let response = self
            .http
            .post(&url)
            .query(&[("action", action.as_str())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AutomationError::ServerError {
                status: status.as_u16(),
            });
        }
        info!(task_id, action = action.as_str(), "confirmation sent");
        Ok(())
    }

    async fn post_with_retry<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.post_once(&url, body).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.config.max_attempts => {
                    warn!(%url, attempt, "automation request failed ({e}), retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_once<B, T>(&self, url: &str, body: &B) -> Result<T>
    where
        B: Serialize,
        T: DeserializeOwned,
    {
        let response = self.http.post(url).json(body).send().await?;
        decode(response).await
    }

    async fn get_once<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self.http.get(url).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(AutomationError::ServerError {
            status: status.as_u16(),
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| AutomationError::Unknown(e.to_string()))
}
