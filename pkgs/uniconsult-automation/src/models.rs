//! Wire types of the automation service

use serde::{Deserialize, Serialize};

/// Response of `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
    pub gemini_configured: bool,
}

/// Reachability of the automation service, for the status indicator that
/// gates the start action.
#[derive(Debug, Clone)]
pub enum ServiceHealth {
    Reachable(HealthStatus),
    Unreachable,
}

impl ServiceHealth {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Self::Reachable(_))
    }
}

/// Response of `POST /run-task`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStarted {
    pub status: String,
    pub task_description: String,
    pub task_id: String,
}

/// Review mode of an application run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplicationMode {
    /// Fill the forms, halt before submission for teacher review
    Semi,
    /// Submit without a review stop
    Full,
}

/// Request body of `POST /api/apply`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRequest {
    pub student_id: String,
    pub student_data: serde_json::Value,
    pub university_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub major: Option<String>,
    pub mode: ApplicationMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gemini_api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<String>,
}

/// Response of `POST /api/apply`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationStarted {
    pub task_id: String,
    pub status: String,
}

/// Credentials the agent created on an application portal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountCredentials {
    pub email: String,
    pub password: String,
    pub university: String,
}

/// Response of `GET /api/status/{task_id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub status: String,
    pub progress: i32,
    pub message: String,
    pub timestamp: String,
    #[serde(default)]
    pub account_created: Option<AccountCredentials>,
}

/// Action of `POST /api/confirm/{task_id}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmAction {
    Submit,
    Cancel,
}

impl ConfirmAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Cancel => "cancel",
        }
    }
}

/// One frame of the `/ws/progress/{task_id}` stream. The service sends two
/// shapes: keepalive snapshots carry the full `messages` log, progress
/// updates carry a single `message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: String,
    pub status: String,
    pub progress: i32,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<String>>,
    #[serde(default)]
    pub account_credentials: Option<AccountCredentials>,
}

impl TaskProgress {
    /// Most recent progress line, from either frame shape.
    pub fn latest_message(&self) -> Option<&str> {
        self.message
            .as_deref()
            .or_else(|| self.messages.as_ref()?.last().map(String::as_str))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "completed" | "cancelled" | "error")
    }
}
