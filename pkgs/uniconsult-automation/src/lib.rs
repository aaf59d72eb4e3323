//! Client for the local browser-automation service
//!
//! The consulting platform delegates university-application form filling to
//! a separate agent process on the same machine. This crate is the only
//! integration point with it: health probing, task and application
//! submission with a bounded retry policy, status polling, confirmation of
//! runs awaiting teacher review, a websocket progress stream, and the
//! prompt/credential generation that shapes what the agent is asked to do.
//!
//! Unlike the chat stores, failures here surface to the caller as
//! [`AutomationError`]: starting an expensive external job needs visible
//! failure semantics, not fail-open defaults.

pub mod client;
pub mod error;
pub mod models;
pub mod progress;
pub mod prompt;

pub use client::{AutomationClient, AutomationConfig};
pub use error::{AutomationError, Result};
pub use models::{
    AccountCredentials, ApplicationMode, ApplicationRequest, ApplicationStarted, ConfirmAction,
    HealthStatus, ServiceHealth, TaskProgress, TaskStarted, TaskStatus,
};
pub use progress::{subscribe_task, TaskSubscription};
pub use prompt::{build_application_prompt, generate_password, ApplicationPrompt, StudentData};
