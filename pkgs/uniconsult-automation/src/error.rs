use thiserror::Error;

/// Typed failures of the automation bridge. Unlike the chat stores, this is
/// the one layer that returns errors to the caller: starting or stopping an
/// expensive external job needs caller-visible failure semantics.
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("automation service connection failed")]
    ConnectionFailed,

    #[error("automation service request timed out")]
    Timeout,

    #[error("automation service returned status {status}")]
    ServerError { status: u16 },

    #[error("automation service failure: {0}")]
    Unknown(String),
}

impl AutomationError {
    /// Connection and timeout failures are worth retrying; a server that
    /// answered with an error is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConnectionFailed | Self::Timeout)
    }
}

impl From<reqwest::Error> for AutomationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::ConnectionFailed
        } else if let Some(status) = err.status() {
            Self::ServerError {
                status: status.as_u16(),
            }
        } else {
            Self::Unknown(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, AutomationError>;
