//! Error types for the LMS client

use thiserror::Error;

/// Client error types
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP request failed: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Durable credential storage is unavailable; a session cannot be persisted
    #[error("Credential storage unavailable: {0}")]
    Storage(String),

    /// The server rejected the supplied credentials
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The session could not be recovered and has been logged out
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Authenticated, but not permitted to reach the resource
    #[error("Access to {path} denied: {reason}")]
    Forbidden { path: String, reason: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Navigation to {0} exceeded the redirect limit")]
    RedirectLoop(String),
}

impl ClientError {
    /// Map a non-success HTTP status to an error
    pub fn from_status(status: reqwest::StatusCode, path: &str, message: String) -> Self {
        match status.as_u16() {
            401 => Self::Authentication(message),
            403 => Self::Forbidden {
                path: path.to_string(),
                reason: message,
            },
            404 => Self::NotFound(path.to_string()),
            code => Self::Status {
                status: code,
                message,
            },
        }
    }

    /// Whether this error ended the session
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired(_))
    }
}

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
