use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::auth::RefreshFailure;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unauthorized - session expired, please log in again")]
    AuthorizationTerminal,

    #[error("Credential refresh was abandoned before it finished")]
    RefreshAbandoned,

    #[error("Request failed ({status}): {}", summarize(.payload))]
    Application { status: StatusCode, payload: Value },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request body: {0}")]
    InvalidRequest(String),
}

/// Maximum length for error payloads in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Truncate a response body to avoid logging excessive data
pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX_ERROR_BODY_LENGTH).collect();
        format!("{}... (truncated, {} total bytes)", cut, body.len())
    }
}

fn summarize(payload: &Value) -> String {
    match payload {
        Value::Null => "no body".to_string(),
        Value::String(text) => truncate_body(text),
        other => truncate_body(&other.to_string()),
    }
}

impl ApiError {
    /// Build the error for a non-2xx response whose body is already decoded.
    pub fn from_status(status: StatusCode, payload: Value) -> Self {
        ApiError::Application { status, payload }
    }

    /// HTTP status for application errors.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Application { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status(),
            _ => None,
        }
    }

    /// Decoded error body for application errors.
    pub fn payload(&self) -> Option<&Value> {
        match self {
            ApiError::Application { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// True when the user has to sign in again.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::AuthorizationTerminal)
    }
}

impl From<RefreshFailure> for ApiError {
    fn from(failure: RefreshFailure) -> Self {
        match failure {
            RefreshFailure::Rejected => ApiError::AuthorizationTerminal,
            RefreshFailure::Abandoned => ApiError::RefreshAbandoned,
        }
    }
}
