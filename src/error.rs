//! Errors surfaced by the backend collaborator.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

const MAX_PAYLOAD_MESSAGE_LEN: usize = 200;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BackendError {
    #[error("network error: {0}")]
    Network(String),

    #[error("backend returned {status}: {}", message.as_deref().unwrap_or("no details"))]
    Status { status: u16, message: Option<String> },

    #[error("not found")]
    NotFound,

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,
}

impl BackendError {
    /// Build a status error, pulling a human-readable reason out of the body.
    pub fn from_status(status: u16, body: &str) -> Self {
        BackendError::Status {
            status,
            message: payload_message(body),
        }
    }

    /// Transient failures are worth a retry from the operator.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Network(_) | BackendError::Timeout(_) => true,
            BackendError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Message for the operator: the backend's own reason when it sent one.
    pub fn user_message(&self) -> String {
        match self {
            BackendError::Status {
                message: Some(m), ..
            } => m.clone(),
            BackendError::Status { status, .. } => {
                format!("The server rejected the request (HTTP {})", status)
            }
            BackendError::Network(_) => "Could not reach the server, please retry".to_string(),
            BackendError::NotFound => "The requested record no longer exists".to_string(),
            BackendError::Decode(_) => "The server sent an unexpected response".to_string(),
            BackendError::Timeout(_) => "The server took too long to respond".to_string(),
            BackendError::Cancelled => "The request was cancelled".to_string(),
        }
    }
}

/// Extract `message`, `error` (string or `{message}`) or `detail` from an
/// error body. Short plain-text bodies are used as-is.
pub fn payload_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["message", "error", "detail"] {
            match json.get(field) {
                Some(serde_json::Value::String(s)) if !s.trim().is_empty() => {
                    return Some(s.trim().to_string())
                }
                Some(serde_json::Value::Object(inner)) => {
                    if let Some(s) = inner.get("message").and_then(|m| m.as_str()) {
                        return Some(s.trim().to_string());
                    }
                }
                _ => {}
            }
        }
        return None;
    }

    if body.len() <= MAX_PAYLOAD_MESSAGE_LEN && !body.starts_with('<') {
        return Some(body.to_string());
    }
    None
}

/// Bound a backend call so a stalled request fails instead of hanging.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(res) => res,
        Err(_) => Err(BackendError::Timeout(limit)),
    }
}
