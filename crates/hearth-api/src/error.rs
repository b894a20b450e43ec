//! Error types for the REST client.

use thiserror::Error;

/// Errors that can occur when talking to the platform or chat REST APIs.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Authentication failed or no credentials were available.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP request failed before a status was received.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The entity does not exist (HTTP 404).
    #[error("not found: {url}")]
    NotFound { url: String },

    /// The entity exists but may not be accessed (HTTP 403).
    #[error("forbidden: {url}{}", error.as_ref().map(|e| format!(" ({})", e)).unwrap_or_default())]
    Forbidden { url: String, error: Option<String> },

    /// Rate limited (HTTP 429). Callers may retry after the given delay.
    #[error("rate limited{}", match (endpoint, retry_after_secs) {
        (Some(ep), Some(secs)) => format!(" on {} (retry after {}s)", ep, secs),
        (Some(ep), None) => format!(" on {}", ep),
        (None, Some(secs)) => format!(" (retry after {}s)", secs),
        (None, None) => String::new(),
    })]
    RateLimited {
        /// The endpoint that was rate limited (optional).
        endpoint: Option<String>,
        /// Seconds to wait before retrying (optional).
        retry_after_secs: Option<u64>,
    },

    /// Any other non-2xx status.
    #[error("unexpected status {status}{}{}",
        error.as_ref().map(|e| format!(": {}", e)).unwrap_or_default(),
        message.as_ref().map(|m| format!(" - {}", m)).unwrap_or_default())]
    UnexpectedStatus {
        status: u16,
        /// Machine-readable error code from the body (e.g. `already_blocked`).
        error: Option<String>,
        /// Human-readable description from the body.
        message: Option<String>,
    },

    /// Response was well-formed HTTP but not the shape we expected.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Whether retrying the same call later could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::RateLimited { .. } => true,
            ApiError::UnexpectedStatus { status, .. } => *status >= 500,
            ApiError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// The machine-readable error code carried by the response body, if any.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            ApiError::UnexpectedStatus { error, .. } | ApiError::Forbidden { error, .. } => {
                error.as_deref()
            }
            _ => None,
        }
    }

    /// The HTTP status this error was produced from, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::NotFound { .. } => Some(404),
            ApiError::Forbidden { .. } => Some(403),
            ApiError::RateLimited { .. } => Some(429),
            ApiError::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
