use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use super::transport::{HttpResponse, TransportError};

/// Used when a 429 carries no usable `Retry-After`.
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Longer `Retry-After` values are clamped to one day.
pub const MAX_RETRY_AFTER_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChatClientError {
    /// HTTP 429.
    #[error("{message}")]
    RateLimited {
        message: String,
        retry_after_secs: u64,
    },

    /// 4xx other than 429. Never retried.
    #[error("{message}")]
    Client { status: u16, message: String },

    /// 5xx and other non-2xx, network failures, unreadable bodies.
    #[error("{message}")]
    Transient {
        status: Option<u16>,
        message: String,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<ChatClientError>,
    },
}

impl ChatClientError {
    pub fn network(context: &str, err: &TransportError) -> Self {
        Self::Transient {
            status: None,
            message: format!("{context}: {err}"),
        }
    }

    pub fn malformed_body(err: &serde_json::Error) -> Self {
        Self::Transient {
            status: None,
            message: format!("Invalid response body: {err}"),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient { .. })
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(StatusCode::TOO_MANY_REQUESTS.as_u16()),
            Self::Client { status, .. } => Some(*status),
            Self::Transient { status, .. } => *status,
            Self::InvalidRequest(_) => None,
            Self::Exhausted { last, .. } => last.status_code(),
        }
    }

    /// How long the backend asked us to back off, looking through `Exhausted`.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_secs, ..
            } => Some(Duration::from_secs(*retry_after_secs)),
            Self::Exhausted { last, .. } => last.retry_after(),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<Value>,
}

/// Classifies a non-2xx response.
pub fn classify(response: &HttpResponse) -> ChatClientError {
    let status = response.status;
    let message = error_message(response);

    if status == StatusCode::TOO_MANY_REQUESTS {
        return ChatClientError::RateLimited {
            message,
            retry_after_secs: parse_retry_after(response.header("retry-after")),
        };
    }

    if status.is_client_error() {
        ChatClientError::Client {
            status: status.as_u16(),
            message,
        }
    } else {
        ChatClientError::Transient {
            status: Some(status.as_u16()),
            message,
        }
    }
}

// Prefers a string `detail` (FastAPI style) over the generic status line
fn error_message(response: &HttpResponse) -> String {
    let detail = serde_json::from_str::<ErrorBody>(&response.body)
        .ok()
        .and_then(|body| body.detail)
        .and_then(|detail| match detail {
            Value::String(text) if !text.trim().is_empty() => Some(text),
            _ => None,
        });

    detail.unwrap_or_else(|| status_line(response.status))
}

fn status_line(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => format!("HTTP {}: {}", status.as_u16(), reason),
        None => format!("HTTP {}", status.as_u16()),
    }
}

fn parse_retry_after(value: Option<&str>) -> u64 {
    // HTTP-date form is not supported
    value
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(|secs| secs.min(MAX_RETRY_AFTER_SECS))
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}
