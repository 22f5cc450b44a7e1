//! Error responses.
//!
//! Every refusal leaves the service as the same JSON shape:
//!
//! ```text
//! { "error": { "code": "rate_limited", "message": "Too many requests" } }
//! ```
//!
//! `code` is stable and machine-readable; `message` is for humans. Rate
//! limiting adds a `Retry-After` header in whole seconds.

use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::security::{Decision, DenyReason};

#[derive(Debug, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, code, message)
    }

    pub fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, code, message)
    }

    /// Map an admission denial to its response. `None` for `Allow`.
    pub fn from_decision(decision: &Decision) -> Option<Self> {
        let Decision::Deny {
            reason,
            retry_after,
        } = decision
        else {
            return None;
        };

        let error = match reason {
            DenyReason::Blocklisted => Self::forbidden(reason.code(), "Access denied"),
            DenyReason::RateLimited | DenyReason::Burst => {
                Self::new(StatusCode::TOO_MANY_REQUESTS, reason.code(), "Too many requests")
            }
            DenyReason::GlobalBudget => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                reason.code(),
                "Service is at capacity",
            ),
            DenyReason::UnknownRouteClass => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                reason.code(),
                "Request could not be classified",
            ),
        };

        Some(match retry_after {
            Some(after) => error.with_retry_after(*after),
            None => error,
        })
    }
}

/// Whole seconds, rounded up, never zero.
fn retry_after_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.code,
                "message": self.message,
            }
        }));

        let mut response = (self.status, body).into_response();
        if let Some(after) = self.retry_after {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs(after).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
