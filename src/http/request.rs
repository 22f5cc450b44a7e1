//! Request identification and client helpers.
//!
//! # Responsibilities
//! - Generate a UUID v4 request id for requests that arrive without one
//! - Read the request id back for log correlation
//! - Parse JSON bodies, reporting garbage as malformed input
//!
//! # Design Decisions
//! - Request id is added as early as possible for tracing
//! - An id supplied by the client is kept as-is

use std::net::IpAddr;

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderValue, Request};
use serde::de::DeserializeOwned;
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::http::response::ApiError;
use crate::security::{SecurityLayer, ViolationKind};

pub const X_REQUEST_ID: &str = "x-request-id";

/// `MakeRequestId` backed by random UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidRequestId;

impl MakeRequestId for UuidRequestId {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        HeaderValue::from_str(&Uuid::new_v4().to_string())
            .ok()
            .map(RequestId::new)
    }
}

/// Request id for logging, `"unknown"` if absent.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}

/// Non-empty header value as a string.
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Decode a JSON body. A body that does not parse counts as malformed
/// input against the sender.
pub fn parse_json<T: DeserializeOwned>(
    layer: &SecurityLayer,
    addr: IpAddr,
    body: &Bytes,
) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(client = %addr, error = %e, "Unparseable request body");
        layer.report_violation(addr, ViolationKind::MalformedInput);
        ApiError::bad_request("malformed_body", "Request body is not valid JSON")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_uuid_request_id() {
        let request = Request::new(Body::empty());
        let id = UuidRequestId.make_request_id(&request).unwrap();
        let value = id.header_value().to_str().unwrap();
        assert!(Uuid::parse_str(value).is_ok());
    }

    #[test]
    fn test_header_str_ignores_blank() {
        let mut headers = HeaderMap::new();
        headers.insert("x-session-id", HeaderValue::from_static("   "));
        assert_eq!(header_str(&headers, "x-session-id"), None);
        assert_eq!(request_id(&headers), "unknown");
    }
}
