//! Shared utilities for integration tests.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use gatekeeper::config::GatekeeperConfig;
use gatekeeper::http::build_router;
use gatekeeper::security::SecurityLayer;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

/// Router and the layer behind it.
pub fn app(config: &GatekeeperConfig) -> (Router, Arc<SecurityLayer>) {
    let layer = Arc::new(SecurityLayer::new(config));
    (build_router(config, layer.clone()), layer)
}

/// Socket address of test client `n`.
pub fn client(n: u8) -> SocketAddr {
    SocketAddr::new(IpAddr::from([10, 0, 0, n]), 40_000)
}

/// Request from `from`, as if it arrived on a real connection.
pub fn request(method: &str, uri: &str, from: SocketAddr) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .extension(ConnectInfo(from))
}

pub fn json_request(uri: &str, from: SocketAddr, body: &Value) -> Request<Body> {
    request("POST", uri, from)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Send one request and decode the JSON body (`Null` when empty).
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, headers, body)
}

/// Error code from a `{"error": {"code": ..}}` body.
#[allow(dead_code)]
pub fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}
