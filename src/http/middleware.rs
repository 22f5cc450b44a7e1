//! Admission middleware.
//!
//! Runs before every guarded handler: resolves the route class from the
//! request path, asks the security layer for a decision, and either passes
//! the request on or answers with the denial.

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::request::request_id;
use crate::http::response::ApiError;
use crate::http::server::AppState;

pub async fn admission_middleware(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client = addr.ip();
    let route_class = state.layer.route_class(request.uri().path()).to_string();
    let decision = state.layer.admit(client, &route_class);

    match ApiError::from_decision(&decision) {
        None => next.run(request).await,
        Some(error) => {
            tracing::info!(
                request_id = %request_id(request.headers()),
                client = %client,
                route = %route_class,
                reason = error.code,
                "Request denied"
            );
            error.into_response()
        }
    }
}
