//! Route handlers.
//!
//! These are thin: each one turns a request into calls on the security
//! layer and a JSON answer. Handlers never see per-address state.

use std::net::SocketAddr;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::http::request::{header_str, parse_json};
use crate::http::response::ApiError;
use crate::http::server::AppState;

pub const X_SESSION_ID: &str = "x-session-id";
pub const X_ADMIN_SESSION: &str = "x-admin-session";

const MAX_SESSION_ID_LEN: usize = 128;
const MAX_USER_ID_LEN: usize = 64;

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub session_id: String,
    pub csrf_token: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub user: String,
    pub secret: String,
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Issue a CSRF token for the session named in `x-session-id`, bound to the
/// requesting address.
pub async fn csrf_token(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let session_id = header_str(&headers, X_SESSION_ID)
        .filter(|id| id.len() <= MAX_SESSION_ID_LEN)
        .ok_or_else(|| ApiError::bad_request("missing_session", "x-session-id header is required"))?;

    let token = state.layer.issue_csrf(addr.ip(), session_id);
    Ok(Json(json!({ "csrf_token": token })))
}

/// Accept a chat message: spend the CSRF token, then validate the text.
pub async fn post_message(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let client = addr.ip();
    let request: MessageRequest = parse_json(&state.layer, client, &body)?;

    if !state
        .layer
        .verify_csrf(client, &request.session_id, &request.csrf_token)
    {
        return Err(ApiError::forbidden(
            "csrf_rejected",
            "Missing, used or expired CSRF token",
        ));
    }

    let validation = state.layer.inspect_text(client, &request.message, None);
    match validation.sanitized {
        Some(sanitized) if validation.valid => Ok(Json(json!({
            "accepted": true,
            "message": sanitized,
        }))),
        _ => Err(ApiError::bad_request("invalid_input", "Message was rejected")),
    }
}

/// Exchange the admin secret for a session bound to this client's fingerprint.
pub async fn admin_login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let client = addr.ip();

    if let Err(lockout) = state.layer.admin_login_allowed(client) {
        return Err(ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "login_locked",
            "Too many failed login attempts",
        )
        .with_retry_after(lockout.retry_after));
    }

    let request: LoginRequest = parse_json(&state.layer, client, &body)?;

    let user = state
        .layer
        .inspect_text(client, &request.user, Some(MAX_USER_ID_LEN));
    let Some(user) = user.sanitized.filter(|_| user.valid) else {
        return Err(ApiError::bad_request("invalid_input", "Invalid user name"));
    };

    if !state.layer.verify_admin_secret(&request.secret) {
        state.layer.record_login_failure(client);
        tracing::warn!(client = %client, user = %user, "Admin login failed");
        return Err(ApiError::unauthorized(
            "invalid_credentials",
            "Invalid credentials",
        ));
    }

    state.layer.record_login_success(client);
    let fingerprint = state.layer.fingerprint(&headers);
    let session_id = state.layer.create_admin_session(&user, &fingerprint);
    Ok(Json(json!({ "session_id": session_id })))
}

/// Table sizes for operators holding a valid admin session.
pub async fn admin_status(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let client = addr.ip();
    let session_id = header_str(&headers, X_ADMIN_SESSION)
        .ok_or_else(|| ApiError::unauthorized("session_missing", "Admin session required"))?;

    let fingerprint = state.layer.fingerprint(&headers);
    let grant = state
        .layer
        .validate_admin_session(client, session_id, Some(&fingerprint))
        .map_err(|rejection| ApiError::unauthorized(rejection.code(), "Admin session rejected"))?;

    if !grant.allows("admin") {
        return Err(ApiError::forbidden("permission_denied", "Missing permission"));
    }

    Ok(Json(json!({
        "user": grant.user_id,
        "stats": state.layer.stats(),
    })))
}

/// Revoke the presented admin session.
pub async fn admin_logout(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let session_id = header_str(&headers, X_ADMIN_SESSION)
        .ok_or_else(|| ApiError::unauthorized("session_missing", "Admin session required"))?;

    let fingerprint = state.layer.fingerprint(&headers);
    state
        .layer
        .validate_admin_session(addr.ip(), session_id, Some(&fingerprint))
        .map_err(|rejection| ApiError::unauthorized(rejection.code(), "Admin session rejected"))?;

    state.layer.revoke_admin_session(session_id);
    Ok(StatusCode::NO_CONTENT)
}
