//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with all handlers
//! - Wire up middleware (admission, timeout, request id, tracing)
//! - Bind the server to a listener and serve until shutdown
//!
//! # Design Decisions
//! - `/health` sits outside admission so probes never spend client budgets
//! - Client address comes from the socket (`ConnectInfo`), never from headers

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GatekeeperConfig;
use crate::http::handlers;
use crate::http::middleware::admission_middleware;
use crate::http::request::UuidRequestId;
use crate::security::SecurityLayer;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub layer: Arc<SecurityLayer>,
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(config: &GatekeeperConfig, layer: Arc<SecurityLayer>) -> Router {
    let state = AppState { layer };

    Router::new()
        .route("/api/csrf-token", get(handlers::csrf_token))
        .route("/api/messages", post(handlers::post_message))
        .route("/admin/login", post(handlers::admin_login))
        .route("/admin/status", get(handlers::admin_status))
        .route("/admin/logout", post(handlers::admin_logout))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admission_middleware,
        ))
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.timeouts.request_secs,
                ))),
        )
}

/// HTTP front end for the security layer.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &GatekeeperConfig, layer: Arc<SecurityLayer>) -> Self {
        Self {
            router: build_router(config, layer),
        }
    }

    /// Serve on `listener` until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
