//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request id, timeout, tracing)
//!     → middleware.rs (route class → SecurityLayer::admit)
//!     → handlers.rs (CSRF, threat validation, admin sessions)
//!     → response.rs (JSON errors, Retry-After)
//!     → Send to client
//! ```

pub mod handlers;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::X_REQUEST_ID;
pub use response::ApiError;
pub use server::{build_router, AppState, HttpServer};
