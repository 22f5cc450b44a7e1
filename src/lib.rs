//! Gatekeeper library: admission control, threat detection, CSRF tokens,
//! admin sessions and address reputation behind one `SecurityLayer`.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::schema::GatekeeperConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use security::SecurityLayer;
