//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → GATEKEEPER_* environment overrides
//!     → validation.rs (semantic checks)
//!     → GatekeeperConfig (validated, immutable)
//!     → handed by value to SecurityLayer::new
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Every fault is reported at startup, never mid-request

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, AdmissionConfig, CsrfConfig, GatekeeperConfig, ObservabilityConfig,
    ReputationConfig, RouteClassConfig, RouteRule, SeverityTable, SweeperConfig, ThreatConfig,
};
