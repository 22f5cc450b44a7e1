//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All security components produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (decision, violation and sweep counters)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields, never interpolated strings, for machine parsing
//! - Metrics are cheap (atomic increments) and safe to call with no exporter installed
//! - Per-address state never appears in metric labels

pub mod logging;
pub mod metrics;
