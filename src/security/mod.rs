//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → reputation.rs (blocklisted? deny)
//!     → rate_limit.rs (global budget, per-key window, burst)
//!     → handler:
//!         threat.rs        (validate free text)
//!         csrf.rs          (spend one-time token)
//!         admin_session.rs (login lockout, session + fingerprint)
//!
//! Detections:
//!     rate_limit / threat / csrf / admin_session
//!         → layer.rs → reputation.rs (score down, maybe blocklist)
//!
//! Background:
//!     sweeper.rs → every table except the blocklist
//! ```
//!
//! # Design Decisions
//! - Fail closed: reject on any security check failure
//! - One owner: `SecurityLayer` holds every table, nothing is global
//! - Every table is a sharded concurrent map; no request holds a lock
//!   across an await point

pub mod admin_session;
pub mod csrf;
pub mod decision;
pub mod layer;
pub mod rate_limit;
pub mod reputation;
pub mod sweeper;
pub mod threat;

pub use admin_session::{
    fingerprint_from_headers, AdminSessions, LoginLockout, SessionGrant, SessionRejection,
};
pub use csrf::{CsrfLedger, CsrfRejection};
pub use decision::{Decision, DenyReason};
pub use layer::{LayerStats, SecurityLayer};
pub use rate_limit::{AdmissionController, ClientKey, RateWindow};
pub use reputation::{BlockTrigger, ReputationLedger, ViolationKind};
pub use sweeper::{SweepReport, Sweeper};
pub use threat::{sanitize, Threat, ThreatDetector, Validation};
