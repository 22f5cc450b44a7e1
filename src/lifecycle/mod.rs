//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Ctrl-C / SIGTERM → trigger() → HTTP server drains, Sweeper exits
//! ```
//!
//! # Design Decisions
//! - One broadcast channel; every long-running task subscribes
//! - Startup is linear in main: config, logging, metrics, layer, tasks, listener

pub mod shutdown;

pub use shutdown::{wait_for_signal, Shutdown};
