//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gatekeeper_decisions_total` (counter): admission decisions by route class, outcome
//! - `gatekeeper_violations_total` (counter): violations reported to the reputation ledger
//! - `gatekeeper_blocklist_size` (gauge): addresses on the permanent blocklist
//! - `gatekeeper_threats_total` (counter): free-text rejections by threat tag
//! - `gatekeeper_csrf_rejections_total` (counter): token rejections by reason
//! - `gatekeeper_session_rejections_total` (counter): admin session rejections by reason
//! - `gatekeeper_sweep_removed_total` (counter): entries dropped by the sweeper, by table

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with its own HTTP listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_decision(route_class: &str, outcome: &'static str) {
    counter!(
        "gatekeeper_decisions_total",
        "route_class" => route_class.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_violation(kind: &'static str) {
    counter!("gatekeeper_violations_total", "kind" => kind).increment(1);
}

pub fn record_blocklist_size(size: usize) {
    gauge!("gatekeeper_blocklist_size").set(size as f64);
}

pub fn record_threat(tag: &'static str) {
    counter!("gatekeeper_threats_total", "threat" => tag).increment(1);
}

pub fn record_csrf_rejection(reason: &'static str) {
    counter!("gatekeeper_csrf_rejections_total", "reason" => reason).increment(1);
}

pub fn record_session_rejection(reason: &'static str) {
    counter!("gatekeeper_session_rejections_total", "reason" => reason).increment(1);
}

pub fn record_sweep(table: &'static str, removed: usize) {
    counter!("gatekeeper_sweep_removed_total", "table" => table).increment(removed as u64);
}
