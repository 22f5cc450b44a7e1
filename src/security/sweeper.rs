//! Periodic cleanup of idle security state.
//!
//! # Responsibilities
//! - Bound memory by dropping entries past their per-table retention
//! - Run on a fixed interval until shutdown is signalled
//!
//! # Retention
//! ```text
//! rate windows        idle > sweeper.rate_window_idle_secs (unless still blocked)
//! reputation records  idle > reputation.retention_secs AND score >= retention_min_score
//! csrf tokens         used OR older than csrf.token_ttl_secs
//! admin sessions      expired OR idle > admin.session_idle_secs
//! login records       idle > admin.login_retention_secs
//! blocklist           never
//! ```
//!
//! # Design Decisions
//! - Each table is filtered with `retain`, which holds one shard lock at a
//!   time; concurrent readers never observe a half-applied pass
//! - Retention is judged against the time the pass started, so entries
//!   touched during the pass always survive it
//! - A pass can be run synchronously (`SecurityLayer::sweep_at`) for tests

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::observability::metrics;
use crate::security::layer::SecurityLayer;

/// Entries removed from each table by one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub rate_windows: usize,
    pub reputation_records: usize,
    pub csrf_tokens: usize,
    pub admin_sessions: usize,
    pub login_records: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.rate_windows
            + self.reputation_records
            + self.csrf_tokens
            + self.admin_sessions
            + self.login_records
    }
}

/// One sweep pass over every table, judged at `now`.
pub(crate) fn run_sweep(layer: &SecurityLayer, now: Instant) -> SweepReport {
    let rate_windows = layer.admission.sweep_at(now, layer.rate_window_idle);
    let reputation_records = layer.reputation.sweep_at(now);
    let csrf_tokens = layer.csrf.sweep_at(now);
    let (admin_sessions, login_records) = layer.admin.sweep_at(now);

    let report = SweepReport {
        rate_windows,
        reputation_records,
        csrf_tokens,
        admin_sessions,
        login_records,
    };

    metrics::record_sweep("rate_windows", rate_windows);
    metrics::record_sweep("reputation", reputation_records);
    metrics::record_sweep("csrf_tokens", csrf_tokens);
    metrics::record_sweep("admin_sessions", admin_sessions);
    metrics::record_sweep("login_attempts", login_records);

    tracing::debug!(
        rate_windows,
        reputation_records,
        csrf_tokens,
        admin_sessions,
        login_records,
        "Sweep completed"
    );
    report
}

/// Background task that sweeps a `SecurityLayer` on an interval.
pub struct Sweeper {
    layer: Arc<SecurityLayer>,
    interval: Duration,
}

impl Sweeper {
    pub fn new(layer: Arc<SecurityLayer>, interval: Duration) -> Self {
        Self { layer, interval }
    }

    /// Sweep every interval until `shutdown` fires or its sender is dropped.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Sweeper starting");

        let mut ticker = time::interval(self.interval);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.layer.sweep();
                    if report.total() > 0 {
                        tracing::info!(removed = report.total(), "Sweeper removed idle entries");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatekeeperConfig;
    use crate::lifecycle::Shutdown;
    use crate::security::reputation::ViolationKind;
    use std::net::IpAddr;

    #[test]
    fn test_sweep_report_per_table() {
        let layer = SecurityLayer::new(&GatekeeperConfig::default());
        let addr = IpAddr::from([10, 2, 3, 4]);
        let start = Instant::now();

        layer.admit_at(addr, "api", start);
        layer.reputation.record_violation_at(addr, ViolationKind::Spam, start);
        layer.csrf.issue_at("s1", start);
        layer
            .admin
            .create_at("root", "fp", Default::default(), start);
        layer.admin.record_login_failure_at(addr, start);

        assert_eq!(layer.sweep_at(start + Duration::from_secs(60)).total(), 0);

        let report = layer.sweep_at(start + Duration::from_secs(25 * 60 * 60));
        assert_eq!(
            report,
            SweepReport {
                rate_windows: 1,
                reputation_records: 1,
                csrf_tokens: 1,
                admin_sessions: 1,
                login_records: 1,
            }
        );
        assert_eq!(layer.stats().rate_windows, 0);
    }

    #[test]
    fn test_entries_touched_after_pass_start_survive() {
        let layer = SecurityLayer::new(&GatekeeperConfig::default());
        let addr = IpAddr::from([10, 2, 3, 5]);
        let start = Instant::now();

        layer.admit_at(addr, "api", start);
        let pass_start = start + Duration::from_secs(301);
        // touched after the pass began
        layer.admit_at(addr, "api", pass_start + Duration::from_millis(5));

        assert_eq!(layer.sweep_at(pass_start).rate_windows, 0);
        assert!(layer.admission().window(addr, "api").is_some());
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_shutdown() {
        let layer = Arc::new(SecurityLayer::new(&GatekeeperConfig::default()));
        let shutdown = Shutdown::new();
        let handle = Sweeper::new(layer, Duration::from_millis(10)).spawn(shutdown.subscribe());

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper did not stop")
            .unwrap();
    }
}
