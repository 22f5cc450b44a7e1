//! The owning service object for every security table.
//!
//! `SecurityLayer` is built once from configuration and shared by reference
//! (usually `Arc`) with request handlers. Its methods are the boundary the
//! rest of the application talks to: they take observations (address, text,
//! token, headers) and return decisions, and they close the loop by
//! reporting what they detect to the reputation ledger.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use serde::Serialize;

use crate::config::{GatekeeperConfig, RouteRule};
use crate::observability::metrics;
use crate::security::admin_session::{
    fingerprint_from_headers, AdminSessions, LoginLockout, SessionGrant, SessionRejection,
};
use crate::security::csrf::{CsrfLedger, CsrfRejection};
use crate::security::decision::Decision;
use crate::security::rate_limit::AdmissionController;
use crate::security::reputation::{ReputationLedger, ViolationKind};
use crate::security::sweeper::{run_sweep, SweepReport, Sweeper};
use crate::security::threat::{ThreatDetector, Validation};

/// Table sizes, safe to show to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LayerStats {
    pub rate_windows: usize,
    pub reputation_records: usize,
    pub blocklisted: usize,
    pub csrf_tokens: usize,
    pub admin_sessions: usize,
    pub login_records: usize,
}

pub struct SecurityLayer {
    pub(crate) reputation: Arc<ReputationLedger>,
    pub(crate) admission: AdmissionController,
    pub(crate) threat: ThreatDetector,
    pub(crate) csrf: CsrfLedger,
    pub(crate) admin: AdminSessions,
    pub(crate) rate_window_idle: Duration,
    sweep_interval: Duration,
    routes: Vec<RouteRule>,
}

impl SecurityLayer {
    pub fn new(config: &GatekeeperConfig) -> Self {
        let reputation = Arc::new(ReputationLedger::new(config.reputation.clone()));
        let admission = AdmissionController::new(config.admission.clone(), reputation.clone());

        // longest prefix wins
        let mut routes = config.routes.clone();
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        Self {
            reputation,
            admission,
            threat: ThreatDetector::new(config.threat.clone()),
            csrf: CsrfLedger::new(config.csrf.clone()),
            admin: AdminSessions::new(config.admin.clone()),
            rate_window_idle: Duration::from_secs(config.sweeper.rate_window_idle_secs),
            sweep_interval: Duration::from_secs(config.sweeper.interval_secs),
            routes,
        }
    }

    pub fn reputation(&self) -> &ReputationLedger {
        &self.reputation
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn csrf(&self) -> &CsrfLedger {
        &self.csrf
    }

    pub fn admin_sessions(&self) -> &AdminSessions {
        &self.admin
    }

    /// Route class for a request path.
    pub fn route_class(&self, path: &str) -> &str {
        self.routes
            .iter()
            .find(|rule| path.starts_with(&rule.prefix))
            .map(|rule| rule.class.as_str())
            .unwrap_or_else(|| self.admission.default_class())
    }

    /// Blocklist gate followed by admission control.
    pub fn admit(&self, addr: IpAddr, route_class: &str) -> Decision {
        self.admission.check(addr, route_class)
    }

    pub fn admit_at(&self, addr: IpAddr, route_class: &str, now: Instant) -> Decision {
        self.admission.check_at(addr, route_class, now)
    }

    pub fn is_blocked(&self, addr: &IpAddr) -> bool {
        self.reputation.is_blocked(addr)
    }

    /// Validate a user-supplied text field and report what was found.
    ///
    /// `max_length` falls back to the configured default.
    pub fn inspect_text(&self, addr: IpAddr, text: &str, max_length: Option<usize>) -> Validation {
        let max_length = max_length.unwrap_or_else(|| self.threat.default_max_length());
        let validation = self.threat.validate(text, max_length);

        if let Some(threat) = validation.threat {
            metrics::record_threat(threat.tag());
            if threat.is_hard() {
                tracing::warn!(client = %addr, threat = threat.tag(), "Injection attempt rejected");
            } else {
                tracing::debug!(client = %addr, threat = threat.tag(), "Text rejected");
            }
            if let Some(kind) = threat.violation() {
                self.reputation.record_violation(addr, kind);
            }
        }
        validation
    }

    /// Issue a CSRF token for `session_id` as seen from `addr`.
    ///
    /// Tokens are keyed by address and session together, so a request from
    /// another address cannot replace a token it does not own.
    pub fn issue_csrf(&self, addr: IpAddr, session_id: &str) -> String {
        self.issue_csrf_at(addr, session_id, Instant::now())
    }

    pub fn issue_csrf_at(&self, addr: IpAddr, session_id: &str, now: Instant) -> String {
        self.csrf.issue_at(&csrf_key(addr, session_id), now)
    }

    /// Spend a CSRF token. Replays, mismatches and missing tokens count as
    /// violations; plain expiry does not.
    pub fn verify_csrf(&self, addr: IpAddr, session_id: &str, token: &str) -> bool {
        self.verify_csrf_at(addr, session_id, token, Instant::now())
    }

    pub fn verify_csrf_at(&self, addr: IpAddr, session_id: &str, token: &str, now: Instant) -> bool {
        match self.csrf.check_at(&csrf_key(addr, session_id), token, now) {
            Ok(()) => true,
            Err(rejection) => {
                metrics::record_csrf_rejection(rejection.code());
                tracing::warn!(client = %addr, reason = rejection.code(), "CSRF token rejected");
                if rejection != CsrfRejection::Expired {
                    self.reputation
                        .record_violation_at(addr, ViolationKind::CsrfViolation, now);
                }
                false
            }
        }
    }

    pub fn fingerprint(&self, headers: &HeaderMap) -> String {
        fingerprint_from_headers(headers, self.admin.fingerprint_headers())
    }

    /// Report a violation detected outside the layer, such as an
    /// unparseable request body.
    pub fn report_violation(&self, addr: IpAddr, kind: ViolationKind) {
        self.reputation.record_violation(addr, kind);
    }

    pub fn verify_admin_secret(&self, candidate: &str) -> bool {
        self.admin.verify_secret(candidate)
    }

    pub fn admin_login_allowed(&self, addr: IpAddr) -> Result<(), LoginLockout> {
        self.admin.check_login(addr)
    }

    /// Count a failed login; the failure that triggers a lockout is also a
    /// brute-force violation.
    pub fn record_login_failure(&self, addr: IpAddr) {
        if self.admin.record_login_failure(addr) {
            self.reputation
                .record_violation(addr, ViolationKind::BruteForce);
        }
    }

    pub fn record_login_success(&self, addr: IpAddr) {
        self.admin.record_login_success(addr);
    }

    pub fn create_admin_session(&self, user_id: &str, fingerprint: &str) -> String {
        self.admin.create(user_id, fingerprint)
    }

    /// Validate an admin session; a fingerprint mismatch is reported as a
    /// suspicious pattern against the presenting address.
    pub fn validate_admin_session(
        &self,
        addr: IpAddr,
        session_id: &str,
        fingerprint: Option<&str>,
    ) -> Result<SessionGrant, SessionRejection> {
        let result = self.admin.validate(session_id, fingerprint);
        if let Err(rejection) = &result {
            metrics::record_session_rejection(rejection.code());
            if *rejection == SessionRejection::FingerprintMismatch {
                self.reputation
                    .record_violation(addr, ViolationKind::SuspiciousPattern);
            }
        }
        result
    }

    pub fn revoke_admin_session(&self, session_id: &str) -> bool {
        self.admin.revoke(session_id)
    }

    /// Run one sweep pass now.
    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> SweepReport {
        run_sweep(self, now)
    }

    /// Background sweeper for this layer on the configured interval.
    pub fn sweeper(self: &Arc<Self>) -> Sweeper {
        Sweeper::new(Arc::clone(self), self.sweep_interval)
    }

    pub fn stats(&self) -> LayerStats {
        LayerStats {
            rate_windows: self.admission.tracked(),
            reputation_records: self.reputation.tracked(),
            blocklisted: self.reputation.blocklist_len(),
            csrf_tokens: self.csrf.len(),
            admin_sessions: self.admin.session_count(),
            login_records: self.admin.login_record_count(),
        }
    }
}

fn csrf_key(addr: IpAddr, session_id: &str) -> String {
    format!("{addr}/{session_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer() -> SecurityLayer {
        SecurityLayer::new(&GatekeeperConfig::default())
    }

    #[test]
    fn test_route_class_longest_prefix() {
        let layer = layer();
        assert_eq!(layer.route_class("/api/messages"), "chat");
        assert_eq!(layer.route_class("/api/messages/42"), "chat");
        assert_eq!(layer.route_class("/admin/login"), "auth");
        assert_eq!(layer.route_class("/admin/status"), "api");
        assert_eq!(layer.route_class("/health"), "api");
    }

    #[test]
    fn test_route_class_falls_back_to_default() {
        let mut config = GatekeeperConfig::default();
        config.routes = vec![RouteRule::new("/api/messages", "chat")];
        let layer = SecurityLayer::new(&config);
        assert_eq!(layer.route_class("/other"), "api");
    }

    #[test]
    fn test_csrf_expiry_is_not_a_violation() {
        let layer = layer();
        let addr = IpAddr::from([10, 9, 9, 9]);
        let start = Instant::now();
        let token = layer.issue_csrf_at(addr, "s", start);

        let late = start + Duration::from_secs(3601);
        assert!(!layer.verify_csrf_at(addr, "s", &token, late));
        assert_eq!(layer.reputation().score(&addr), 100);

        assert!(!layer.verify_csrf_at(addr, "s", "forged", start));
        assert_eq!(layer.reputation().score(&addr), 60);
    }

    #[test]
    fn test_csrf_reissue_from_other_address_keeps_token() {
        let layer = layer();
        let owner = IpAddr::from([10, 9, 9, 1]);
        let other = IpAddr::from([10, 9, 9, 2]);
        let start = Instant::now();

        let token = layer.issue_csrf_at(owner, "shared", start);
        let foreign = layer.issue_csrf_at(other, "shared", start);
        assert_ne!(token, foreign);
        assert_eq!(layer.stats().csrf_tokens, 2);

        assert!(layer.verify_csrf_at(owner, "shared", &token, start));
        assert!(!layer.verify_csrf_at(other, "shared", &token, start));
    }
}
