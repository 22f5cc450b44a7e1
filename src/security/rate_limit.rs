//! Admission control with penalty-scaled per-key windows.
//!
//! # Responsibilities
//! - Refuse blocklisted addresses before anything else
//! - Enforce a process-wide budget per global window
//! - Count requests per (address, route class) in fixed windows
//! - Detect bursts inside a short trailing window
//! - Tighten a key's budget and block it progressively on each violation
//!
//! # Design Decisions
//! - One `RateWindow` per key in a sharded map; the read-modify-write for a
//!   key happens under that key's entry guard, so different keys only share
//!   a shard lock, never a global one
//! - The global budget is two atomics, not a lock
//! - Violations are reported to the reputation ledger after the entry guard
//!   is released

use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::{AdmissionConfig, RouteClassConfig};
use crate::observability::metrics;
use crate::security::decision::{Decision, DenyReason};
use crate::security::reputation::{ReputationLedger, ViolationKind};

/// Map key for rate windows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    pub addr: IpAddr,
    pub route_class: String,
}

impl ClientKey {
    pub fn new(addr: IpAddr, route_class: &str) -> Self {
        Self {
            addr,
            route_class: route_class.to_string(),
        }
    }
}

/// Counting state for one key.
#[derive(Debug, Clone)]
pub struct RateWindow {
    pub count: u32,
    pub window_start: Instant,
    pub blocked_until: Option<Instant>,
    pub penalties: u32,
    pub last_seen: Instant,
    recent: VecDeque<Instant>,
}

enum WindowOutcome {
    Admitted,
    Blocked(Duration),
    Violation {
        reason: DenyReason,
        block: Duration,
        penalties: u32,
    },
}

impl RateWindow {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
            blocked_until: None,
            penalties: 0,
            last_seen: now,
            recent: VecDeque::new(),
        }
    }

    fn observe(
        &mut self,
        now: Instant,
        class: &RouteClassConfig,
        config: &AdmissionConfig,
    ) -> WindowOutcome {
        self.last_seen = now;

        if let Some(until) = self.blocked_until {
            if now < until {
                return WindowOutcome::Blocked(until - now);
            }
            self.blocked_until = None;
        }

        if now.saturating_duration_since(self.window_start) > Duration::from_secs(class.window_secs)
        {
            self.count = 0;
            self.window_start = now;
        }
        self.count = self.count.saturating_add(1);

        let burst_window = Duration::from_secs(config.burst_window_secs);
        self.recent.push_back(now);
        while let Some(front) = self.recent.front() {
            if now.saturating_duration_since(*front) >= burst_window {
                self.recent.pop_front();
            } else {
                break;
            }
        }

        let limit = effective_limit(class.limit, self.penalties, config);
        let burst = class.burst as usize;
        let (reason, excess) = if self.recent.len() > burst {
            (DenyReason::Burst, (self.recent.len() - burst) as u64)
        } else if self.count > limit {
            (DenyReason::RateLimited, u64::from(self.count - limit))
        } else {
            return WindowOutcome::Admitted;
        };

        self.penalties = self.penalties.saturating_add(1);
        let minutes = excess.clamp(1, config.block_cap_minutes);
        let block = Duration::from_secs(minutes * 60);
        self.blocked_until = Some(now + block);

        WindowOutcome::Violation {
            reason,
            block,
            penalties: self.penalties,
        }
    }
}

/// `base × (1 − penalties × factor)`, never below `min_limit`.
pub fn effective_limit(base: u32, penalties: u32, config: &AdmissionConfig) -> u32 {
    let scale = (1.0 - f64::from(penalties) * config.penalty_factor).max(0.0);
    // epsilon keeps e.g. 10 × 0.7 from flooring to 6
    let scaled = (f64::from(base) * scale + 1e-9).floor() as u32;
    scaled.max(config.min_limit)
}

const COUNT_BITS: u32 = 32;
const COUNT_MASK: u64 = (1 << COUNT_BITS) - 1;

fn pack_global(window: u64, count: u64) -> u64 {
    (window << COUNT_BITS) | (count & COUNT_MASK)
}

fn unpack_global(packed: u64) -> (u64, u64) {
    (packed >> COUNT_BITS, packed & COUNT_MASK)
}

/// Per-key and global admission control.
pub struct AdmissionController {
    windows: DashMap<ClientKey, RateWindow>,
    /// Global window index in the high half, its request count in the low half.
    global: AtomicU64,
    origin: Instant,
    config: AdmissionConfig,
    reputation: Arc<ReputationLedger>,
}

impl AdmissionController {
    pub fn new(config: AdmissionConfig, reputation: Arc<ReputationLedger>) -> Self {
        Self {
            windows: DashMap::new(),
            global: AtomicU64::new(0),
            origin: Instant::now(),
            config,
            reputation,
        }
    }

    pub fn default_class(&self) -> &str {
        &self.config.default_class
    }

    /// Decide whether a request from `addr` on `route_class` is admitted.
    pub fn check(&self, addr: IpAddr, route_class: &str) -> Decision {
        self.check_at(addr, route_class, Instant::now())
    }

    pub fn check_at(&self, addr: IpAddr, route_class: &str, now: Instant) -> Decision {
        let decision = self.decide(addr, route_class, now);
        metrics::record_decision(route_class, decision.outcome());
        decision
    }

    fn decide(&self, addr: IpAddr, route_class: &str, now: Instant) -> Decision {
        if self.reputation.is_blocked(&addr) {
            tracing::debug!(client = %addr, "Blocklisted address refused");
            return Decision::deny(DenyReason::Blocklisted);
        }

        let Some(class) = self.config.classes.get(route_class) else {
            tracing::error!(route = %route_class, "No budget configured for route class");
            return Decision::deny(DenyReason::UnknownRouteClass);
        };

        if let Err(retry_after) = self.admit_global(now) {
            tracing::warn!(client = %addr, "Global request budget exhausted");
            return Decision::deny_for(DenyReason::GlobalBudget, retry_after);
        }

        let outcome = {
            let mut window = self
                .windows
                .entry(ClientKey::new(addr, route_class))
                .or_insert_with(|| RateWindow::new(now));
            window.observe(now, class, &self.config)
        };

        match outcome {
            WindowOutcome::Admitted => Decision::Allow,
            WindowOutcome::Blocked(remaining) => {
                Decision::deny_for(DenyReason::RateLimited, remaining)
            }
            WindowOutcome::Violation {
                reason,
                block,
                penalties,
            } => {
                tracing::warn!(
                    client = %addr,
                    route = %route_class,
                    reason = reason.code(),
                    penalties,
                    block_secs = block.as_secs(),
                    "Rate limit exceeded"
                );
                self.reputation
                    .record_violation_at(addr, ViolationKind::RateLimit, now);
                Decision::deny_for(reason, block)
            }
        }
    }

    /// Count one request against the global budget. On refusal returns the
    /// time left in the current global window.
    ///
    /// Window index and count change together in one compare-and-swap, so a
    /// window rollover can never discard increments made in the new window.
    fn admit_global(&self, now: Instant) -> Result<(), Duration> {
        let window_secs = self.config.global_window_secs;
        let elapsed = now.saturating_duration_since(self.origin).as_secs();
        let window = (elapsed / window_secs).min(COUNT_MASK);

        let mut packed = self.global.load(Ordering::Acquire);
        let (slot, count) = loop {
            let (current, count) = unpack_global(packed);
            // a caller holding an older `now` counts against the newer window
            let next = if window > current {
                (window, 1)
            } else {
                (current, (count + 1).min(COUNT_MASK))
            };
            match self.global.compare_exchange_weak(
                packed,
                pack_global(next.0, next.1),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break next,
                Err(actual) => packed = actual,
            }
        };

        if count > self.config.global_limit {
            let remaining = ((slot + 1) * window_secs).saturating_sub(elapsed);
            Err(Duration::from_secs(remaining.max(1)))
        } else {
            Ok(())
        }
    }

    /// Copy of the window for a key, if one exists.
    pub fn window(&self, addr: IpAddr, route_class: &str) -> Option<RateWindow> {
        self.windows
            .get(&ClientKey::new(addr, route_class))
            .map(|w| w.value().clone())
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    /// Drop windows idle longer than `idle`. A window still serving a block
    /// is kept until the block ends.
    pub fn sweep_at(&self, now: Instant, idle: Duration) -> usize {
        let mut removed = 0;
        self.windows.retain(|_, window| {
            let blocked = window.blocked_until.is_some_and(|until| now < until);
            let keep = blocked || now.saturating_duration_since(window.last_seen) <= idle;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReputationConfig;

    fn controller(config: AdmissionConfig) -> (AdmissionController, Arc<ReputationLedger>) {
        let reputation = Arc::new(ReputationLedger::new(ReputationConfig::default()));
        (AdmissionController::new(config, reputation.clone()), reputation)
    }

    fn config_with(class: &str, limit: u32, burst: u32) -> AdmissionConfig {
        let mut config = AdmissionConfig::default();
        config
            .classes
            .insert(class.to_string(), RouteClassConfig::new(limit, 60, burst));
        config
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([172, 16, 0, last])
    }

    #[test]
    fn test_window_limit_and_reset() {
        let (adm, _) = controller(config_with("test", 5, 10));
        let addr = ip(1);
        let start = Instant::now();

        for i in 0..5 {
            let now = start + Duration::from_secs(i * 2);
            assert_eq!(adm.check_at(addr, "test", now), Decision::Allow);
        }
        let denied = adm.check_at(addr, "test", start + Duration::from_secs(10));
        assert_eq!(denied.reason(), Some(DenyReason::RateLimited));
        assert_eq!(denied.retry_after(), Some(Duration::from_secs(60)));

        let next_window = start + Duration::from_secs(71);
        assert_eq!(adm.check_at(addr, "test", next_window), Decision::Allow);
        let window = adm.window(addr, "test").unwrap();
        assert_eq!(window.count, 1);
        assert_eq!(window.penalties, 1);
    }

    #[test]
    fn test_burst_denied_before_budget() {
        let (adm, reputation) = controller(config_with("test", 100, 5));
        let addr = ip(2);
        let now = Instant::now();

        for _ in 0..5 {
            assert!(adm.check_at(addr, "test", now).is_allowed());
        }
        let denied = adm.check_at(addr, "test", now);
        assert_eq!(denied.reason(), Some(DenyReason::Burst));
        assert_eq!(adm.window(addr, "test").unwrap().penalties, 1);
        assert_eq!(reputation.score(&addr), 90);
    }

    #[test]
    fn test_block_is_honored() {
        let (adm, _) = controller(config_with("test", 2, 10));
        let addr = ip(3);
        let start = Instant::now();

        adm.check_at(addr, "test", start);
        adm.check_at(addr, "test", start);
        assert!(!adm.check_at(addr, "test", start).is_allowed());

        let during = adm.check_at(addr, "test", start + Duration::from_secs(30));
        assert_eq!(during.reason(), Some(DenyReason::RateLimited));
        assert_eq!(during.retry_after(), Some(Duration::from_secs(30)));
        // refused requests while blocked are not new violations
        assert_eq!(adm.window(addr, "test").unwrap().penalties, 1);
    }

    #[test]
    fn test_penalties_tighten_limit() {
        let config = AdmissionConfig::default();
        assert_eq!(effective_limit(10, 0, &config), 10);
        assert_eq!(effective_limit(10, 3, &config), 7);
        assert_eq!(effective_limit(10, 9, &config), 1);
        assert_eq!(effective_limit(10, 50, &config), 1);
        assert_eq!(effective_limit(100, u32::MAX, &config), 1);
    }

    #[test]
    fn test_ratchet_across_windows() {
        let (adm, _) = controller(config_with("test", 10, 100));
        let addr = ip(4);
        let mut window_start = Instant::now();

        // each window: exhaust the budget once, then wait out block and window
        for expected_limit in [10u32, 9, 8] {
            for i in 0..expected_limit {
                let now = window_start + Duration::from_millis(u64::from(i));
                assert!(adm.check_at(addr, "test", now).is_allowed());
            }
            let now = window_start + Duration::from_millis(500);
            assert!(!adm.check_at(addr, "test", now).is_allowed());
            window_start += Duration::from_secs(61);
        }
    }

    #[test]
    fn test_progressive_block_is_capped() {
        let mut config = AdmissionConfig::default();
        config
            .classes
            .insert("test".to_string(), RouteClassConfig::new(10, 3600, 1000));
        config.block_cap_minutes = 3;
        let (adm, _) = controller(config);
        let addr = ip(5);
        let mut now = Instant::now();

        for _ in 0..10 {
            assert!(adm.check_at(addr, "test", now).is_allowed());
        }
        let first = adm.check_at(addr, "test", now);
        assert_eq!(first.retry_after(), Some(Duration::from_secs(60)));

        // same window: count 12 against a tightened limit of 9
        now += Duration::from_secs(60);
        let second = adm.check_at(addr, "test", now);
        assert_eq!(second.retry_after(), Some(Duration::from_secs(180)));

        // count 13 against 8 would be five minutes
        now += Duration::from_secs(180);
        let third = adm.check_at(addr, "test", now);
        assert_eq!(third.retry_after(), Some(Duration::from_secs(180)));
        assert_eq!(adm.window(addr, "test").unwrap().penalties, 3);
    }

    #[test]
    fn test_keys_are_independent() {
        let (adm, _) = controller(config_with("test", 1, 10));
        let now = Instant::now();

        assert!(adm.check_at(ip(6), "test", now).is_allowed());
        assert!(!adm.check_at(ip(6), "test", now).is_allowed());
        assert!(adm.check_at(ip(7), "test", now).is_allowed());
        assert!(adm.check_at(ip(6), "api", now).is_allowed());
    }

    #[test]
    fn test_global_budget() {
        let mut config = config_with("test", 100, 100);
        config.global_limit = 3;
        let (adm, reputation) = controller(config);
        let start = Instant::now();

        for last in 0..3 {
            assert!(adm.check_at(ip(last), "test", start).is_allowed());
        }
        let denied = adm.check_at(ip(9), "test", start);
        assert_eq!(denied.reason(), Some(DenyReason::GlobalBudget));
        assert!(reputation.snapshot(&ip(9)).is_none());

        let later = start + Duration::from_secs(61);
        assert!(adm.check_at(ip(9), "test", later).is_allowed());
    }

    #[test]
    fn test_global_budget_exact_across_rollover() {
        let mut config = config_with("test", 100, 100);
        config.global_limit = 300;
        let (adm, _) = controller(config);
        let start = Instant::now();

        // leave the first window exhausted
        for n in 0..=255u8 {
            adm.check_at(IpAddr::from([172, 17, 0, n]), "test", start);
        }
        for n in 0..50u8 {
            adm.check_at(IpAddr::from([172, 17, 1, n]), "test", start);
        }

        let next = start + Duration::from_secs(60);
        let admitted: usize = std::thread::scope(|s| {
            let adm = &adm;
            let handles: Vec<_> = (0..8u8)
                .map(|t| {
                    s.spawn(move || {
                        (0..100u8)
                            .filter(|&i| {
                                adm.check_at(IpAddr::from([172, 18, t, i]), "test", next)
                                    .is_allowed()
                            })
                            .count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        // 800 requests in the new window against a budget of 300
        assert_eq!(admitted, 300);
        assert_eq!(unpack_global(adm.global.load(Ordering::Acquire)), (1, 800));
    }

    #[test]
    fn test_unknown_class_fails_closed() {
        let (adm, _) = controller(AdmissionConfig::default());
        let denied = adm.check(ip(8), "uploads");
        assert_eq!(denied.reason(), Some(DenyReason::UnknownRouteClass));
    }

    #[test]
    fn test_blocklisted_refused_first() {
        let (adm, reputation) = controller(AdmissionConfig::default());
        let addr = ip(10);
        reputation.record_violation(addr, ViolationKind::SqlInjection);
        reputation.record_violation(addr, ViolationKind::SqlInjection);

        let denied = adm.check(addr, "api");
        assert_eq!(denied.reason(), Some(DenyReason::Blocklisted));
        assert_eq!(adm.tracked(), 0);
    }

    #[test]
    fn test_sweep_keeps_blocked_windows() {
        let (adm, _) = controller(config_with("test", 1, 10));
        let start = Instant::now();

        adm.check_at(ip(11), "test", start);
        adm.check_at(ip(12), "test", start);
        assert!(!adm.check_at(ip(12), "test", start).is_allowed());

        let removed = adm.sweep_at(start + Duration::from_secs(50), Duration::from_secs(30));
        assert_eq!(removed, 1);
        assert!(adm.window(ip(11), "test").is_none());
        assert!(adm.window(ip(12), "test").is_some());

        let removed = adm.sweep_at(start + Duration::from_secs(61), Duration::from_secs(30));
        assert_eq!(removed, 1);
        assert_eq!(adm.tracked(), 0);
    }
}
