//! Per-address reputation and the permanent blocklist.
//!
//! # Responsibilities
//! - Track a trust score per address, starting at `initial_score`
//! - Keep a bounded, ordered history of violations
//! - Promote addresses into the blocklist on low score or violation density
//!
//! # Design Decisions
//! - Scores only ever decrease; there is no healing path
//! - Blocklist membership lasts for the process lifetime and is never swept
//! - Blocklist lookups are a single set probe so they can run before anything else

use std::collections::VecDeque;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};

use crate::config::{ReputationConfig, SeverityTable};
use crate::observability::metrics;

/// Category of abuse reported against an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViolationKind {
    SqlInjection,
    Xss,
    CsrfViolation,
    BruteForce,
    SuspiciousPattern,
    RateLimit,
    MalformedInput,
    Spam,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::SqlInjection => "sql_injection",
            ViolationKind::Xss => "xss",
            ViolationKind::CsrfViolation => "csrf_violation",
            ViolationKind::BruteForce => "brute_force",
            ViolationKind::SuspiciousPattern => "suspicious_pattern",
            ViolationKind::RateLimit => "rate_limit",
            ViolationKind::MalformedInput => "malformed_input",
            ViolationKind::Spam => "spam",
        }
    }
}

impl SeverityTable {
    /// Score penalty for one violation of `kind`.
    pub fn weight(&self, kind: ViolationKind) -> u8 {
        match kind {
            ViolationKind::SqlInjection => self.sql_injection,
            ViolationKind::Xss => self.xss,
            ViolationKind::CsrfViolation => self.csrf_violation,
            ViolationKind::BruteForce => self.brute_force,
            ViolationKind::SuspiciousPattern => self.suspicious_pattern,
            ViolationKind::RateLimit => self.rate_limit,
            ViolationKind::MalformedInput => self.malformed_input,
            ViolationKind::Spam => self.spam,
        }
    }
}

/// A single recorded violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    pub at: Instant,
}

/// Reputation state for one address.
#[derive(Debug, Clone)]
pub struct ReputationRecord {
    pub score: u8,
    pub violations: VecDeque<Violation>,
    pub last_activity: Instant,
}

impl ReputationRecord {
    fn new(score: u8, now: Instant) -> Self {
        Self {
            score,
            violations: VecDeque::new(),
            last_activity: now,
        }
    }

    fn recent(&self, now: Instant, window: Duration) -> usize {
        self.violations
            .iter()
            .rev()
            .take_while(|v| now.saturating_duration_since(v.at) <= window)
            .count()
    }
}

/// Why an address was promoted into the blocklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTrigger {
    Score,
    Density,
}

/// Concurrent reputation table plus the permanent blocklist.
pub struct ReputationLedger {
    records: DashMap<IpAddr, ReputationRecord>,
    blocklist: DashSet<IpAddr>,
    config: ReputationConfig,
}

impl ReputationLedger {
    pub fn new(config: ReputationConfig) -> Self {
        Self {
            records: DashMap::new(),
            blocklist: DashSet::new(),
            config,
        }
    }

    /// Blocklist membership.
    pub fn is_blocked(&self, addr: &IpAddr) -> bool {
        self.blocklist.contains(addr)
    }

    /// Current score; unseen addresses have the initial score.
    pub fn score(&self, addr: &IpAddr) -> u8 {
        self.records
            .get(addr)
            .map(|r| r.score)
            .unwrap_or(self.config.initial_score)
    }

    /// Record a violation. Returns the trigger if this call blocklisted the address.
    pub fn record_violation(&self, addr: IpAddr, kind: ViolationKind) -> Option<BlockTrigger> {
        self.record_violation_at(addr, kind, Instant::now())
    }

    pub fn record_violation_at(
        &self,
        addr: IpAddr,
        kind: ViolationKind,
        now: Instant,
    ) -> Option<BlockTrigger> {
        let weight = self.config.severity.weight(kind);
        let window = Duration::from_secs(self.config.density_window_secs);

        let (score, recent) = {
            let mut record = self
                .records
                .entry(addr)
                .or_insert_with(|| ReputationRecord::new(self.config.initial_score, now));

            if record.score > self.config.initial_score {
                tracing::error!(
                    client = %addr,
                    score = record.score,
                    initial = self.config.initial_score,
                    "Reputation score above initial value, forcing to zero"
                );
                record.score = 0;
            }

            record.score = record.score.saturating_sub(weight);
            record.violations.push_back(Violation { kind, at: now });
            while record.violations.len() > self.config.history_limit {
                record.violations.pop_front();
            }
            record.last_activity = now;

            (record.score, record.recent(now, window))
        };

        metrics::record_violation(kind.as_str());
        tracing::debug!(
            client = %addr,
            kind = kind.as_str(),
            score,
            recent,
            "Violation recorded"
        );

        let trigger = if score <= self.config.block_threshold {
            BlockTrigger::Score
        } else if recent >= self.config.density_threshold {
            BlockTrigger::Density
        } else {
            return None;
        };

        self.promote(addr, trigger, score, recent)
    }

    fn promote(
        &self,
        addr: IpAddr,
        trigger: BlockTrigger,
        score: u8,
        recent: usize,
    ) -> Option<BlockTrigger> {
        if !self.blocklist.insert(addr) {
            return None;
        }

        tracing::warn!(
            client = %addr,
            trigger = ?trigger,
            score,
            recent,
            "Address promoted to blocklist"
        );
        metrics::record_blocklist_size(self.blocklist.len());
        Some(trigger)
    }

    /// Copy of the record for `addr`, if one exists.
    pub fn snapshot(&self, addr: &IpAddr) -> Option<ReputationRecord> {
        self.records.get(addr).map(|r| r.value().clone())
    }

    pub fn tracked(&self) -> usize {
        self.records.len()
    }

    pub fn blocklist_len(&self) -> usize {
        self.blocklist.len()
    }

    /// Drop healthy records idle past the retention window. Low-score records
    /// and the blocklist are kept.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let retention = Duration::from_secs(self.config.retention_secs);
        let min_score = self.config.retention_min_score;
        let mut removed = 0;

        self.records.retain(|_, record| {
            let idle = now.saturating_duration_since(record.last_activity) > retention;
            let keep = !(idle && record.score >= min_score);
            if !keep {
                removed += 1;
            }
            keep
        });

        removed
    }
}
