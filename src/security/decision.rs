//! Admission decisions returned to request handlers.
//!
//! Denials are ordinary values carrying a stable reason code; nothing here
//! describes the internal state that produced them.

use std::time::Duration;

/// Why a request was refused admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    /// The address is on the permanent blocklist.
    Blocklisted,
    /// The per-key budget for the window is spent, or the key is serving a block.
    RateLimited,
    /// Too many requests from one key inside the burst window.
    Burst,
    /// The process-wide budget is spent.
    GlobalBudget,
    /// The caller named a route class with no configured budget.
    UnknownRouteClass,
}

impl DenyReason {
    /// Machine-readable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::Blocklisted => "blocklisted",
            DenyReason::RateLimited => "rate_limited",
            DenyReason::Burst => "burst",
            DenyReason::GlobalBudget => "global_budget",
            DenyReason::UnknownRouteClass => "unknown_route_class",
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny {
        reason: DenyReason,
        retry_after: Option<Duration>,
    },
}

impl Decision {
    pub fn deny(reason: DenyReason) -> Self {
        Decision::Deny {
            reason,
            retry_after: None,
        }
    }

    pub fn deny_for(reason: DenyReason, retry_after: Duration) -> Self {
        Decision::Deny {
            reason,
            retry_after: Some(retry_after),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn reason(&self) -> Option<DenyReason> {
        match self {
            Decision::Allow => None,
            Decision::Deny { reason, .. } => Some(*reason),
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Decision::Allow => None,
            Decision::Deny { retry_after, .. } => *retry_after,
        }
    }

    /// Label used for metrics and logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny { reason, .. } => reason.code(),
        }
    }
}
