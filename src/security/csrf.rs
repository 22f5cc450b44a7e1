//! One-time anti-forgery tokens bound to a session.
//!
//! Each session holds at most one outstanding token; issuing again replaces
//! it. A token validates once and is then spent.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::config::CsrfConfig;

/// Stored token state for one session.
#[derive(Debug, Clone)]
pub struct CsrfTokenRecord {
    pub token: String,
    pub created_at: Instant,
    pub used: bool,
}

/// Why a token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfRejection {
    /// No token was issued for the session.
    Missing,
    /// The token was already spent.
    Used,
    /// The token is older than its lifetime.
    Expired,
    /// The presented value differs from the issued one.
    Mismatch,
}

impl CsrfRejection {
    pub fn code(&self) -> &'static str {
        match self {
            CsrfRejection::Missing => "csrf_missing",
            CsrfRejection::Used => "csrf_used",
            CsrfRejection::Expired => "csrf_expired",
            CsrfRejection::Mismatch => "csrf_mismatch",
        }
    }
}

/// Random hex string of `bytes` bytes from the OS RNG.
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Concurrent token table keyed by session id.
pub struct CsrfLedger {
    tokens: DashMap<String, CsrfTokenRecord>,
    config: CsrfConfig,
}

impl CsrfLedger {
    pub fn new(config: CsrfConfig) -> Self {
        Self {
            tokens: DashMap::new(),
            config,
        }
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.token_ttl_secs)
    }

    /// Issue a fresh token for `session_id`.
    pub fn issue(&self, session_id: &str) -> String {
        self.issue_at(session_id, Instant::now())
    }

    pub fn issue_at(&self, session_id: &str, now: Instant) -> String {
        let token = random_token(self.config.token_bytes);
        self.tokens.insert(
            session_id.to_string(),
            CsrfTokenRecord {
                token: token.clone(),
                created_at: now,
                used: false,
            },
        );
        token
    }

    /// `true` exactly once per issued token.
    pub fn validate(&self, session_id: &str, token: &str) -> bool {
        self.check_at(session_id, token, Instant::now()).is_ok()
    }

    /// Validate and spend a token, reporting why it was refused.
    pub fn check_at(&self, session_id: &str, token: &str, now: Instant) -> Result<(), CsrfRejection> {
        let ttl = self.ttl();
        let mut record = self
            .tokens
            .get_mut(session_id)
            .ok_or(CsrfRejection::Missing)?;

        if record.used {
            return Err(CsrfRejection::Used);
        }
        if now.saturating_duration_since(record.created_at) > ttl {
            return Err(CsrfRejection::Expired);
        }
        if !bool::from(record.token.as_bytes().ct_eq(token.as_bytes())) {
            return Err(CsrfRejection::Mismatch);
        }

        record.used = true;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Drop spent and expired tokens.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let ttl = self.ttl();
        let mut removed = 0;
        self.tokens.retain(|_, record| {
            let keep = !record.used && now.saturating_duration_since(record.created_at) <= ttl;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}
