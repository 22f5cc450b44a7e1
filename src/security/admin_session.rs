//! Privileged sessions for administrative routes.
//!
//! # Responsibilities
//! - Create short-lived sessions bound to a client fingerprint
//! - Validate sessions against absolute lifetime, idle timeout and fingerprint
//! - Gate the login path with a per-address failure counter and lockout
//!
//! # Design Decisions
//! - A fingerprint mismatch is its own rejection so callers can force
//!   re-authentication instead of retrying
//! - A mismatch does not revoke the session; the legitimate holder keeps it
//! - Login lockouts are independent of reputation and of any session

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::config::AdminConfig;
use crate::security::csrf::random_token;

const SESSION_ID_BYTES: usize = 32;

/// Derive an opaque fingerprint from the named request headers.
///
/// Missing headers hash as empty values, so the result is stable for a
/// given client. The output is 16 hex characters.
pub fn fingerprint_from_headers(headers: &HeaderMap, names: &[String]) -> String {
    let mut hasher = Sha256::new();
    for name in names {
        let value = headers
            .get(name.as_str())
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        hasher.update(name.to_ascii_lowercase().as_bytes());
        hasher.update(b"=");
        hasher.update(value.trim().as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    hex::encode(&digest[..8])
}

/// State of one privileged session.
#[derive(Debug, Clone)]
pub struct AdminSession {
    pub user_id: String,
    pub created_at: Instant,
    pub expires: Instant,
    pub last_used: Instant,
    pub permissions: BTreeSet<String>,
    pub fingerprint: String,
}

/// What a valid session grants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub user_id: String,
    pub permissions: BTreeSet<String>,
}

impl SessionGrant {
    pub fn allows(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// Why a session was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRejection {
    Unknown,
    Expired,
    Idle,
    FingerprintMismatch,
}

impl SessionRejection {
    pub fn code(&self) -> &'static str {
        match self {
            SessionRejection::Unknown => "session_unknown",
            SessionRejection::Expired => "session_expired",
            SessionRejection::Idle => "session_idle",
            SessionRejection::FingerprintMismatch => "fingerprint_mismatch",
        }
    }
}

/// Failed login bookkeeping for one address.
#[derive(Debug, Clone)]
pub struct LoginAttemptRecord {
    pub attempts: u32,
    pub last_attempt: Instant,
    pub blocked: bool,
}

/// The address is locked out of the login path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginLockout {
    pub retry_after: Duration,
}

/// Session and login-attempt tables.
pub struct AdminSessions {
    sessions: DashMap<String, AdminSession>,
    login_attempts: DashMap<IpAddr, LoginAttemptRecord>,
    config: AdminConfig,
}

impl AdminSessions {
    pub fn new(config: AdminConfig) -> Self {
        Self {
            sessions: DashMap::new(),
            login_attempts: DashMap::new(),
            config,
        }
    }

    pub fn fingerprint_headers(&self) -> &[String] {
        &self.config.fingerprint_headers
    }

    /// Constant-time comparison against the configured login secret.
    pub fn verify_secret(&self, candidate: &str) -> bool {
        bool::from(candidate.as_bytes().ct_eq(self.config.secret.as_bytes()))
    }

    fn max_age(&self) -> Duration {
        Duration::from_secs(self.config.session_max_age_secs)
    }

    fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.config.session_idle_secs)
    }

    fn lockout(&self) -> Duration {
        Duration::from_secs(self.config.lockout_secs)
    }

    /// Create a session with the configured default permissions.
    pub fn create(&self, user_id: &str, fingerprint: &str) -> String {
        let permissions = self.config.default_permissions.iter().cloned().collect();
        self.create_at(user_id, fingerprint, permissions, Instant::now())
    }

    pub fn create_with_permissions(
        &self,
        user_id: &str,
        fingerprint: &str,
        permissions: BTreeSet<String>,
    ) -> String {
        self.create_at(user_id, fingerprint, permissions, Instant::now())
    }

    pub fn create_at(
        &self,
        user_id: &str,
        fingerprint: &str,
        permissions: BTreeSet<String>,
        now: Instant,
    ) -> String {
        let session_id = random_token(SESSION_ID_BYTES);
        self.sessions.insert(
            session_id.clone(),
            AdminSession {
                user_id: user_id.to_string(),
                created_at: now,
                expires: now + self.max_age(),
                last_used: now,
                permissions,
                fingerprint: fingerprint.to_string(),
            },
        );
        tracing::info!(user = %user_id, "Admin session created");
        session_id
    }

    pub fn validate(
        &self,
        session_id: &str,
        fingerprint: Option<&str>,
    ) -> Result<SessionGrant, SessionRejection> {
        self.validate_at(session_id, fingerprint, Instant::now())
    }

    /// Validate a session and refresh its idle timer on success.
    pub fn validate_at(
        &self,
        session_id: &str,
        fingerprint: Option<&str>,
        now: Instant,
    ) -> Result<SessionGrant, SessionRejection> {
        let outcome = {
            let mut session = self
                .sessions
                .get_mut(session_id)
                .ok_or(SessionRejection::Unknown)?;

            if now >= session.expires {
                Err(SessionRejection::Expired)
            } else if now.saturating_duration_since(session.last_used) > self.idle_timeout() {
                Err(SessionRejection::Idle)
            } else if fingerprint.is_some_and(|fp| {
                !bool::from(fp.as_bytes().ct_eq(session.fingerprint.as_bytes()))
            }) {
                tracing::warn!(user = %session.user_id, "Admin session fingerprint mismatch");
                Err(SessionRejection::FingerprintMismatch)
            } else {
                session.last_used = now;
                Ok(SessionGrant {
                    user_id: session.user_id.clone(),
                    permissions: session.permissions.clone(),
                })
            }
        };

        if matches!(
            outcome,
            Err(SessionRejection::Expired | SessionRejection::Idle)
        ) {
            self.sessions.remove(session_id);
        }
        outcome
    }

    /// End a session. Returns whether it existed.
    pub fn revoke(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn login_record_count(&self) -> usize {
        self.login_attempts.len()
    }

    pub fn check_login(&self, addr: IpAddr) -> Result<(), LoginLockout> {
        self.check_login_at(addr, Instant::now())
    }

    /// Refuse logins from an address serving a lockout. An elapsed lockout
    /// clears the record.
    pub fn check_login_at(&self, addr: IpAddr, now: Instant) -> Result<(), LoginLockout> {
        let Some(mut record) = self.login_attempts.get_mut(&addr) else {
            return Ok(());
        };
        if !record.blocked {
            return Ok(());
        }

        let elapsed = now.saturating_duration_since(record.last_attempt);
        let lockout = self.lockout();
        if elapsed < lockout {
            return Err(LoginLockout {
                retry_after: lockout - elapsed,
            });
        }

        record.attempts = 0;
        record.blocked = false;
        Ok(())
    }

    pub fn record_login_failure(&self, addr: IpAddr) -> bool {
        self.record_login_failure_at(addr, Instant::now())
    }

    /// Count a failed login. Returns `true` when this failure starts a lockout.
    pub fn record_login_failure_at(&self, addr: IpAddr, now: Instant) -> bool {
        let mut record = self
            .login_attempts
            .entry(addr)
            .or_insert_with(|| LoginAttemptRecord {
                attempts: 0,
                last_attempt: now,
                blocked: false,
            });

        if record.blocked {
            return false;
        }

        record.attempts += 1;
        record.last_attempt = now;
        if record.attempts >= self.config.max_login_failures {
            record.blocked = true;
            tracing::warn!(
                client = %addr,
                attempts = record.attempts,
                "Admin login locked out"
            );
            return true;
        }
        false
    }

    /// Clear the failure record after a successful login.
    pub fn record_login_success(&self, addr: IpAddr) {
        self.login_attempts.remove(&addr);
    }

    /// Drop expired or idle sessions and stale login records.
    /// Returns `(sessions_removed, login_records_removed)`.
    pub fn sweep_at(&self, now: Instant) -> (usize, usize) {
        let idle_timeout = self.idle_timeout();
        let mut sessions_removed = 0;
        self.sessions.retain(|_, session| {
            let keep = now < session.expires
                && now.saturating_duration_since(session.last_used) <= idle_timeout;
            if !keep {
                sessions_removed += 1;
            }
            keep
        });

        let retention = Duration::from_secs(self.config.login_retention_secs);
        let mut logins_removed = 0;
        self.login_attempts.retain(|_, record| {
            let keep = now.saturating_duration_since(record.last_attempt) <= retention;
            if !keep {
                logins_removed += 1;
            }
            keep
        });

        (sessions_removed, logins_removed)
    }
}
