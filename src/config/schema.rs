//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gatekeeper.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the gatekeeper.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatekeeperConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Admission control (rate limiting) settings.
    pub admission: AdmissionConfig,

    /// Address reputation settings.
    pub reputation: ReputationConfig,

    /// Free-text threat detection settings.
    pub threat: ThreatConfig,

    /// Anti-forgery token settings.
    pub csrf: CsrfConfig,

    /// Privileged session settings.
    pub admin: AdminConfig,

    /// Background cleanup settings.
    pub sweeper: SweeperConfig,

    /// Path prefix to route class mapping used by the HTTP layer.
    pub routes: Vec<RouteRule>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            timeouts: TimeoutConfig::default(),
            admission: AdmissionConfig::default(),
            reputation: ReputationConfig::default(),
            threat: ThreatConfig::default(),
            csrf: CsrfConfig::default(),
            admin: AdminConfig::default(),
            sweeper: SweeperConfig::default(),
            routes: vec![
                RouteRule::new("/api/messages", "chat"),
                RouteRule::new("/admin/login", "auth"),
                RouteRule::new("/", "api"),
            ],
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Budget for one route class.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RouteClassConfig {
    /// Requests admitted per window before penalties.
    pub limit: u32,

    /// Window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Requests tolerated inside the burst window.
    pub burst: u32,
}

fn default_window_secs() -> u64 {
    60
}

impl RouteClassConfig {
    pub fn new(limit: u32, window_secs: u64, burst: u32) -> Self {
        Self {
            limit,
            window_secs,
            burst,
        }
    }
}

/// Admission controller configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Requests admitted across all clients per global window.
    pub global_limit: u64,

    /// Global window length in seconds.
    pub global_window_secs: u64,

    /// Fraction of the base limit removed per recorded penalty.
    pub penalty_factor: f64,

    /// Floor for the penalty-scaled limit.
    pub min_limit: u32,

    /// Upper bound for the progressive block, in minutes.
    pub block_cap_minutes: u64,

    /// Burst detection window in seconds.
    pub burst_window_secs: u64,

    /// Route class applied when a rule does not name one.
    pub default_class: String,

    /// Budgets keyed by route class name.
    pub classes: BTreeMap<String, RouteClassConfig>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        let mut classes = BTreeMap::new();
        classes.insert("api".to_string(), RouteClassConfig::new(100, 60, 30));
        classes.insert("chat".to_string(), RouteClassConfig::new(20, 60, 8));
        classes.insert("auth".to_string(), RouteClassConfig::new(10, 60, 5));

        Self {
            global_limit: 10_000,
            global_window_secs: 60,
            penalty_factor: 0.1,
            min_limit: 1,
            block_cap_minutes: 15,
            burst_window_secs: 10,
            default_class: "api".to_string(),
            classes,
        }
    }
}

/// Score penalty per violation kind.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SeverityTable {
    pub sql_injection: u8,
    pub xss: u8,
    pub csrf_violation: u8,
    pub brute_force: u8,
    pub suspicious_pattern: u8,
    pub rate_limit: u8,
    pub malformed_input: u8,
    pub spam: u8,
}

impl Default for SeverityTable {
    fn default() -> Self {
        Self {
            sql_injection: 50,
            xss: 50,
            csrf_violation: 40,
            brute_force: 30,
            suspicious_pattern: 15,
            rate_limit: 10,
            malformed_input: 5,
            spam: 3,
        }
    }
}

/// Reputation ledger configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReputationConfig {
    /// Score assigned to a newly observed address.
    pub initial_score: u8,

    /// Addresses at or below this score are blocklisted.
    pub block_threshold: u8,

    /// Violations inside the density window that trigger a block.
    pub density_threshold: usize,

    /// Density window in seconds.
    pub density_window_secs: u64,

    /// Violations kept per address.
    pub history_limit: usize,

    /// Idle time after which a healthy record is dropped, in seconds.
    pub retention_secs: u64,

    /// Records below this score are never dropped.
    pub retention_min_score: u8,

    /// Score penalties per violation kind.
    pub severity: SeverityTable,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            initial_score: 100,
            block_threshold: 20,
            density_threshold: 10,
            density_window_secs: 300,
            history_limit: 64,
            retention_secs: 24 * 60 * 60,
            retention_min_score: 80,
            severity: SeverityTable::default(),
        }
    }
}

/// Threat detector configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ThreatConfig {
    /// Maximum length (in characters) used when a caller gives none.
    pub default_max_length: usize,

    /// Enable the soft spam heuristic.
    pub spam_detection: bool,

    /// Number of spam signals needed to reject.
    pub spam_threshold: u32,

    /// Length of a single-character run counted as a spam signal.
    pub repeated_run: usize,

    /// Embedded URLs tolerated before counting a spam signal.
    pub max_urls: usize,

    /// Minimum length of a digit run.
    pub digit_run_length: usize,

    /// Long digit runs tolerated before counting a spam signal.
    pub max_digit_runs: usize,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            default_max_length: 2000,
            spam_detection: true,
            spam_threshold: 2,
            repeated_run: 10,
            max_urls: 1,
            digit_run_length: 7,
            max_digit_runs: 1,
        }
    }
}

/// CSRF token configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Token lifetime in seconds.
    pub token_ttl_secs: u64,

    /// Random bytes per token.
    pub token_bytes: usize,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 60 * 60,
            token_bytes: 32,
        }
    }
}

/// Privileged session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Absolute session lifetime in seconds.
    pub session_max_age_secs: u64,

    /// Inactivity timeout in seconds.
    pub session_idle_secs: u64,

    /// Request headers hashed into the client fingerprint.
    pub fingerprint_headers: Vec<String>,

    /// Permissions granted to a new session.
    pub default_permissions: Vec<String>,

    /// Failed logins before the address is locked out.
    pub max_login_failures: u32,

    /// Lockout duration in seconds.
    pub lockout_secs: u64,

    /// Idle time after which a login record is dropped, in seconds.
    pub login_retention_secs: u64,

    /// Shared secret checked by the admin login route.
    pub secret: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            session_max_age_secs: 4 * 60 * 60,
            session_idle_secs: 30 * 60,
            fingerprint_headers: vec![
                "user-agent".to_string(),
                "accept-language".to_string(),
                "accept-encoding".to_string(),
            ],
            default_permissions: vec!["admin".to_string()],
            max_login_failures: 5,
            lockout_secs: 15 * 60,
            login_retention_secs: 60 * 60,
            // WARNING: This is a placeholder! Change this in production.
            secret: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// Sweeper configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// Sweep interval in seconds.
    pub interval_secs: u64,

    /// Idle time after which a rate window is dropped, in seconds.
    pub rate_window_idle_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5 * 60,
            rate_window_idle_secs: 5 * 60,
        }
    }
}

/// Maps a request path prefix to a route class.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RouteRule {
    /// Path prefix to match.
    pub prefix: String,

    /// Route class name; must exist in `admission.classes`.
    pub class: String,
}

impl RouteRule {
    pub fn new(prefix: &str, class: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            class: class.to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
