//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (route rules reference existing classes)
//! - Validate value ranges (limits > 0, lifetimes > 0, factors in range)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatekeeperConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::GatekeeperConfig;

/// A single semantic configuration error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: String },

    #[error("admission.penalty_factor must be in [0, 1), got {0}")]
    PenaltyFactor(f64),

    #[error("admission.classes must define at least one route class")]
    NoRouteClasses,

    #[error("route class `{0}` is not defined in admission.classes")]
    UnknownRouteClass(String),

    #[error("reputation.block_threshold {threshold} must be below initial_score {initial}")]
    BlockThreshold { threshold: u8, initial: u8 },

    #[error("reputation.history_limit {limit} cannot hold density_threshold {density} violations")]
    HistoryLimit { limit: usize, density: usize },

    #[error("admin.session_idle_secs {idle} exceeds session_max_age_secs {max_age}")]
    IdleExceedsMaxAge { idle: u64, max_age: u64 },

    #[error("admin.login_retention_secs {retention} is shorter than lockout_secs {lockout}")]
    LoginRetention { retention: u64, lockout: u64 },

    #[error("admin.fingerprint_headers must not be empty")]
    NoFingerprintHeaders,

    #[error("{field} is not a valid socket address: {value}")]
    Address { field: String, value: String },
}

fn zero(field: &str) -> ValidationError {
    ValidationError::Zero {
        field: field.to_string(),
    }
}

/// Validate a parsed configuration, collecting every error found.
pub fn validate_config(config: &GatekeeperConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::Address {
            field: "listener.bind_address".to_string(),
            value: config.listener.bind_address.clone(),
        });
    }
    if config.timeouts.request_secs == 0 {
        errors.push(zero("timeouts.request_secs"));
    }

    let admission = &config.admission;
    if admission.global_limit == 0 {
        errors.push(zero("admission.global_limit"));
    }
    if admission.global_window_secs == 0 {
        errors.push(zero("admission.global_window_secs"));
    }
    if admission.burst_window_secs == 0 {
        errors.push(zero("admission.burst_window_secs"));
    }
    if admission.min_limit == 0 {
        errors.push(zero("admission.min_limit"));
    }
    if admission.block_cap_minutes == 0 {
        errors.push(zero("admission.block_cap_minutes"));
    }
    if !(0.0..1.0).contains(&admission.penalty_factor) {
        errors.push(ValidationError::PenaltyFactor(admission.penalty_factor));
    }
    if admission.classes.is_empty() {
        errors.push(ValidationError::NoRouteClasses);
    }
    for (name, class) in &admission.classes {
        if class.limit == 0 {
            errors.push(zero(&format!("admission.classes.{name}.limit")));
        }
        if class.window_secs == 0 {
            errors.push(zero(&format!("admission.classes.{name}.window_secs")));
        }
        if class.burst == 0 {
            errors.push(zero(&format!("admission.classes.{name}.burst")));
        }
    }
    if !admission.classes.contains_key(&admission.default_class) {
        errors.push(ValidationError::UnknownRouteClass(
            admission.default_class.clone(),
        ));
    }
    for rule in &config.routes {
        if !admission.classes.contains_key(&rule.class) {
            errors.push(ValidationError::UnknownRouteClass(rule.class.clone()));
        }
    }

    let reputation = &config.reputation;
    if reputation.block_threshold >= reputation.initial_score {
        errors.push(ValidationError::BlockThreshold {
            threshold: reputation.block_threshold,
            initial: reputation.initial_score,
        });
    }
    if reputation.density_threshold == 0 {
        errors.push(zero("reputation.density_threshold"));
    }
    if reputation.density_window_secs == 0 {
        errors.push(zero("reputation.density_window_secs"));
    }
    if reputation.history_limit < reputation.density_threshold {
        errors.push(ValidationError::HistoryLimit {
            limit: reputation.history_limit,
            density: reputation.density_threshold,
        });
    }

    if config.threat.default_max_length == 0 {
        errors.push(zero("threat.default_max_length"));
    }
    if config.threat.spam_threshold == 0 {
        errors.push(zero("threat.spam_threshold"));
    }

    if config.csrf.token_ttl_secs == 0 {
        errors.push(zero("csrf.token_ttl_secs"));
    }
    if config.csrf.token_bytes == 0 {
        errors.push(zero("csrf.token_bytes"));
    }

    let admin = &config.admin;
    if admin.session_max_age_secs == 0 {
        errors.push(zero("admin.session_max_age_secs"));
    }
    if admin.session_idle_secs == 0 {
        errors.push(zero("admin.session_idle_secs"));
    }
    if admin.session_idle_secs > admin.session_max_age_secs {
        errors.push(ValidationError::IdleExceedsMaxAge {
            idle: admin.session_idle_secs,
            max_age: admin.session_max_age_secs,
        });
    }
    if admin.fingerprint_headers.is_empty() {
        errors.push(ValidationError::NoFingerprintHeaders);
    }
    if admin.max_login_failures == 0 {
        errors.push(zero("admin.max_login_failures"));
    }
    if admin.lockout_secs == 0 {
        errors.push(zero("admin.lockout_secs"));
    }
    if admin.login_retention_secs == 0 {
        errors.push(zero("admin.login_retention_secs"));
    }
    // the sweeper would otherwise drop a record mid-lockout
    if admin.login_retention_secs < admin.lockout_secs {
        errors.push(ValidationError::LoginRetention {
            retention: admin.login_retention_secs,
            lockout: admin.lockout_secs,
        });
    }

    if config.sweeper.interval_secs == 0 {
        errors.push(zero("sweeper.interval_secs"));
    }
    if config.sweeper.rate_window_idle_secs == 0 {
        errors.push(zero("sweeper.rate_window_idle_secs"));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::Address {
            field: "observability.metrics_address".to_string(),
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::RouteRule;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(validate_config(&GatekeeperConfig::default()), Ok(()));
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GatekeeperConfig::default();
        config.admission.penalty_factor = 1.5;
        config.admission.global_limit = 0;
        config.admin.fingerprint_headers.clear();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::PenaltyFactor(1.5)));
        assert!(errors.contains(&ValidationError::NoFingerprintHeaders));
    }

    #[test]
    fn test_route_rule_must_reference_known_class() {
        let mut config = GatekeeperConfig::default();
        config.routes.push(RouteRule::new("/upload", "uploads"));

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::UnknownRouteClass("uploads".to_string())]
        );
    }

    #[test]
    fn test_idle_timeout_longer_than_lifetime() {
        let mut config = GatekeeperConfig::default();
        config.admin.session_idle_secs = config.admin.session_max_age_secs + 1;

        let errors = validate_config(&config).unwrap_err();
        assert!(matches!(errors[0], ValidationError::IdleExceedsMaxAge { .. }));
    }

    #[test]
    fn test_login_retention_must_cover_lockout() {
        let mut config = GatekeeperConfig::default();
        config.admin.lockout_secs = 900;
        config.admin.login_retention_secs = 600;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![ValidationError::LoginRetention {
                retention: 600,
                lockout: 900,
            }]
        );

        config.admin.login_retention_secs = 0;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::Zero {
            field: "admin.login_retention_secs".to_string(),
        }));
    }
}
