//! Configuration loading from disk and the environment.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use crate::config::schema::{GatekeeperConfig, SeverityTable};
use crate::config::validation::{validate_config, ValidationError};

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "GATEKEEPER_";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: {value:?}")]
    Env { var: String, value: String },

    #[error("Unknown configuration variable {0}")]
    UnknownEnv(String),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from an optional TOML file, apply `GATEKEEPER_*`
/// overrides from the process environment and validate the result.
pub fn load_config(path: Option<&Path>) -> Result<GatekeeperConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&content)?
        }
        None => GatekeeperConfig::default(),
    };

    apply_env_overrides(&mut config, std::env::vars())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply `GATEKEEPER_*` variables on top of `config`.
///
/// Variables without the prefix are ignored. A prefixed variable that names
/// no tunable, or whose value does not parse, is an error.
pub fn apply_env_overrides<I>(config: &mut GatekeeperConfig, vars: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (var, value) in vars {
        let Some(name) = var.strip_prefix(ENV_PREFIX) else {
            continue;
        };

        match name {
            // read by the command line parser
            "CONFIG" => {}
            "BIND_ADDRESS" => config.listener.bind_address = value,
            "REQUEST_TIMEOUT_SECS" => config.timeouts.request_secs = parse(&var, &value)?,
            "GLOBAL_LIMIT" => config.admission.global_limit = parse(&var, &value)?,
            "GLOBAL_WINDOW_SECS" => config.admission.global_window_secs = parse(&var, &value)?,
            "PENALTY_FACTOR" => config.admission.penalty_factor = parse(&var, &value)?,
            "MIN_LIMIT" => config.admission.min_limit = parse(&var, &value)?,
            "BLOCK_CAP_MINUTES" => config.admission.block_cap_minutes = parse(&var, &value)?,
            "BURST_WINDOW_SECS" => config.admission.burst_window_secs = parse(&var, &value)?,
            "DEFAULT_CLASS" => config.admission.default_class = value.to_lowercase(),
            "BLOCK_THRESHOLD" => config.reputation.block_threshold = parse(&var, &value)?,
            "DENSITY_THRESHOLD" => config.reputation.density_threshold = parse(&var, &value)?,
            "DENSITY_WINDOW_SECS" => {
                config.reputation.density_window_secs = parse(&var, &value)?
            }
            "MAX_LENGTH" => config.threat.default_max_length = parse(&var, &value)?,
            "SPAM_DETECTION" => config.threat.spam_detection = parse(&var, &value)?,
            "CSRF_TTL_SECS" => config.csrf.token_ttl_secs = parse(&var, &value)?,
            "SESSION_MAX_AGE_SECS" => config.admin.session_max_age_secs = parse(&var, &value)?,
            "SESSION_IDLE_SECS" => config.admin.session_idle_secs = parse(&var, &value)?,
            "FINGERPRINT_HEADERS" => {
                config.admin.fingerprint_headers = value
                    .split(',')
                    .map(|h| h.trim().to_lowercase())
                    .filter(|h| !h.is_empty())
                    .collect();
            }
            "MAX_LOGIN_FAILURES" => config.admin.max_login_failures = parse(&var, &value)?,
            "LOCKOUT_SECS" => config.admin.lockout_secs = parse(&var, &value)?,
            "LOGIN_RETENTION_SECS" => config.admin.login_retention_secs = parse(&var, &value)?,
            "ADMIN_SECRET" => config.admin.secret = value,
            "SWEEP_INTERVAL_SECS" => config.sweeper.interval_secs = parse(&var, &value)?,
            "LOG_LEVEL" => config.observability.log_level = value,
            "METRICS_ENABLED" => config.observability.metrics_enabled = parse(&var, &value)?,
            "METRICS_ADDRESS" => config.observability.metrics_address = value,
            _ => {
                if let Some(rest) = name.strip_prefix("ROUTE_") {
                    apply_route_override(config, &var, rest, &value)?;
                } else if let Some(kind) = name.strip_prefix("SEVERITY_") {
                    apply_severity_override(&mut config.reputation.severity, &var, kind, &value)?;
                } else {
                    return Err(ConfigError::UnknownEnv(var));
                }
            }
        }
    }

    Ok(())
}

/// `ROUTE_<CLASS>_LIMIT`, `ROUTE_<CLASS>_WINDOW_SECS`, `ROUTE_<CLASS>_BURST`.
fn apply_route_override(
    config: &mut GatekeeperConfig,
    var: &str,
    rest: &str,
    value: &str,
) -> Result<(), ConfigError> {
    let (class, field) = ["_WINDOW_SECS", "_LIMIT", "_BURST"]
        .iter()
        .find_map(|suffix| rest.strip_suffix(suffix).map(|class| (class, *suffix)))
        .ok_or_else(|| ConfigError::UnknownEnv(var.to_string()))?;

    let class = class.to_lowercase();
    let budget = config
        .admission
        .classes
        .get_mut(&class)
        .ok_or_else(|| ConfigError::UnknownEnv(var.to_string()))?;

    match field {
        "_WINDOW_SECS" => budget.window_secs = parse(var, value)?,
        "_LIMIT" => budget.limit = parse(var, value)?,
        _ => budget.burst = parse(var, value)?,
    }
    Ok(())
}

fn apply_severity_override(
    table: &mut SeverityTable,
    var: &str,
    kind: &str,
    value: &str,
) -> Result<(), ConfigError> {
    let slot = match kind {
        "SQL_INJECTION" => &mut table.sql_injection,
        "XSS" => &mut table.xss,
        "CSRF_VIOLATION" => &mut table.csrf_violation,
        "BRUTE_FORCE" => &mut table.brute_force,
        "SUSPICIOUS_PATTERN" => &mut table.suspicious_pattern,
        "RATE_LIMIT" => &mut table.rate_limit,
        "MALFORMED_INPUT" => &mut table.malformed_input,
        "SPAM" => &mut table.spam,
        _ => return Err(ConfigError::UnknownEnv(var.to_string())),
    };
    *slot = parse(var, value)?;
    Ok(())
}

fn parse<T: FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Env {
        var: var.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_toml_with_defaults() {
        let config: GatekeeperConfig = toml::from_str(
            r#"
            [admission]
            penalty_factor = 0.25

            [admission.classes.api]
            limit = 50
            burst = 10

            [admission.classes.chat]
            limit = 5
            window_secs = 30
            burst = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.admission.penalty_factor, 0.25);
        assert_eq!(config.admission.classes["api"].window_secs, 60);
        assert_eq!(config.admission.classes["chat"].window_secs, 30);
        assert_eq!(config.admission.classes.len(), 2);
        assert_eq!(config.admin.session_idle_secs, 1800);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = GatekeeperConfig::default();
        apply_env_overrides(
            &mut config,
            vars(&[
                ("GATEKEEPER_GLOBAL_LIMIT", "500"),
                ("GATEKEEPER_ROUTE_CHAT_LIMIT", "7"),
                ("GATEKEEPER_ROUTE_CHAT_WINDOW_SECS", "15"),
                ("GATEKEEPER_SEVERITY_SPAM", "1"),
                ("GATEKEEPER_FINGERPRINT_HEADERS", "User-Agent, Accept-Language"),
                ("PATH", "/usr/bin"),
            ]),
        )
        .unwrap();

        assert_eq!(config.admission.global_limit, 500);
        assert_eq!(config.admission.classes["chat"].limit, 7);
        assert_eq!(config.admission.classes["chat"].window_secs, 15);
        assert_eq!(config.reputation.severity.spam, 1);
        assert_eq!(
            config.admin.fingerprint_headers,
            vec!["user-agent".to_string(), "accept-language".to_string()]
        );
    }

    #[test]
    fn test_env_rejects_bad_values() {
        let mut config = GatekeeperConfig::default();
        let err = apply_env_overrides(&mut config, vars(&[("GATEKEEPER_MIN_LIMIT", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { .. }));

        let err = apply_env_overrides(&mut config, vars(&[("GATEKEEPER_ROUTE_UPLOAD_LIMIT", "3")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownEnv(_)));

        let err = apply_env_overrides(&mut config, vars(&[("GATEKEEPER_PENALTY", "0.2")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownEnv(_)));
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let err = load_config(Some(Path::new("does-not-exist.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
