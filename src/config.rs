//! Typed environment configuration for the `ivcu-server` composition root.
//!
//! One `Config` struct covers the §6 CLI/env surface, read through `envy`
//! so optional fields get `serde` defaults instead of two dozen hand-rolled
//! `env::var` calls scattered through `main`. Validation happens here, once,
//! before any I/O — a bad config is reported with exit code `2`, never by a
//! half-initialized component failing later.

use serde::Deserialize;

/// Raised by [`Config::from_env`] before the binary does any I/O.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("DATABASE_URL is set but empty")]
    EmptyDatabaseUrl,

    #[error("invalid LOG_LEVEL {0:?}: expected a tracing-subscriber filter directive")]
    InvalidLogLevel(String),

    #[error("DAILY_BUDGET_USD must be a non-negative decimal, got {0:?}")]
    InvalidDailyBudget(String),

    #[error("SESSION_BUDGET_USD must be a non-negative decimal, got {0:?}")]
    InvalidSessionBudget(String),
}

fn default_bind_addr() -> String {
    "0.0.0.0:4600".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_daily_budget() -> String {
    "50.00".to_string()
}

fn default_session_budget() -> String {
    "2.00".to_string()
}

fn default_consumer_name() -> String {
    "ivcu-projection-engine".to_string()
}

fn default_cache_ttl_seconds() -> u64 {
    3600
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_proof_issuer() -> String {
    "ivcu-control-plane".to_string()
}

/// Raw, serde-deserializable shape `envy::from_env` fills in; every field
/// is a `String`/primitive so missing-but-optional values fall back to
/// their `default_*` functions instead of failing the whole read.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default)]
    event_bus_url: Option<String>,
    #[serde(default)]
    kv_url: Option<String>,
    #[serde(default)]
    anthropic_api_key: Option<String>,
    #[serde(default)]
    openai_api_key: Option<String>,
    /// Accepted but unused: auth/RBAC is an external collaborator (§1), not
    /// implemented by this core. Kept in the env surface so a deployment
    /// that forgets to set it doesn't silently run without one at a layer
    /// that actually needs it.
    #[serde(default)]
    #[allow(dead_code)]
    jwt_secret: Option<String>,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_bind_addr")]
    bind_addr: String,
    #[serde(default = "default_daily_budget")]
    daily_budget_usd: String,
    #[serde(default = "default_session_budget")]
    session_budget_usd: String,
    #[serde(default = "default_consumer_name")]
    projection_consumer_name: String,
    #[serde(default = "default_cache_ttl_seconds")]
    cache_ttl_seconds: u64,
    #[serde(default = "default_cache_capacity")]
    cache_capacity: usize,
    #[serde(default = "default_proof_issuer")]
    proof_issuer: String,
}

/// Validated, ready-to-use configuration. `Config::from_env` is the only
/// constructor; every field here has already survived parsing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub event_bus_url: Option<String>,
    pub kv_url: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub log_level: String,
    pub bind_addr: String,
    pub daily_budget_usd: rust_decimal::Decimal,
    pub session_budget_usd: rust_decimal::Decimal,
    pub projection_consumer_name: String,
    pub cache_ttl_seconds: u64,
    pub cache_capacity: usize,
    pub proof_issuer: String,
}

/// `tracing_subscriber::EnvFilter` happily accepts almost any string as a
/// bare target name, so a typo'd `LOG_LEVEL` would otherwise sail through
/// silently. This only validates the shape — `target[=level][,...]` built
/// from word characters, colons, equals signs, dots and dashes — leaving
/// the real parse to `tracing_subscriber` at startup.
fn is_plausible_filter_directive(value: &str) -> bool {
    !value.is_empty()
        && value
            .split(',')
            .all(|directive| {
                !directive.is_empty()
                    && directive
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '=' | '.' | '-'))
            })
}

impl Config {
    /// Reads and validates configuration from the process environment.
    /// Returns `Err` for anything that would otherwise surface as a
    /// confusing failure deep inside a component constructor — this is the
    /// only place exit code `2` (bad config) originates from.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw: RawConfig = envy::from_env()?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        if matches!(raw.database_url.as_deref(), Some("")) {
            return Err(ConfigError::EmptyDatabaseUrl);
        }
        if !is_plausible_filter_directive(&raw.log_level) {
            return Err(ConfigError::InvalidLogLevel(raw.log_level));
        }
        let daily_budget_usd = raw
            .daily_budget_usd
            .parse()
            .map_err(|_| ConfigError::InvalidDailyBudget(raw.daily_budget_usd.clone()))?;
        let session_budget_usd = raw
            .session_budget_usd
            .parse()
            .map_err(|_| ConfigError::InvalidSessionBudget(raw.session_budget_usd.clone()))?;

        Ok(Config {
            database_url: raw.database_url,
            event_bus_url: raw.event_bus_url,
            kv_url: raw.kv_url,
            anthropic_api_key: raw.anthropic_api_key,
            openai_api_key: raw.openai_api_key,
            log_level: raw.log_level,
            bind_addr: raw.bind_addr,
            daily_budget_usd,
            session_budget_usd,
            projection_consumer_name: raw.projection_consumer_name,
            cache_ttl_seconds: raw.cache_ttl_seconds,
            cache_capacity: raw.cache_capacity,
            proof_issuer: raw.proof_issuer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_with_log_level(log_level: &str) -> RawConfig {
        RawConfig {
            database_url: None,
            event_bus_url: None,
            kv_url: None,
            anthropic_api_key: None,
            openai_api_key: None,
            jwt_secret: None,
            log_level: log_level.to_string(),
            bind_addr: default_bind_addr(),
            daily_budget_usd: default_daily_budget(),
            session_budget_usd: default_session_budget(),
            projection_consumer_name: default_consumer_name(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            cache_capacity: default_cache_capacity(),
            proof_issuer: default_proof_issuer(),
        }
    }

    #[test]
    fn defaults_parse_cleanly() {
        let cfg = Config::from_raw(raw_with_log_level("info")).unwrap();
        assert_eq!(cfg.bind_addr, "0.0.0.0:4600");
        assert!(cfg.daily_budget_usd > rust_decimal::Decimal::ZERO);
    }

    #[test]
    fn empty_database_url_is_rejected() {
        let mut raw = raw_with_log_level("info");
        raw.database_url = Some(String::new());
        let err = Config::from_raw(raw).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyDatabaseUrl));
    }

    #[test]
    fn invalid_log_level_is_rejected() {
        let raw = raw_with_log_level("not a filter directive!!");
        let err = Config::from_raw(raw).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogLevel(_)));
    }

    #[test]
    fn invalid_daily_budget_is_rejected() {
        let mut raw = raw_with_log_level("info");
        raw.daily_budget_usd = "not-a-number".to_string();
        let err = Config::from_raw(raw).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDailyBudget(_)));
    }
}
