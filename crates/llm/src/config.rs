use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::cost_calculator::{ModelRate, RateTable};
use crate::errors::ConfigError;
use crate::orchestration::SelectionPolicy;
use crate::retry::RetryConfig;

/// Names `FailoverConfig::from_env` reads.
pub mod env_keys {
    pub const CONFIG_FILE: &str = "FAILOVER_CONFIG_FILE";
    pub const THRESHOLD: &str = "FAILOVER_THRESHOLD";
    pub const CIRCUIT_BREAKER_TIMEOUT_MS: &str = "FAILOVER_CIRCUIT_BREAKER_TIMEOUT_MS";
    pub const HEALTH_CHECK_ENABLED: &str = "FAILOVER_HEALTH_CHECK_ENABLED";
    pub const HEALTH_CHECK_INTERVAL_MS: &str = "FAILOVER_HEALTH_CHECK_INTERVAL_MS";
    pub const HEALTH_CHECK_TIMEOUT_MS: &str = "FAILOVER_HEALTH_CHECK_TIMEOUT_MS";
    pub const MAX_RETRIES: &str = "FAILOVER_MAX_RETRIES";
    pub const BASE_RETRY_DELAY_MS: &str = "FAILOVER_BASE_RETRY_DELAY_MS";
    pub const MAX_RETRY_DELAY_MS: &str = "FAILOVER_MAX_RETRY_DELAY_MS";
    pub const REQUEST_TIMEOUT_MS: &str = "FAILOVER_REQUEST_TIMEOUT_MS";
    pub const LARGE_DOCUMENT_THRESHOLD: &str = "FAILOVER_LARGE_DOCUMENT_THRESHOLD";
    pub const LARGE_DOCUMENT_PREFERENCE: &str = "FAILOVER_LARGE_DOCUMENT_PREFERENCE";
    pub const COST_PREFERENCE: &str = "FAILOVER_COST_PREFERENCE";
    pub const QUALITY_PREFERENCE: &str = "FAILOVER_QUALITY_PREFERENCE";
}

/// Routing, resilience and pricing settings for a `FailoverManager`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverConfig {
    /// Consecutive failures that open a provider's circuit
    pub failover_threshold: u32,
    pub circuit_breaker_timeout_ms: u64,
    pub health_check_enabled: bool,
    pub health_check_interval_ms: u64,
    pub health_check_timeout_ms: u64,
    /// Extra attempts on the same provider for retryable errors
    pub max_retries: u32,
    pub base_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Default bound on one adapter call
    pub request_timeout_ms: u64,
    /// Per-provider override of `request_timeout_ms`
    pub provider_timeouts_ms: HashMap<String, u64>,
    pub response_time_window: usize,
    /// Per-topic event channel capacity
    pub event_buffer: usize,
    pub selection: SelectionPolicy,
    pub rates: RateTable,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            failover_threshold: 3,
            circuit_breaker_timeout_ms: 60_000,
            health_check_enabled: true,
            health_check_interval_ms: 300_000,
            health_check_timeout_ms: 10_000,
            max_retries: 2,
            base_retry_delay_ms: 200,
            max_retry_delay_ms: 10_000,
            request_timeout_ms: 30_000,
            provider_timeouts_ms: HashMap::new(),
            response_time_window: 100,
            event_buffer: 1024,
            selection: SelectionPolicy::default(),
            rates: RateTable::default(),
        }
    }
}

impl FailoverConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        debug!(path = %path.display(), "loaded failover config file");
        Self::from_json_str(&raw)
    }

    /// Load `.env` if present, start from `FAILOVER_CONFIG_FILE` (or the
    /// defaults), then apply `FAILOVER_*` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let mut config = match env::var(env_keys::CONFIG_FILE) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `FAILOVER_*` style overrides from an arbitrary lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        use env_keys::*;

        override_parsed(&lookup, THRESHOLD, &mut self.failover_threshold)?;
        override_parsed(&lookup, CIRCUIT_BREAKER_TIMEOUT_MS, &mut self.circuit_breaker_timeout_ms)?;
        override_parsed(&lookup, HEALTH_CHECK_ENABLED, &mut self.health_check_enabled)?;
        override_parsed(&lookup, HEALTH_CHECK_INTERVAL_MS, &mut self.health_check_interval_ms)?;
        override_parsed(&lookup, HEALTH_CHECK_TIMEOUT_MS, &mut self.health_check_timeout_ms)?;
        override_parsed(&lookup, MAX_RETRIES, &mut self.max_retries)?;
        override_parsed(&lookup, BASE_RETRY_DELAY_MS, &mut self.base_retry_delay_ms)?;
        override_parsed(&lookup, MAX_RETRY_DELAY_MS, &mut self.max_retry_delay_ms)?;
        override_parsed(&lookup, REQUEST_TIMEOUT_MS, &mut self.request_timeout_ms)?;
        override_parsed(
            &lookup,
            LARGE_DOCUMENT_THRESHOLD,
            &mut self.selection.large_document_threshold,
        )?;

        if let Some(list) = lookup(LARGE_DOCUMENT_PREFERENCE) {
            self.selection.large_document_preference = split_list(&list);
        }
        if let Some(list) = lookup(COST_PREFERENCE) {
            self.selection.cost_preference = split_list(&list);
        }
        if let Some(list) = lookup(QUALITY_PREFERENCE) {
            self.selection.quality_preference = split_list(&list);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failover_threshold == 0 {
            return Err(ConfigError::invalid("failover_threshold", "must be at least 1"));
        }
        let positive = [
            ("circuit_breaker_timeout_ms", self.circuit_breaker_timeout_ms),
            ("request_timeout_ms", self.request_timeout_ms),
            ("max_retry_delay_ms", self.max_retry_delay_ms),
            ("response_time_window", self.response_time_window as u64),
            ("event_buffer", self.event_buffer as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::invalid(field, "must be greater than zero"));
            }
        }
        if self.health_check_enabled {
            if self.health_check_interval_ms == 0 {
                return Err(ConfigError::invalid(
                    "health_check_interval_ms",
                    "must be greater than zero when health checks are enabled",
                ));
            }
            if self.health_check_timeout_ms == 0 {
                return Err(ConfigError::invalid(
                    "health_check_timeout_ms",
                    "must be greater than zero when health checks are enabled",
                ));
            }
        }
        if self.base_retry_delay_ms > self.max_retry_delay_ms {
            return Err(ConfigError::invalid(
                "base_retry_delay_ms",
                format!("exceeds max_retry_delay_ms ({})", self.max_retry_delay_ms),
            ));
        }
        if let Some((provider, _)) = self.provider_timeouts_ms.iter().find(|(_, ms)| **ms == 0) {
            return Err(ConfigError::invalid(
                format!("provider_timeouts_ms.{provider}"),
                "must be greater than zero",
            ));
        }
        self.rates.validate()
    }

    /// Every preference list entry must name a registered provider.
    pub fn validate_providers(&self, registered: &[&str]) -> Result<(), ConfigError> {
        for (field, name) in self.selection.referenced_providers() {
            if !registered.contains(&name) {
                return Err(ConfigError::invalid(
                    field,
                    format!("unknown provider '{name}'"),
                ));
            }
        }
        Ok(())
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failover_threshold,
            recovery_timeout: Duration::from_millis(self.circuit_breaker_timeout_ms),
            response_time_window: self.response_time_window,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new()
            .with_max_retries(self.max_retries)
            .with_base_delay(Duration::from_millis(self.base_retry_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_retry_delay_ms))
    }

    pub fn request_timeout_for(&self, provider: &str) -> Duration {
        let ms = self
            .provider_timeouts_ms
            .get(provider)
            .copied()
            .unwrap_or(self.request_timeout_ms);
        Duration::from_millis(ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    // Builder helpers

    pub fn with_failover_threshold(mut self, threshold: u32) -> Self {
        self.failover_threshold = threshold;
        self
    }

    pub fn with_circuit_breaker_timeout(mut self, timeout: Duration) -> Self {
        self.circuit_breaker_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn without_health_checks(mut self) -> Self {
        self.health_check_enabled = false;
        self
    }

    pub fn with_health_checks(mut self, interval: Duration, timeout: Duration) -> Self {
        self.health_check_enabled = true;
        self.health_check_interval_ms = interval.as_millis() as u64;
        self.health_check_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, base_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.base_retry_delay_ms = base_delay.as_millis() as u64;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_provider_timeout(mut self, provider: &str, timeout: Duration) -> Self {
        self.provider_timeouts_ms
            .insert(provider.to_string(), timeout.as_millis() as u64);
        self
    }

    pub fn with_selection(mut self, selection: SelectionPolicy) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_rate(mut self, provider: &str, model: &str, input: f64, output: f64) -> Self {
        self.rates.insert(provider, model, ModelRate::new(input, output));
        self
    }
}

fn override_parsed<T, F>(lookup: &F, key: &str, target: &mut T) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(key, format!("{raw:?}: {e}")))?;
    }
    Ok(())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = FailoverConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.failover_threshold, 3);
        assert_eq!(config.health_check_interval(), Duration::from_secs(300));
        assert_eq!(config.selection.large_document_threshold, 50_000);
    }

    #[test]
    fn parses_partial_json_over_defaults() {
        let config = FailoverConfig::from_json_str(
            r#"{
                "failover_threshold": 5,
                "circuit_breaker_timeout_ms": 500,
                "selection": {"large_document_preference": ["claude-like"]},
                "rates": {"openai-like": {"gpt-4": {"input": 0.03, "output": 0.06}}}
            }"#,
        )
        .expect("valid config");

        assert_eq!(config.failover_threshold, 5);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.circuit_breaker_config().recovery_timeout, Duration::from_millis(500));
        assert_eq!(config.selection.large_document_threshold, 50_000);
        assert!(config.rates.get("openai-like", "gpt-4").is_some());
    }

    #[rstest]
    #[case(r#"{"failover_threshold": 0}"#, "failover_threshold")]
    #[case(r#"{"circuit_breaker_timeout_ms": 0}"#, "circuit_breaker_timeout_ms")]
    #[case(r#"{"request_timeout_ms": 0}"#, "request_timeout_ms")]
    #[case(r#"{"health_check_interval_ms": 0}"#, "health_check_interval_ms")]
    #[case(r#"{"base_retry_delay_ms": 20000}"#, "base_retry_delay_ms")]
    #[case(r#"{"provider_timeouts_ms": {"slow": 0}}"#, "provider_timeouts_ms.slow")]
    #[case(r#"{"rates": {"p": {"m": {"input": -1.0, "output": 0.0}}}}"#, "rates.p.m.input")]
    fn rejects_invalid_values(#[case] json: &str, #[case] expected_field: &str) {
        match FailoverConfig::from_json_str(json) {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected_field),
            other => panic!("expected invalid {expected_field}, got {other:?}"),
        }
    }

    #[test]
    fn disabled_health_checks_skip_interval_validation() {
        let config = FailoverConfig::from_json_str(
            r#"{"health_check_enabled": false, "health_check_interval_ms": 0}"#,
        );
        assert!(config.is_ok());
    }

    #[test]
    fn malformed_json_is_parse_error() {
        assert!(matches!(
            FailoverConfig::from_json_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn overrides_apply_from_lookup() {
        let vars: HashMap<&str, &str> = [
            (env_keys::THRESHOLD, "4"),
            (env_keys::HEALTH_CHECK_ENABLED, "false"),
            (env_keys::COST_PREFERENCE, "cheap, , cheaper"),
        ]
        .into_iter()
        .collect();

        let mut config = FailoverConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .expect("valid overrides");

        assert_eq!(config.failover_threshold, 4);
        assert!(!config.health_check_enabled);
        assert_eq!(config.selection.cost_preference, vec!["cheap", "cheaper"]);
    }

    #[test]
    fn unparsable_override_names_the_variable() {
        let mut config = FailoverConfig::default();
        let err = config
            .apply_overrides(|key| (key == env_keys::MAX_RETRIES).then(|| "many".to_string()))
            .expect_err("should reject");
        assert!(matches!(err, ConfigError::Invalid { field, .. } if field == env_keys::MAX_RETRIES));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, r#"{{"max_retries": 0, "request_timeout_ms": 1500}}"#).expect("write");

        let config = FailoverConfig::from_file(file.path()).expect("valid file");
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.request_timeout_for("any"), Duration::from_millis(1500));
    }

    #[test]
    fn missing_file_is_io_error() {
        assert!(matches!(
            FailoverConfig::from_file("/definitely/not/here.json"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn provider_timeout_override() {
        let config = FailoverConfig::default()
            .with_request_timeout(Duration::from_secs(2))
            .with_provider_timeout("slow", Duration::from_secs(9));
        assert_eq!(config.request_timeout_for("slow"), Duration::from_secs(9));
        assert_eq!(config.request_timeout_for("fast"), Duration::from_secs(2));
    }

    #[test]
    fn preference_names_must_be_registered() {
        let config = FailoverConfig::default().with_selection(SelectionPolicy {
            quality_preference: vec!["ghost".into()],
            ..SelectionPolicy::default()
        });
        let err = config
            .validate_providers(&["primary", "backup"])
            .expect_err("ghost is unknown");
        assert!(
            matches!(err, ConfigError::Invalid { field, .. } if field == "selection.quality_preference")
        );
        assert!(FailoverConfig::default().validate_providers(&["primary"]).is_ok());
    }
}
