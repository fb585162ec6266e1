//! Engine configuration.

use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

pub const ENV_DEFAULT_MAX_RETRIES: &str = "WORKFLOW_DEFAULT_MAX_RETRIES";
pub const ENV_DEFAULT_RETRY_DELAY_MS: &str = "WORKFLOW_DEFAULT_RETRY_DELAY_MS";
pub const ENV_RETRY_POLICY: &str = "WORKFLOW_RETRY_POLICY";
pub const ENV_FATAL_SKIPS_RETRIES: &str = "WORKFLOW_FATAL_SKIPS_RETRIES";

/// Tuning knobs for the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Retries granted to tasks whose definition doesn't set `max_retries`.
    pub default_max_retries: u32,
    /// Retry delay for tasks whose definition doesn't set `retry_delay_ms`.
    pub default_retry_delay: Duration,
    pub retry_policy: RetryPolicy,
    /// When set, a `TaskError::Fatal` fails the task without spending its
    /// remaining retries. Off by default: every failure is retried until
    /// `max_retries` is used up.
    pub fatal_errors_skip_retries: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
            default_retry_delay: Duration::from_millis(1000),
            retry_policy: RetryPolicy::Fixed,
            fatal_errors_skip_retries: false,
        }
    }
}

impl EngineConfig {
    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    pub fn with_default_retry_delay(mut self, delay: Duration) -> Self {
        self.default_retry_delay = delay;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_fatal_errors_skip_retries(mut self, skip: bool) -> Self {
        self.fatal_errors_skip_retries = skip;
        self
    }

    /// Defaults overridden by `WORKFLOW_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_DEFAULT_MAX_RETRIES) {
            config.default_max_retries = value.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidEnv {
                    var: ENV_DEFAULT_MAX_RETRIES,
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?;
        }

        if let Some(value) = lookup(ENV_DEFAULT_RETRY_DELAY_MS) {
            let ms: u64 = value.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidEnv {
                    var: ENV_DEFAULT_RETRY_DELAY_MS,
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?;
            config.default_retry_delay = Duration::from_millis(ms);
        }

        if let Some(value) = lookup(ENV_RETRY_POLICY) {
            config.retry_policy = match value.trim().to_ascii_lowercase().as_str() {
                "fixed" => RetryPolicy::Fixed,
                "exponential" => RetryPolicy::exponential(),
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        var: ENV_RETRY_POLICY,
                        value,
                        reason: "expected 'fixed' or 'exponential'".into(),
                    })
                }
            };
        }

        if let Some(value) = lookup(ENV_FATAL_SKIPS_RETRIES) {
            config.fatal_errors_skip_retries = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        var: ENV_FATAL_SKIPS_RETRIES,
                        value,
                        reason: "expected a boolean".into(),
                    })
                }
            };
        }

        Ok(config)
    }

    pub(crate) fn default_retry_delay_ms(&self) -> u64 {
        u64::try_from(self.default_retry_delay.as_millis()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn no_env_gives_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(!config.fatal_errors_skip_retries);
    }

    #[test]
    fn env_overrides_defaults() {
        let config = EngineConfig::from_lookup(lookup(&[
            (ENV_DEFAULT_MAX_RETRIES, "5"),
            (ENV_DEFAULT_RETRY_DELAY_MS, " 250 "),
            (ENV_RETRY_POLICY, "Exponential"),
            (ENV_FATAL_SKIPS_RETRIES, "true"),
        ]))
        .unwrap();

        assert_eq!(config.default_max_retries, 5);
        assert_eq!(config.default_retry_delay, Duration::from_millis(250));
        assert_eq!(config.retry_policy, RetryPolicy::exponential());
        assert!(config.fatal_errors_skip_retries);
    }

    #[test]
    fn invalid_env_is_reported() {
        let err = EngineConfig::from_lookup(lookup(&[(ENV_DEFAULT_MAX_RETRIES, "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var, .. } if var == ENV_DEFAULT_MAX_RETRIES));

        let err = EngineConfig::from_lookup(lookup(&[(ENV_RETRY_POLICY, "random")])).unwrap_err();
        assert!(err.to_string().contains("random"));

        let err = EngineConfig::from_lookup(lookup(&[(ENV_FATAL_SKIPS_RETRIES, "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var, .. } if var == ENV_FATAL_SKIPS_RETRIES));
    }
}
