//! Iteration engine configuration.

use std::time::Duration;

use thiserror::Error;

pub const ENV_MAX_RUN_DURATION_SECS: &str = "ITERATION_MAX_RUN_DURATION_SECS";
pub const ENV_CHECK_THROTTLE_MS: &str = "ITERATION_CHECK_THROTTLE_MS";
pub const ENV_DISABLE_AUTOCONFIGURE: &str = "ITERATION_DISABLE_AUTOCONFIGURE";
pub const ENV_RETRY_BACKOFF_SECS: &str = "ITERATION_RETRY_BACKOFF_SECS";
pub const ENV_ENFORCE_SERIALIZABLE_CURSORS: &str = "ITERATION_ENFORCE_SERIALIZABLE_CURSORS";

/// Invalid configuration value.
#[derive(Debug, Error)]
#[error("Invalid value '{value}' for {key}: {reason}")]
pub struct ConfigError {
    pub key: &'static str,
    pub value: String,
    pub reason: String,
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct IterationConfig {
    /// Upper bound on a single run before a forced checkpoint.
    pub max_run_duration: Duration,

    /// Minimum spacing between samples of the shutdown source.
    pub interruption_check_throttle: Duration,

    /// Wire OS termination signals into the shutdown flag on worker start.
    pub autoconfigure: bool,

    /// Delay applied to resubmissions. `None` enqueues immediately.
    pub retry_backoff: Option<Duration>,

    /// Validate every emitted cursor, not only the checkpointed one.
    pub enforce_serializable_cursors: bool,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            max_run_duration: Duration::from_secs(5 * 60),
            interruption_check_throttle: Duration::from_secs(5),
            autoconfigure: true,
            retry_backoff: None,
            enforce_serializable_cursors: false,
        }
    }
}

impl IterationConfig {
    /// Defaults overridden by `ITERATION_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup(ENV_MAX_RUN_DURATION_SECS) {
            config.max_run_duration = Duration::from_secs(parse_u64(ENV_MAX_RUN_DURATION_SECS, &v)?);
        }
        if let Some(v) = lookup(ENV_CHECK_THROTTLE_MS) {
            config.interruption_check_throttle =
                Duration::from_millis(parse_u64(ENV_CHECK_THROTTLE_MS, &v)?);
        }
        if let Some(v) = lookup(ENV_DISABLE_AUTOCONFIGURE) {
            config.autoconfigure = !parse_bool(ENV_DISABLE_AUTOCONFIGURE, &v)?;
        }
        if let Some(v) = lookup(ENV_RETRY_BACKOFF_SECS) {
            let secs = parse_u64(ENV_RETRY_BACKOFF_SECS, &v)?;
            config.retry_backoff = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(v) = lookup(ENV_ENFORCE_SERIALIZABLE_CURSORS) {
            config.enforce_serializable_cursors = parse_bool(ENV_ENFORCE_SERIALIZABLE_CURSORS, &v)?;
        }

        Ok(config)
    }

    /// Builder method to set the run duration bound.
    pub fn with_max_run_duration(mut self, duration: Duration) -> Self {
        self.max_run_duration = duration;
        self
    }

    /// Builder method to set the shutdown sampling throttle.
    pub fn with_check_throttle(mut self, throttle: Duration) -> Self {
        self.interruption_check_throttle = throttle;
        self
    }

    /// Builder method to set the resubmission delay.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = Some(backoff);
        self
    }
}

fn parse_u64(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError {
            key,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
