//! Control plane configuration
//!
//! Loaded from a TOML file with one table per subsystem:
//!
//! ```toml
//! [jobs]
//! worker_count = 8
//!
//! [jobs.retry]
//! policy = "exponential"
//!
//! [locks]
//! default_ttl_seconds = 30
//!
//! [power]
//! interface = "lanplus"
//!
//! [logging]
//! filter = "info,fleet_overlord=debug"
//! ```

mod defaults;

pub use defaults::DEFAULT_CONFIG_PATH;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use overlord_power::{IpmitoolConfig, PowerDriverConfig};
use serde::{Deserialize, Serialize};

use crate::jobs::{ExponentialBackoff, FlatDelay, JobSettings, RetryPolicy};
use crate::locks::LockManagerConfig;

/// Errors that can occur when loading or validating configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OverlordConfig {
    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub locks: LocksConfig,

    #[serde(default)]
    pub power: PowerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobsConfig {
    #[serde(default = "defaults::queue_name")]
    pub queue_name: String,

    #[serde(default = "defaults::worker_count")]
    pub worker_count: usize,

    /// Wait on an empty queue before claiming again (sub-second)
    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "defaults::claim_ttl_seconds")]
    pub claim_ttl_seconds: u64,

    /// How long an abandoned claimed message stays recoverable
    #[serde(default = "defaults::claim_grace_seconds")]
    pub claim_grace_seconds: u64,

    #[serde(default = "defaults::message_ttl_seconds")]
    pub message_ttl_seconds: u64,

    /// Default failure budget for job types that do not set their own
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            queue_name: defaults::queue_name(),
            worker_count: defaults::worker_count(),
            poll_interval_ms: defaults::poll_interval_ms(),
            claim_ttl_seconds: defaults::claim_ttl_seconds(),
            claim_grace_seconds: defaults::claim_grace_seconds(),
            message_ttl_seconds: defaults::message_ttl_seconds(),
            max_retries: defaults::max_retries(),
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryPolicyKind {
    /// Same delay after every failure
    #[default]
    Flat,
    Exponential,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default)]
    pub policy: RetryPolicyKind,

    #[serde(default = "defaults::initial_delay_seconds")]
    pub initial_delay_seconds: u64,

    #[serde(default = "defaults::backoff_factor")]
    pub backoff_factor: f64,

    #[serde(default = "defaults::jitter")]
    pub jitter: f64,

    #[serde(default = "defaults::max_delay_seconds")]
    pub max_delay_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            policy: RetryPolicyKind::default(),
            initial_delay_seconds: defaults::initial_delay_seconds(),
            backoff_factor: defaults::backoff_factor(),
            jitter: defaults::jitter(),
            max_delay_seconds: defaults::max_delay_seconds(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocksConfig {
    #[serde(default = "defaults::lock_ttl_seconds")]
    pub default_ttl_seconds: u64,

    #[serde(default = "defaults::max_poll_interval_seconds")]
    pub max_poll_interval_seconds: u64,

    #[serde(default = "defaults::acquire_poll_interval_ms")]
    pub acquire_poll_interval_ms: u64,

    #[serde(default = "defaults::renewal_retry_interval_ms")]
    pub renewal_retry_interval_ms: u64,

    /// Absent = block until acquired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_timeout_seconds: Option<u64>,
}

impl Default for LocksConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: defaults::lock_ttl_seconds(),
            max_poll_interval_seconds: defaults::max_poll_interval_seconds(),
            acquire_poll_interval_ms: defaults::acquire_poll_interval_ms(),
            renewal_retry_interval_ms: defaults::renewal_retry_interval_ms(),
            acquire_timeout_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PowerConfig {
    #[serde(default = "defaults::ipmitool_path")]
    pub ipmitool_path: String,

    #[serde(default = "defaults::ipmi_interface")]
    pub interface: String,

    /// Status polls after a power command
    #[serde(default = "defaults::power_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "defaults::power_wait_time_ms")]
    pub wait_time_ms: u64,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            ipmitool_path: defaults::ipmitool_path(),
            interface: defaults::ipmi_interface(),
            max_attempts: defaults::power_max_attempts(),
            wait_time_ms: defaults::power_wait_time_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` wins when set
    #[serde(default = "defaults::log_filter")]
    pub filter: String,

    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: defaults::log_filter(),
            format: LogFormat::default(),
        }
    }
}

impl OverlordConfig {
    /// Load from a specific path
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load from `path`, or from the default location when it exists, or
    /// fall back to built-in defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::load(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Parse and validate a TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: OverlordConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let jobs = &self.jobs;
        if jobs.queue_name.is_empty() {
            return Err(invalid("jobs.queue_name", "queue name cannot be empty"));
        }
        if jobs.worker_count == 0 {
            return Err(invalid("jobs.worker_count", "at least one worker is required"));
        }
        if jobs.poll_interval_ms == 0 || jobs.poll_interval_ms >= 1000 {
            return Err(invalid(
                "jobs.poll_interval_ms",
                format!("must be between 1 and 999, got {}", jobs.poll_interval_ms),
            ));
        }
        if jobs.claim_ttl_seconds == 0 {
            return Err(invalid("jobs.claim_ttl_seconds", "must be greater than 0"));
        }
        if jobs.message_ttl_seconds == 0 {
            return Err(invalid("jobs.message_ttl_seconds", "must be greater than 0"));
        }
        if jobs.max_retries == 0 {
            return Err(invalid("jobs.max_retries", "must be greater than 0"));
        }

        let retry = &jobs.retry;
        if !(0.0..=1.0).contains(&retry.jitter) {
            return Err(invalid(
                "jobs.retry.jitter",
                format!("must be within [0, 1], got {}", retry.jitter),
            ));
        }
        if !retry.backoff_factor.is_finite() || retry.backoff_factor < 1.0 {
            return Err(invalid(
                "jobs.retry.backoff_factor",
                format!("must be at least 1.0, got {}", retry.backoff_factor),
            ));
        }
        if retry.max_delay_seconds < retry.initial_delay_seconds {
            return Err(invalid(
                "jobs.retry.max_delay_seconds",
                "cannot be smaller than initial_delay_seconds",
            ));
        }

        let locks = &self.locks;
        if locks.default_ttl_seconds == 0 {
            return Err(invalid("locks.default_ttl_seconds", "must be greater than 0"));
        }
        if locks.max_poll_interval_seconds == 0 {
            return Err(invalid("locks.max_poll_interval_seconds", "must be greater than 0"));
        }
        if locks.acquire_poll_interval_ms == 0 {
            return Err(invalid("locks.acquire_poll_interval_ms", "must be greater than 0"));
        }

        if self.power.max_attempts == 0 {
            return Err(invalid("power.max_attempts", "must be greater than 0"));
        }
        if self.power.ipmitool_path.is_empty() {
            return Err(invalid("power.ipmitool_path", "cannot be empty"));
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> Arc<dyn RetryPolicy> {
        let retry = &self.jobs.retry;
        let initial = Duration::from_secs(retry.initial_delay_seconds);
        match retry.policy {
            RetryPolicyKind::Flat => Arc::new(FlatDelay::new(initial)),
            RetryPolicyKind::Exponential => Arc::new(ExponentialBackoff {
                initial,
                factor: retry.backoff_factor,
                jitter: retry.jitter,
                max: Duration::from_secs(retry.max_delay_seconds),
            }),
        }
    }

    pub fn job_settings(&self) -> JobSettings {
        let jobs = &self.jobs;
        JobSettings {
            queue_name: jobs.queue_name.clone(),
            poll_interval: Duration::from_millis(jobs.poll_interval_ms),
            claim_ttl: Duration::from_secs(jobs.claim_ttl_seconds),
            claim_grace: Duration::from_secs(jobs.claim_grace_seconds),
            message_ttl: Duration::from_secs(jobs.message_ttl_seconds),
            max_retries: jobs.max_retries,
            lock_ttl: Duration::from_secs(self.locks.default_ttl_seconds),
            retry_policy: self.retry_policy(),
        }
    }

    pub fn lock_manager_config(&self) -> LockManagerConfig {
        let locks = &self.locks;
        LockManagerConfig {
            acquire_poll_interval: Duration::from_millis(locks.acquire_poll_interval_ms),
            max_poll_interval: Duration::from_secs(locks.max_poll_interval_seconds),
            renewal_retry_interval: Duration::from_millis(locks.renewal_retry_interval_ms),
            acquire_timeout: locks.acquire_timeout_seconds.map(Duration::from_secs),
        }
    }

    pub fn power_driver_config(&self) -> PowerDriverConfig {
        PowerDriverConfig {
            max_attempts: self.power.max_attempts,
            wait_time: Duration::from_millis(self.power.wait_time_ms),
        }
    }

    pub fn ipmitool_config(&self) -> IpmitoolConfig {
        IpmitoolConfig {
            path: self.power.ipmitool_path.clone(),
            interface: self.power.interface.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = OverlordConfig::parse("").unwrap();
        assert_eq!(config.jobs.queue_name, "overlord_jobs");
        assert_eq!(config.jobs.worker_count, 4);
        assert_eq!(config.jobs.poll_interval_ms, 500);
        assert_eq!(config.jobs.claim_grace_seconds, 43_200);
        assert_eq!(config.jobs.max_retries, 10);
        assert_eq!(config.jobs.retry.policy, RetryPolicyKind::Flat);
        assert_eq!(config.locks.default_ttl_seconds, 30);
        assert_eq!(config.locks.acquire_timeout_seconds, None);
        assert_eq!(config.power.max_attempts, 10);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_parse_sections() {
        let toml = r#"
[jobs]
worker_count = 8
poll_interval_ms = 250

[jobs.retry]
policy = "exponential"
jitter = 0.0

[locks]
acquire_timeout_seconds = 5

[power]
interface = "lan"
wait_time_ms = 100

[logging]
filter = "debug"
format = "compact"
"#;
        let config = OverlordConfig::parse(toml).unwrap();
        assert_eq!(config.jobs.worker_count, 8);
        assert_eq!(config.jobs.retry.policy, RetryPolicyKind::Exponential);
        assert_eq!(config.power.interface, "lan");
        assert_eq!(config.logging.format, LogFormat::Compact);

        let settings = config.job_settings();
        assert_eq!(settings.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.lock_ttl, Duration::from_secs(30));
        // jitter 0: deterministic
        assert_eq!(settings.retry_policy.delay(2), Duration::from_secs(120));

        assert_eq!(
            config.lock_manager_config().acquire_timeout,
            Some(Duration::from_secs(5))
        );
        assert_eq!(config.power_driver_config().wait_time, Duration::from_millis(100));
    }

    #[test]
    fn test_flat_policy_is_default() {
        let policy = OverlordConfig::default().retry_policy();
        assert_eq!(policy.delay(1), Duration::from_secs(60));
        assert_eq!(policy.delay(5), Duration::from_secs(60));
    }

    #[test]
    fn test_rejects_invalid_values() {
        let cases = [
            ("[jobs]\nworker_count = 0", "jobs.worker_count"),
            ("[jobs]\npoll_interval_ms = 1000", "jobs.poll_interval_ms"),
            ("[jobs]\nclaim_ttl_seconds = 0", "jobs.claim_ttl_seconds"),
            ("[jobs.retry]\njitter = 1.5", "jobs.retry.jitter"),
            ("[jobs.retry]\nbackoff_factor = 0.5", "jobs.retry.backoff_factor"),
            ("[locks]\ndefault_ttl_seconds = 0", "locks.default_ttl_seconds"),
            ("[power]\nmax_attempts = 0", "power.max_attempts"),
        ];
        for (toml, expected_field) in cases {
            match OverlordConfig::parse(toml) {
                Err(ConfigError::InvalidValue { field, .. }) => assert_eq!(field, expected_field),
                other => panic!("expected InvalidValue for {expected_field}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(matches!(
            OverlordConfig::parse("[jobs]\nworkers = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_unknown_policy_rejected() {
        assert!(matches!(
            OverlordConfig::parse("[jobs.retry]\npolicy = \"fibonacci\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let result = OverlordConfig::load(Path::new("/nonexistent/overlord.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }
}
