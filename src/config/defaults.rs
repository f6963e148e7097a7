//! Built-in defaults
//!
//! Hardcoded defaults for every configuration value, so an empty config
//! file is valid.

/// Config file read when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/overlord/overlord.toml";

pub(super) fn queue_name() -> String {
    "overlord_jobs".to_string()
}

pub(super) fn worker_count() -> usize {
    4
}

pub(super) fn poll_interval_ms() -> u64 {
    500
}

pub(super) fn claim_ttl_seconds() -> u64 {
    60
}

/// 12 hours
pub(super) fn claim_grace_seconds() -> u64 {
    43_200
}

/// 14 days
pub(super) fn message_ttl_seconds() -> u64 {
    1_209_600
}

pub(super) fn max_retries() -> u32 {
    10
}

pub(super) fn initial_delay_seconds() -> u64 {
    60
}

pub(super) fn backoff_factor() -> f64 {
    2.0
}

pub(super) fn jitter() -> f64 {
    0.2
}

pub(super) fn max_delay_seconds() -> u64 {
    3600
}

pub(super) fn lock_ttl_seconds() -> u64 {
    30
}

pub(super) fn max_poll_interval_seconds() -> u64 {
    60
}

pub(super) fn acquire_poll_interval_ms() -> u64 {
    100
}

pub(super) fn renewal_retry_interval_ms() -> u64 {
    1000
}

pub(super) fn ipmitool_path() -> String {
    "ipmitool".to_string()
}

pub(super) fn ipmi_interface() -> String {
    "lanplus".to_string()
}

pub(super) fn power_max_attempts() -> u32 {
    10
}

pub(super) fn power_wait_time_ms() -> u64 {
    2000
}

pub(super) fn log_filter() -> String {
    "info".to_string()
}
