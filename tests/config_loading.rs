//! Config File Tests
//!
//! Loading configuration from disk and turning it into runtime settings.

use std::fs;
use std::time::Duration;

use fleet_overlord::config::{ConfigError, OverlordConfig, RetryPolicyKind};
use tempfile::TempDir;

fn write_config(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("overlord.toml");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn test_load_from_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[jobs]
queue_name = "rack_jobs"
worker_count = 2
poll_interval_ms = 100
max_retries = 5

[jobs.retry]
policy = "exponential"
initial_delay_seconds = 10
max_delay_seconds = 300

[locks]
default_ttl_seconds = 15
acquire_timeout_seconds = 120

[power]
interface = "lan"
max_attempts = 4
wait_time_ms = 250
"#,
    );

    let config = OverlordConfig::load(&path).unwrap();
    assert_eq!(config.jobs.retry.policy, RetryPolicyKind::Exponential);

    let settings = config.job_settings();
    assert_eq!(settings.queue_name, "rack_jobs");
    assert_eq!(settings.poll_interval, Duration::from_millis(100));
    assert_eq!(settings.max_retries, 5);
    assert_eq!(settings.lock_ttl, Duration::from_secs(15));

    let locks = config.lock_manager_config();
    assert_eq!(locks.acquire_timeout, Some(Duration::from_secs(120)));

    let power = config.power_driver_config();
    assert_eq!(power.max_attempts, 4);
    assert_eq!(power.wait_time, Duration::from_millis(250));
    assert_eq!(config.ipmitool_config().interface, "lan");
}

#[test]
fn test_exponential_policy_from_file_is_capped() {
    let dir = TempDir::new().unwrap();
    let path = write_config(
        &dir,
        r#"
[jobs.retry]
policy = "exponential"
initial_delay_seconds = 10
backoff_factor = 3.0
jitter = 0.0
max_delay_seconds = 60
"#,
    );

    let policy = OverlordConfig::load(&path).unwrap().retry_policy();
    assert_eq!(policy.delay(1), Duration::from_secs(10));
    assert_eq!(policy.delay(2), Duration::from_secs(30));
    assert_eq!(policy.delay(3), Duration::from_secs(60));
    assert_eq!(policy.delay(8), Duration::from_secs(60));
}

#[test]
fn test_explicit_missing_path_is_an_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");

    let err = OverlordConfig::load_or_default(Some(&missing)).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound(ref p) if *p == missing));
}

#[test]
fn test_invalid_value_in_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[jobs]\npoll_interval_ms = 1500\n");

    let err = OverlordConfig::load(&path).unwrap_err();
    match err {
        ConfigError::InvalidValue { field, .. } => assert_eq!(field, "jobs.poll_interval_ms"),
        other => panic!("expected InvalidValue, got {other:?}"),
    }
}

#[test]
fn test_malformed_toml() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[jobs\nworker_count = ");

    assert!(matches!(
        OverlordConfig::load(&path),
        Err(ConfigError::Parse(_))
    ));
}

#[test]
fn test_effective_config_serializes() {
    let config = OverlordConfig::parse("[jobs]\nworker_count = 3\n").unwrap();
    let json = serde_json::to_value(&config).unwrap();
    assert_eq!(json["jobs"]["worker_count"], 3);
    assert_eq!(json["jobs"]["retry"]["policy"], "flat");
    assert!(json["locks"].get("acquire_timeout_seconds").is_none());
}
