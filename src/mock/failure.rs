//! Failure injection for mock providers
//!
//! Supports configurable failure injection for testing job retry paths.

use std::collections::HashMap;
use std::time::Duration;

/// Provider call that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOp {
    GetImageInfo,
    Attach,
    Detach,
    PrepareImage,
    RunImage,
    Decommission,
}

impl ProviderOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderOp::GetImageInfo => "get_image_info",
            ProviderOp::Attach => "attach",
            ProviderOp::Detach => "detach",
            ProviderOp::PrepareImage => "prepare_image",
            ProviderOp::RunImage => "run_image",
            ProviderOp::Decommission => "decommission",
        }
    }
}

/// Failure configuration for an operation
#[derive(Debug, Clone)]
pub struct FailureConfig {
    /// Error message to return (None = only delay)
    pub message: Option<String>,
    /// Report the failure as unreachable rather than a rejected request
    pub unreachable: bool,
    /// Delay to add before responding
    pub delay: Option<Duration>,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
}

impl FailureConfig {
    /// Create a config that rejects the request
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            unreachable: false,
            delay: None,
            fail_count: None,
        }
    }

    /// Create a config that reports the provider as unreachable
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self {
            unreachable: true,
            ..Self::error(message)
        }
    }

    /// Create a config that just adds delay
    pub fn delay(duration: Duration) -> Self {
        Self {
            message: None,
            unreachable: false,
            delay: Some(duration),
            fail_count: None,
        }
    }

    /// Set the number of times to fail before succeeding
    pub fn with_fail_count(mut self, count: u32) -> Self {
        self.fail_count = Some(count);
        self
    }
}

/// Failure injector keyed by provider operation
#[derive(Debug, Default)]
pub struct FailureInjector {
    configs: HashMap<ProviderOp, FailureConfig>,
    call_counts: HashMap<ProviderOp, u32>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a failure for an operation
    pub fn inject(&mut self, op: ProviderOp, config: FailureConfig) {
        self.configs.insert(op, config);
        self.call_counts.insert(op, 0);
    }

    /// Clear all failure injections
    pub fn clear(&mut self) {
        self.configs.clear();
        self.call_counts.clear();
    }

    /// Clear failure injection for a specific operation
    pub fn clear_op(&mut self, op: ProviderOp) {
        self.configs.remove(&op);
        self.call_counts.remove(&op);
    }

    /// Returns the failure config if this call should fail, None otherwise
    pub fn check(&mut self, op: ProviderOp) -> Option<&FailureConfig> {
        let config = self.configs.get(&op)?;
        config.message.as_ref()?;

        let count = self.call_counts.entry(op).or_insert(0);
        *count += 1;
        if let Some(fail_limit) = config.fail_count {
            if *count > fail_limit {
                return None;
            }
        }
        Some(config)
    }

    /// Get the delay for an operation (if any)
    pub fn get_delay(&self, op: ProviderOp) -> Option<Duration> {
        self.configs.get(&op).and_then(|c| c.delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_injector_basic() {
        let mut injector = FailureInjector::new();
        assert!(injector.check(ProviderOp::Attach).is_none());

        injector.inject(ProviderOp::Attach, FailureConfig::error("switch port down"));
        let config = injector.check(ProviderOp::Attach).unwrap();
        assert_eq!(config.message.as_deref(), Some("switch port down"));
        assert!(!config.unreachable);
    }

    #[test]
    fn test_failure_injector_fail_count() {
        let mut injector = FailureInjector::new();

        // Fail twice, then succeed
        injector.inject(
            ProviderOp::RunImage,
            FailureConfig::unreachable("agent timeout").with_fail_count(2),
        );
        assert!(injector.check(ProviderOp::RunImage).is_some());
        assert!(injector.check(ProviderOp::RunImage).is_some());
        assert!(injector.check(ProviderOp::RunImage).is_none());
    }

    #[test]
    fn test_delay_only_never_fails() {
        let mut injector = FailureInjector::new();
        injector.inject(
            ProviderOp::Decommission,
            FailureConfig::delay(Duration::from_millis(5)),
        );
        assert!(injector.check(ProviderOp::Decommission).is_none());
        assert_eq!(
            injector.get_delay(ProviderOp::Decommission),
            Some(Duration::from_millis(5))
        );
    }

    #[test]
    fn test_failure_injector_clear() {
        let mut injector = FailureInjector::new();
        injector.inject(ProviderOp::Detach, FailureConfig::error("boom"));
        assert!(injector.check(ProviderOp::Detach).is_some());

        injector.clear_op(ProviderOp::Detach);
        assert!(injector.check(ProviderOp::Detach).is_none());
    }
}
