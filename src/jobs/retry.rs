//! Retry delay policies
//!
//! A failed attempt that still has budget left is parked until
//! `now + policy.delay(failed_attempts)`.

use std::time::Duration;

use rand::Rng;

/// Delay before the next attempt of a failed job.
pub trait RetryPolicy: Send + Sync + std::fmt::Debug {
    /// `failed_attempts` counts the failure being handled, so the first
    /// failure passes 1.
    fn delay(&self, failed_attempts: u32) -> Duration;
}

/// Same delay after every failure.
#[derive(Debug, Clone, Copy)]
pub struct FlatDelay {
    pub delay: Duration,
}

impl FlatDelay {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for FlatDelay {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl RetryPolicy for FlatDelay {
    fn delay(&self, _failed_attempts: u32) -> Duration {
        self.delay
    }
}

/// `initial * factor^(n-1)`, capped at `max`, then spread by ±`jitter`.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub factor: f64,
    /// Fraction of the delay, in [0, 1]
    pub jitter: f64,
    pub max: Duration,
}

impl ExponentialBackoff {
    /// Delay before jitter is applied.
    pub fn base_delay(&self, failed_attempts: u32) -> Duration {
        let exponent = failed_attempts.saturating_sub(1).min(64) as i32;
        let secs = self.initial.as_secs_f64() * self.factor.powi(exponent);
        let capped = secs.min(self.max.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(60),
            factor: 2.0,
            jitter: 0.2,
            max: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn delay(&self, failed_attempts: u32) -> Duration {
        let base = self.base_delay(failed_attempts);
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        let secs = (base.as_secs_f64() * (1.0 + spread)).min(self.max.as_secs_f64());
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_delay_ignores_attempts() {
        let policy = FlatDelay::new(Duration::from_secs(60));
        assert_eq!(policy.delay(1), Duration::from_secs(60));
        assert_eq!(policy.delay(9), Duration::from_secs(60));
    }

    #[test]
    fn test_exponential_growth_and_cap() {
        let policy = ExponentialBackoff {
            initial: Duration::from_secs(10),
            factor: 2.0,
            jitter: 0.0,
            max: Duration::from_secs(60),
        };
        assert_eq!(policy.delay(1), Duration::from_secs(10));
        assert_eq!(policy.delay(2), Duration::from_secs(20));
        assert_eq!(policy.delay(3), Duration::from_secs(40));
        assert_eq!(policy.delay(4), Duration::from_secs(60));
        assert_eq!(policy.delay(40), Duration::from_secs(60));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = ExponentialBackoff {
            initial: Duration::from_secs(100),
            factor: 1.0,
            jitter: 0.2,
            max: Duration::from_secs(1000),
        };
        for _ in 0..100 {
            let d = policy.delay(3).as_secs_f64();
            assert!((80.0..=120.0).contains(&d), "delay {d} out of band");
        }
    }
}
