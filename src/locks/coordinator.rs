//! Coordination store interface and in-memory backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{LockError, LockResult};

/// External lease service backing the lock manager.
pub trait Coordinator: Send + Sync {
    /// Try once to take `key`. Returns the lease id when granted, `None`
    /// when another holder has it.
    fn try_acquire(&self, key: &str, ttl: Duration) -> LockResult<Option<String>>;

    /// Extend a held lease to `ttl` from now.
    fn renew(&self, key: &str, lease_id: &str, ttl: Duration) -> LockResult<()>;

    /// Give the lease up. Unknown or already expired leases are not an error.
    fn release(&self, key: &str, lease_id: &str) -> LockResult<()>;
}

#[derive(Debug, Clone)]
struct Lease {
    lease_id: String,
    expires_at: Instant,
}

impl Lease {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Default)]
struct MemoryCoordinatorInner {
    leases: HashMap<String, Lease>,
    renewals: HashMap<String, u64>,
    fail_renewals: bool,
    id_counter: u64,
}

/// In-process coordination store.
#[derive(Debug, Clone, Default)]
pub struct MemoryCoordinator {
    inner: Arc<Mutex<MemoryCoordinatorInner>>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryCoordinatorInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every renewal fail with `Unavailable`.
    pub fn set_fail_renewals(&self, fail: bool) {
        self.lock().fail_renewals = fail;
    }

    /// Successful renewals of `key` so far.
    pub fn renew_count(&self, key: &str) -> u64 {
        self.lock().renewals.get(key).copied().unwrap_or(0)
    }

    /// Whether a live lease exists for `key`.
    pub fn is_held(&self, key: &str) -> bool {
        let now = Instant::now();
        self.lock()
            .leases
            .get(key)
            .is_some_and(|l| !l.is_expired(now))
    }
}

impl Coordinator for MemoryCoordinator {
    fn try_acquire(&self, key: &str, ttl: Duration) -> LockResult<Option<String>> {
        let mut inner = self.lock();
        let now = Instant::now();

        if inner.leases.get(key).is_some_and(|l| !l.is_expired(now)) {
            return Ok(None);
        }

        inner.id_counter += 1;
        let lease_id = format!("lease-{:08x}", inner.id_counter);
        inner.leases.insert(
            key.to_string(),
            Lease {
                lease_id: lease_id.clone(),
                expires_at: now + ttl,
            },
        );
        Ok(Some(lease_id))
    }

    fn renew(&self, key: &str, lease_id: &str, ttl: Duration) -> LockResult<()> {
        let mut inner = self.lock();
        if inner.fail_renewals {
            return Err(LockError::Unavailable("coordination store unreachable".to_string()));
        }

        let now = Instant::now();
        match inner.leases.get_mut(key) {
            Some(lease) if lease.lease_id == lease_id && !lease.is_expired(now) => {
                lease.expires_at = now + ttl;
            }
            _ => {
                return Err(LockError::LeaseLost {
                    key: key.to_string(),
                })
            }
        }
        *inner.renewals.entry(key.to_string()).or_default() += 1;
        Ok(())
    }

    fn release(&self, key: &str, lease_id: &str) -> LockResult<()> {
        let mut inner = self.lock();
        let now = Instant::now();
        let current = inner
            .leases
            .get(key)
            .map(|l| (l.lease_id == lease_id, l.is_expired(now)));
        match current {
            Some((true, _)) => {
                inner.leases.remove(key);
                Ok(())
            }
            Some((false, false)) => Err(LockError::LeaseLost {
                key: key.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exclusive_until_expiry() {
        let coord = MemoryCoordinator::new();
        let first = coord.try_acquire("/k", Duration::from_millis(20)).unwrap();
        assert!(first.is_some());
        assert!(coord.try_acquire("/k", Duration::from_secs(1)).unwrap().is_none());

        std::thread::sleep(Duration::from_millis(40));
        let second = coord.try_acquire("/k", Duration::from_secs(1)).unwrap();
        assert!(second.is_some());
        assert_ne!(first, second);
    }

    #[test]
    fn test_renew_foreign_or_expired_lease_fails() {
        let coord = MemoryCoordinator::new();
        let lease = coord
            .try_acquire("/k", Duration::from_millis(10))
            .unwrap()
            .unwrap();
        assert!(matches!(
            coord.renew("/k", "lease-bogus", Duration::from_secs(1)),
            Err(LockError::LeaseLost { .. })
        ));

        std::thread::sleep(Duration::from_millis(30));
        assert!(coord.renew("/k", &lease, Duration::from_secs(1)).is_err());
        assert_eq!(coord.renew_count("/k"), 0);
    }

    #[test]
    fn test_release_is_idempotent() {
        let coord = MemoryCoordinator::new();
        let lease = coord
            .try_acquire("/k", Duration::from_secs(1))
            .unwrap()
            .unwrap();
        coord.release("/k", &lease).unwrap();
        coord.release("/k", &lease).unwrap();
        assert!(!coord.is_held("/k"));
    }

    #[test]
    fn test_release_of_key_taken_over_fails() {
        let coord = MemoryCoordinator::new();
        let stale = coord
            .try_acquire("/k", Duration::from_millis(10))
            .unwrap()
            .unwrap();
        std::thread::sleep(Duration::from_millis(30));
        coord.try_acquire("/k", Duration::from_secs(5)).unwrap().unwrap();

        assert!(coord.release("/k", &stale).is_err());
        assert!(coord.is_held("/k"));
    }
}
