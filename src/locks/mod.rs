//! Distributed lease-based locking
//!
//! Named mutual-exclusion leases held against a coordination store, with a
//! single background thread per manager that renews every held lease once
//! two thirds of its TTL remain or less.
//!
//! - `acquire` blocks until the store grants the lease, registers it and wakes
//!   the renewal thread
//! - dropping the returned `LockGuard` unregisters and releases the lease
//! - a failed renewal marks the guard lost and is retried later; the holder
//!   decides what to do about it

mod coordinator;

pub use coordinator::{Coordinator, MemoryCoordinator};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

/// Result type for lock operations
pub type LockResult<T> = Result<T, LockError>;

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Timed out after {waited:?} waiting for lock {key}")]
    Timeout { key: String, waited: Duration },

    #[error("Lease on {key} is no longer held")]
    LeaseLost { key: String },

    #[error("Coordination store unavailable: {0}")]
    Unavailable(String),
}

/// Lock manager settings
#[derive(Debug, Clone)]
pub struct LockManagerConfig {
    /// Pause between attempts while a key is held elsewhere
    pub acquire_poll_interval: Duration,
    /// Longest the renewal thread sleeps
    pub max_poll_interval: Duration,
    /// Delay before retrying a failed renewal
    pub renewal_retry_interval: Duration,
    /// Give up acquiring after this long (`None` = wait forever)
    pub acquire_timeout: Option<Duration>,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            acquire_poll_interval: Duration::from_millis(100),
            max_poll_interval: Duration::from_secs(60),
            renewal_retry_interval: Duration::from_secs(1),
            acquire_timeout: None,
        }
    }
}

/// Contention longer than this is logged once per acquisition
const CONTENTION_WARNING: Duration = Duration::from_millis(500);

/// Renew once the remaining TTL drops to two thirds of the full TTL.
pub fn renewal_threshold(ttl: Duration) -> Duration {
    ttl * 2 / 3
}

#[derive(Debug)]
struct HeldLock {
    lease_id: String,
    ttl: Duration,
    expires_at: Instant,
    renewal_threshold: Duration,
    retry_at: Option<Instant>,
    renewals: u64,
    lost: Arc<AtomicBool>,
}

impl HeldLock {
    fn current_ttl(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    fn is_due(&self, now: Instant) -> bool {
        self.current_ttl(now) <= self.renewal_threshold
            && self.retry_at.map_or(true, |at| at <= now)
    }

    /// Time until this lock next needs attention
    fn until_due(&self, now: Instant) -> Duration {
        match self.retry_at {
            Some(at) if at > now => at - now,
            _ => self.current_ttl(now).saturating_sub(self.renewal_threshold),
        }
    }
}

#[derive(Debug, Default)]
struct HeldTable {
    locks: HashMap<String, HeldLock>,
    wake_requested: bool,
    shutdown: bool,
}

struct Shared {
    coordinator: Arc<dyn Coordinator>,
    config: LockManagerConfig,
    table: Mutex<HeldTable>,
    wake: Condvar,
}

impl Shared {
    fn table(&self) -> MutexGuard<'_, HeldTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wake_renewer(&self, table: &mut HeldTable) {
        table.wake_requested = true;
        self.wake.notify_all();
    }

    fn unregister(&self, key: &str, lease_id: &str) {
        let mut table = self.table();
        if table
            .locks
            .get(key)
            .is_some_and(|held| held.lease_id == lease_id)
        {
            table.locks.remove(key);
        }
    }
}

/// Lease lock manager owning one renewal thread.
pub struct LockManager {
    shared: Arc<Shared>,
    renewer: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    /// Create a manager and start its renewal thread.
    pub fn new(coordinator: Arc<dyn Coordinator>, config: LockManagerConfig) -> Self {
        let shared = Arc::new(Shared {
            coordinator,
            config,
            table: Mutex::new(HeldTable::default()),
            wake: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        let renewer = std::thread::Builder::new()
            .name("lock-renewal".to_string())
            .spawn(move || renewal_loop(thread_shared));

        let renewer = match renewer {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(error = %e, "failed to start lock renewal thread");
                None
            }
        };

        Self {
            shared,
            renewer: Mutex::new(renewer),
        }
    }

    /// Block until `key` is granted for `ttl`, then keep it renewed until the
    /// returned guard is dropped.
    pub fn acquire(&self, key: &str, ttl: Duration) -> LockResult<LockGuard> {
        let start = Instant::now();
        let mut warned = false;

        loop {
            if let Some(lease_id) = self.shared.coordinator.try_acquire(key, ttl)? {
                if warned {
                    info!(
                        lock_key = key,
                        waited_ms = start.elapsed().as_millis() as u64,
                        "lock acquired after contention"
                    );
                }
                return Ok(self.register(key, lease_id, ttl));
            }

            if !warned && start.elapsed() > CONTENTION_WARNING {
                warn!(lock_key = key, "lock contention, waiting");
                warned = true;
            }

            if let Some(timeout) = self.shared.config.acquire_timeout {
                if start.elapsed() >= timeout {
                    return Err(LockError::Timeout {
                        key: key.to_string(),
                        waited: start.elapsed(),
                    });
                }
            }

            std::thread::sleep(self.shared.config.acquire_poll_interval);
        }
    }

    fn register(&self, key: &str, lease_id: String, ttl: Duration) -> LockGuard {
        let lost = Arc::new(AtomicBool::new(false));
        let mut table = self.shared.table();
        table.locks.insert(
            key.to_string(),
            HeldLock {
                lease_id: lease_id.clone(),
                ttl,
                expires_at: Instant::now() + ttl,
                renewal_threshold: renewal_threshold(ttl),
                retry_at: None,
                renewals: 0,
                lost: Arc::clone(&lost),
            },
        );
        self.shared.wake_renewer(&mut table);
        debug!(lock_key = key, ttl_ms = ttl.as_millis() as u64, "lock acquired");

        LockGuard {
            key: key.to_string(),
            lease_id,
            lost,
            shared: Arc::clone(&self.shared),
            released: false,
        }
    }

    /// Keys currently held by this manager.
    pub fn held_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.shared.table().locks.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Successful renewals of a held key, `None` if not held.
    pub fn renewal_count(&self, key: &str) -> Option<u64> {
        self.shared.table().locks.get(key).map(|l| l.renewals)
    }

    /// Stop the renewal thread. Held leases are no longer renewed.
    pub fn shutdown(&self) {
        {
            let mut table = self.shared.table();
            table.shutdown = true;
            self.shared.wake.notify_all();
        }
        let handle = self
            .renewer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("lock renewal thread panicked");
            }
        }
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A held lease; released when dropped.
pub struct LockGuard {
    key: String,
    lease_id: String,
    lost: Arc<AtomicBool>,
    shared: Arc<Shared>,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("lease_id", &self.lease_id)
            .field("lost", &self.is_lost())
            .finish()
    }
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True while the most recent renewal attempt failed.
    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    /// Release explicitly, surfacing coordination errors.
    pub fn release(mut self) -> LockResult<()> {
        self.released = true;
        self.shared.unregister(&self.key, &self.lease_id);
        self.shared.coordinator.release(&self.key, &self.lease_id)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.shared.unregister(&self.key, &self.lease_id);
        if let Err(e) = self.shared.coordinator.release(&self.key, &self.lease_id) {
            warn!(lock_key = %self.key, error = %e, "failed to release lock");
        }
    }
}

fn renewal_loop(shared: Arc<Shared>) {
    let mut table = shared.table();

    loop {
        if table.shutdown {
            break;
        }
        table.wake_requested = false;

        let now = Instant::now();
        let due: Vec<(String, String, Duration)> = table
            .locks
            .iter()
            .filter(|(_, held)| held.is_due(now))
            .map(|(key, held)| (key.clone(), held.lease_id.clone(), held.ttl))
            .collect();

        if !due.is_empty() {
            // Talk to the store without blocking acquirers and releasers
            drop(table);
            let results: Vec<_> = due
                .into_iter()
                .map(|(key, lease_id, ttl)| {
                    let result = shared.coordinator.renew(&key, &lease_id, ttl);
                    (key, lease_id, ttl, result)
                })
                .collect();

            table = shared.table();
            let now = Instant::now();
            for (key, lease_id, ttl, result) in results {
                let Some(held) = table
                    .locks
                    .get_mut(&key)
                    .filter(|held| held.lease_id == lease_id)
                else {
                    // Released while we were renewing
                    continue;
                };

                match result {
                    Ok(()) => {
                        held.expires_at = now + ttl;
                        held.retry_at = None;
                        held.renewals += 1;
                        held.lost.store(false, Ordering::SeqCst);
                        debug!(lock_key = %key, "lock renewed");
                    }
                    Err(e) => {
                        held.retry_at = Some(now + shared.config.renewal_retry_interval);
                        held.lost.store(true, Ordering::SeqCst);
                        error!(
                            lock_key = %key,
                            error = %e,
                            remaining_ms = held.current_ttl(now).as_millis() as u64,
                            "lock renewal failed"
                        );
                    }
                }
            }
            continue;
        }

        let wait = table
            .locks
            .values()
            .map(|held| held.until_due(now))
            .min()
            .unwrap_or(shared.config.max_poll_interval)
            .min(shared.config.max_poll_interval)
            .max(Duration::from_millis(1));

        table = match shared
            .wake
            .wait_timeout_while(table, wait, |t| !t.wake_requested && !t.shutdown)
        {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        };
    }

    debug!("lock renewal thread exiting");
}
