//! In-memory queue backend.
//!
//! Used by the development binary and by tests. Keeps per-queue FIFO order
//! and the claim/grace semantics of a hosted claim queue.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde_json::Value;

use super::{ClaimedMessage, Message, Queue, QueueError, QueueResult};

#[derive(Debug)]
struct Claim {
    id: String,
    expires_at: Instant,
    grace: Duration,
}

#[derive(Debug)]
struct StoredMessage {
    id: String,
    body: Value,
    expires_at: Instant,
    claim: Option<Claim>,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.claim.as_ref().map_or(true, |c| c.expires_at <= now)
    }

    /// A claimed message outlives its claim by the grace period.
    fn extend_for_claim(&mut self, now: Instant, ttl: Duration, grace: Duration) {
        let needed = now + ttl + grace;
        if needed > self.expires_at {
            self.expires_at = needed;
        }
    }
}

#[derive(Debug, Default)]
struct MemoryQueueInner {
    queues: HashMap<String, Vec<StoredMessage>>,
    unavailable: bool,
    failing_pushes: u32,
    id_counter: u64,
}

impl MemoryQueueInner {
    fn next_id(&mut self, prefix: &str) -> String {
        self.id_counter += 1;
        format!("{}-{:08x}", prefix, self.id_counter)
    }

    fn check_available(&self) -> QueueResult<()> {
        if self.unavailable {
            return Err(QueueError::Unavailable("queue backend is down".to_string()));
        }
        Ok(())
    }

    fn messages_mut(&mut self, queue: &str) -> QueueResult<&mut Vec<StoredMessage>> {
        let now = Instant::now();
        let messages = self
            .queues
            .get_mut(queue)
            .ok_or_else(|| QueueError::NoSuchQueue(queue.to_string()))?;
        messages.retain(|m| m.expires_at > now);
        Ok(messages)
    }

    fn owned_message(
        &mut self,
        claim: &ClaimedMessage,
    ) -> QueueResult<Option<&mut StoredMessage>> {
        let messages = self.messages_mut(&claim.queue)?;
        let Some(m) = messages.iter_mut().find(|m| m.id == claim.message_id) else {
            return Ok(None);
        };
        // Someone else claimed it after ours lapsed
        if m.claim.as_ref().is_some_and(|c| c.id != claim.claim_id) {
            return Err(QueueError::ClaimExpired {
                message_id: claim.message_id.clone(),
                claim_id: claim.claim_id.clone(),
            });
        }
        Ok(Some(m))
    }
}

/// Thread-safe in-memory claim queue.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    inner: Arc<Mutex<MemoryQueueInner>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryQueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simulate the backend going away (every call fails with `Unavailable`).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Fail the next `count` pushes; claims and deletes keep working.
    pub fn fail_next_pushes(&self, count: u32) {
        self.lock().failing_pushes = count;
    }

    /// Live messages in a queue, claimed or not.
    pub fn message_count(&self, queue: &str) -> usize {
        let mut inner = self.lock();
        inner.messages_mut(queue).map(|m| m.len()).unwrap_or(0)
    }

    /// Messages that a consumer could claim right now.
    pub fn visible_count(&self, queue: &str) -> usize {
        let now = Instant::now();
        let mut inner = self.lock();
        inner
            .messages_mut(queue)
            .map(|m| m.iter().filter(|m| m.is_visible(now)).count())
            .unwrap_or(0)
    }

    /// Time left on a message's current claim, if it is claimed.
    pub fn claim_remaining(&self, queue: &str, message_id: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut inner = self.lock();
        let messages = inner.messages_mut(queue).ok()?;
        let claim = messages.iter().find(|m| m.id == message_id)?.claim.as_ref()?;
        Some(claim.expires_at.saturating_duration_since(now))
    }
}

impl Queue for MemoryQueue {
    fn ensure_queue(&self, name: &str) -> QueueResult<()> {
        let mut inner = self.lock();
        inner.check_available()?;
        inner.queues.entry(name.to_string()).or_default();
        Ok(())
    }

    fn push_message(&self, queue: &str, body: Value, ttl: Duration) -> QueueResult<Message> {
        let mut inner = self.lock();
        inner.check_available()?;
        if inner.failing_pushes > 0 {
            inner.failing_pushes -= 1;
            return Err(QueueError::Unavailable("injected push failure".to_string()));
        }
        let id = inner.next_id("msg");
        let messages = inner.messages_mut(queue)?;
        messages.push(StoredMessage {
            id: id.clone(),
            body: body.clone(),
            expires_at: Instant::now() + ttl,
            claim: None,
        });
        Ok(Message {
            id,
            queue: queue.to_string(),
            body,
            ttl,
        })
    }

    fn claim_message(
        &self,
        queue: &str,
        ttl: Duration,
        grace: Duration,
    ) -> QueueResult<Option<ClaimedMessage>> {
        let mut inner = self.lock();
        inner.check_available()?;
        let claim_id = inner.next_id("claim");
        let now = Instant::now();
        let messages = inner.messages_mut(queue)?;

        let Some(message) = messages.iter_mut().find(|m| m.is_visible(now)) else {
            return Ok(None);
        };

        message.claim = Some(Claim {
            id: claim_id.clone(),
            expires_at: now + ttl,
            grace,
        });
        message.extend_for_claim(now, ttl, grace);

        Ok(Some(ClaimedMessage {
            message_id: message.id.clone(),
            queue: queue.to_string(),
            body: message.body.clone(),
            claim_id,
            ttl,
            grace,
        }))
    }

    fn update_claim(&self, claim: &ClaimedMessage, ttl: Duration) -> QueueResult<()> {
        let mut inner = self.lock();
        inner.check_available()?;
        let now = Instant::now();
        let Some(message) = inner.owned_message(claim)? else {
            return Err(QueueError::ClaimExpired {
                message_id: claim.message_id.clone(),
                claim_id: claim.claim_id.clone(),
            });
        };

        let grace = message.claim.as_ref().map_or(claim.grace, |c| c.grace);
        message.claim = Some(Claim {
            id: claim.claim_id.clone(),
            expires_at: now + ttl,
            grace,
        });
        message.extend_for_claim(now, ttl, grace);
        Ok(())
    }

    fn release_claim(&self, claim: &ClaimedMessage) -> QueueResult<()> {
        let mut inner = self.lock();
        inner.check_available()?;
        if let Some(message) = inner.owned_message(claim)? {
            message.claim = None;
        }
        Ok(())
    }

    fn delete_message(&self, message: &ClaimedMessage) -> QueueResult<()> {
        let mut inner = self.lock();
        inner.check_available()?;
        if inner.owned_message(message)?.is_none() {
            return Ok(());
        }
        let messages = inner.messages_mut(&message.queue)?;
        messages.retain(|m| m.id != message.message_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const Q: &str = "jobs";

    fn queue() -> MemoryQueue {
        let q = MemoryQueue::new();
        q.ensure_queue(Q).unwrap();
        q
    }

    #[test]
    fn test_push_requires_queue() {
        let q = MemoryQueue::new();
        let err = q
            .push_message("missing", json!({}), Duration::from_secs(60))
            .unwrap_err();
        assert!(matches!(err, QueueError::NoSuchQueue(_)));
    }

    #[test]
    fn test_claim_hides_message() {
        let q = queue();
        q.push_message(Q, json!({"n": 1}), Duration::from_secs(60)).unwrap();

        let claimed = q
            .claim_message(Q, Duration::from_secs(30), Duration::from_secs(60))
            .unwrap()
            .unwrap();
        assert_eq!(claimed.body["n"], 1);
        assert!(q
            .claim_message(Q, Duration::from_secs(30), Duration::from_secs(60))
            .unwrap()
            .is_none());
        assert_eq!(q.message_count(Q), 1);
    }

    #[test]
    fn test_fifo_order() {
        let q = queue();
        for n in 0..3 {
            q.push_message(Q, json!({"n": n}), Duration::from_secs(60)).unwrap();
        }
        for n in 0..3 {
            let c = q
                .claim_message(Q, Duration::from_secs(30), Duration::from_secs(60))
                .unwrap()
                .unwrap();
            assert_eq!(c.body["n"], n);
        }
    }

    #[test]
    fn test_expired_claim_is_reclaimable() {
        let q = queue();
        q.push_message(Q, json!({}), Duration::from_secs(60)).unwrap();

        let first = q
            .claim_message(Q, Duration::from_millis(10), Duration::from_secs(60))
            .unwrap()
            .unwrap();
        std::thread::sleep(Duration::from_millis(30));

        let second = q
            .claim_message(Q, Duration::from_secs(30), Duration::from_secs(60))
            .unwrap()
            .unwrap();
        assert_eq!(first.message_id, second.message_id);
        assert_ne!(first.claim_id, second.claim_id);

        // The stale claim can no longer delete or extend
        assert!(matches!(
            q.delete_message(&first),
            Err(QueueError::ClaimExpired { .. })
        ));
        assert!(q.update_claim(&first, Duration::from_secs(5)).is_err());
        q.delete_message(&second).unwrap();
        assert_eq!(q.message_count(Q), 0);
    }

    #[test]
    fn test_grace_keeps_claimed_message_alive() {
        let q = queue();
        q.push_message(Q, json!({}), Duration::from_millis(10)).unwrap();
        let claimed = q
            .claim_message(Q, Duration::from_millis(10), Duration::from_secs(60))
            .unwrap()
            .unwrap();

        std::thread::sleep(Duration::from_millis(40));

        // Message ttl and claim are both past, grace keeps it reclaimable
        assert_eq!(q.visible_count(Q), 1);
        let again = q
            .claim_message(Q, Duration::from_secs(1), Duration::from_secs(1))
            .unwrap()
            .unwrap();
        assert_eq!(again.message_id, claimed.message_id);
    }

    #[test]
    fn test_unclaimed_message_expires() {
        let q = queue();
        q.push_message(Q, json!({}), Duration::from_millis(10)).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(q.message_count(Q), 0);
    }

    #[test]
    fn test_update_claim_resets_deadline() {
        let q = queue();
        q.push_message(Q, json!({}), Duration::from_secs(60)).unwrap();
        let claimed = q
            .claim_message(Q, Duration::from_secs(1), Duration::from_secs(60))
            .unwrap()
            .unwrap();

        q.update_claim(&claimed, Duration::from_secs(600)).unwrap();
        let remaining = q.claim_remaining(Q, &claimed.message_id).unwrap();
        assert!(remaining > Duration::from_secs(500));
    }

    #[test]
    fn test_release_claim_makes_visible() {
        let q = queue();
        q.push_message(Q, json!({}), Duration::from_secs(60)).unwrap();
        let claimed = q
            .claim_message(Q, Duration::from_secs(30), Duration::from_secs(60))
            .unwrap()
            .unwrap();
        assert_eq!(q.visible_count(Q), 0);

        q.release_claim(&claimed).unwrap();
        assert_eq!(q.visible_count(Q), 1);
    }

    #[test]
    fn test_unavailable_backend() {
        let q = queue();
        q.set_unavailable(true);
        assert!(matches!(
            q.claim_message(Q, Duration::from_secs(1), Duration::from_secs(1)),
            Err(QueueError::Unavailable(_))
        ));
        q.set_unavailable(false);
        assert!(q
            .claim_message(Q, Duration::from_secs(1), Duration::from_secs(1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_injected_push_failures() {
        let q = queue();
        q.fail_next_pushes(1);
        assert!(matches!(
            q.push_message(Q, json!({}), Duration::from_secs(60)),
            Err(QueueError::Unavailable(_))
        ));
        q.push_message(Q, json!({}), Duration::from_secs(60)).unwrap();
        assert_eq!(q.message_count(Q), 1);
    }
}
