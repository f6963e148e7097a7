//! Job notification queue
//!
//! Claim-based message queue interface consumed by the job executor and the
//! job client:
//! - a claim hides a message from other consumers until its TTL lapses
//! - an abandoned claim makes the message claimable again (crash recovery)
//! - `grace` keeps a claimed message alive past its claim so it can be reclaimed

mod memory;

pub use memory::MemoryQueue;

use std::time::Duration;

use serde_json::Value;

/// Result type for queue operations
pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue unavailable: {0}")]
    Unavailable(String),

    #[error("No such queue: {0}")]
    NoSuchQueue(String),

    #[error("Claim {claim_id} on message {message_id} is no longer held")]
    ClaimExpired {
        message_id: String,
        claim_id: String,
    },
}

/// A message as pushed by a producer.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub queue: String,
    pub body: Value,
    pub ttl: Duration,
}

/// A message together with the claim that grants exclusive visibility of it.
#[derive(Debug, Clone)]
pub struct ClaimedMessage {
    pub message_id: String,
    pub queue: String,
    pub body: Value,
    /// Handle used to renew, release or delete under this claim
    pub claim_id: String,
    pub ttl: Duration,
    pub grace: Duration,
}

/// Claim/lease message queue.
pub trait Queue: Send + Sync {
    /// Create the queue if it does not exist yet.
    fn ensure_queue(&self, name: &str) -> QueueResult<()>;

    fn push_message(&self, queue: &str, body: Value, ttl: Duration) -> QueueResult<Message>;

    /// Claim one visible message, or `None` when the queue is empty.
    fn claim_message(
        &self,
        queue: &str,
        ttl: Duration,
        grace: Duration,
    ) -> QueueResult<Option<ClaimedMessage>>;

    /// Reset the claim deadline to `ttl` from now.
    fn update_claim(&self, claim: &ClaimedMessage, ttl: Duration) -> QueueResult<()>;

    /// Give the message back immediately.
    fn release_claim(&self, claim: &ClaimedMessage) -> QueueResult<()>;

    /// Delete the message under the caller's claim.
    fn delete_message(&self, message: &ClaimedMessage) -> QueueResult<()>;
}
