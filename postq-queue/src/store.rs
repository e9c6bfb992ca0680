use async_trait::async_trait;

use crate::{MessageId, QueuedMessage};

/// Storage for the outbound queue
///
/// The delivery loop only ever talks to the queue through this trait, so any
/// datastore that can filter, update a timestamp and delete by ID can back it.
#[async_trait]
pub trait MessageStore: Send + Sync + std::fmt::Debug {
    /// Add a message to the queue
    ///
    /// # Errors
    /// If the message cannot be persisted
    async fn insert(&self, message: QueuedMessage) -> crate::Result<MessageId>;

    /// Messages ready for a delivery attempt, oldest first
    ///
    /// A message qualifies when it matches `domain` (if given) and either has
    /// never been attempted or was last attempted at or before
    /// `cooldown_cutoff`. At most `limit` messages are returned.
    ///
    /// # Errors
    /// If the queue cannot be read
    async fn fetch_eligible(
        &self,
        domain: Option<&str>,
        cooldown_cutoff: u64,
        limit: Option<usize>,
    ) -> crate::Result<Vec<QueuedMessage>>;

    /// Record a failed attempt at `attempted_at`
    ///
    /// # Errors
    /// If the message is gone or the update cannot be persisted
    async fn record_attempt(&self, id: &MessageId, attempted_at: u64) -> crate::Result<()>;

    /// Remove a message from the queue
    ///
    /// # Errors
    /// If the message is gone or cannot be removed
    async fn delete(&self, id: &MessageId) -> crate::Result<()>;

    /// Remove every message created before `cutoff`
    ///
    /// With `require_attempted`, only messages that have had at least one
    /// failed attempt are removed. Returns how many were removed.
    ///
    /// # Errors
    /// If the queue cannot be read or a message cannot be removed
    async fn expire_older_than(&self, cutoff: u64, require_attempted: bool)
    -> crate::Result<usize>;

    /// Every queued message, oldest first
    ///
    /// # Errors
    /// If the queue cannot be read
    async fn list(&self) -> crate::Result<Vec<QueuedMessage>>;
}
