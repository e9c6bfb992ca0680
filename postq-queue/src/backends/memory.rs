use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;

use crate::{MessageId, QueueError, QueuedMessage, store::MessageStore};

/// In-memory queue
///
/// Messages live in a `BTreeMap` keyed by ULID behind an `RwLock`, so
/// iteration is already in creation order. Used for tests and for running
/// without persistence.
///
/// # Capacity Management
/// An optional capacity makes `insert` fail once the queue is full instead of
/// growing without bound.
#[derive(Debug, Clone, Default)]
pub struct MemoryMessageStore {
    pub(crate) messages: Arc<RwLock<BTreeMap<MessageId, QueuedMessage>>>,
    /// Maximum number of messages to store (None = unlimited)
    capacity: Option<usize>,
}

impl MemoryMessageStore {
    /// Create an empty store with unlimited capacity
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Number of queued messages
    ///
    /// Recovers gracefully if the lock is poisoned by accessing the underlying data.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of a single message, for assertions
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<QueuedMessage> {
        self.messages
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.get(id).is_some()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert(&self, message: QueuedMessage) -> crate::Result<MessageId> {
        let mut messages = self.messages.write()?;

        if let Some(cap) = self.capacity
            && !messages.contains_key(&message.id)
            && messages.len() >= cap
        {
            return Err(QueueError::Internal(format!(
                "Memory queue capacity exceeded: {}/{cap} messages",
                messages.len()
            )));
        }

        let id = message.id;
        messages.insert(id, message);
        Ok(id)
    }

    async fn fetch_eligible(
        &self,
        domain: Option<&str>,
        cooldown_cutoff: u64,
        limit: Option<usize>,
    ) -> crate::Result<Vec<QueuedMessage>> {
        Ok(self
            .messages
            .read()?
            .values()
            .filter(|m| m.in_domain(domain) && m.is_eligible(cooldown_cutoff))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn record_attempt(&self, id: &MessageId, attempted_at: u64) -> crate::Result<()> {
        self.messages
            .write()?
            .get_mut(id)
            .map(|m| m.last_attempt = attempted_at)
            .ok_or(QueueError::NotFound(*id))
    }

    async fn delete(&self, id: &MessageId) -> crate::Result<()> {
        self.messages
            .write()?
            .remove(id)
            .map(|_| ())
            .ok_or(QueueError::NotFound(*id))
    }

    async fn expire_older_than(
        &self,
        cutoff: u64,
        require_attempted: bool,
    ) -> crate::Result<usize> {
        let mut messages = self.messages.write()?;
        let before = messages.len();
        messages.retain(|_, m| !m.is_expired(cutoff, require_attempted));
        Ok(before - messages.len())
    }

    async fn list(&self) -> crate::Result<Vec<QueuedMessage>> {
        Ok(self.messages.read()?.values().cloned().collect())
    }
}
