use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::MessageId;

/// A message waiting in the outbound queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub id: MessageId,
    /// Envelope sender
    pub from: String,
    /// Envelope recipients
    pub to: Vec<String>,
    /// The raw RFC 5322 message, stored apart from the metadata
    #[serde(skip)]
    pub data: Arc<[u8]>,
    /// Seconds since the epoch when the message was queued, if the store knows it
    pub created_at: Option<u64>,
    /// Seconds since the epoch of the last failed send attempt, `0` if never attempted
    pub last_attempt: u64,
    /// Sending domain this message belongs to when several are configured
    pub domain: Option<String>,
}

impl QueuedMessage {
    /// Create a never-attempted message with a fresh ID
    pub fn new(
        from: impl Into<String>,
        to: Vec<String>,
        data: impl Into<Arc<[u8]>>,
        created_at: u64,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            from: from.into(),
            to,
            data: data.into(),
            created_at: Some(created_at),
            last_attempt: 0,
            domain: None,
        }
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Size of the raw message in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether a send has been attempted (and failed) before
    #[must_use]
    pub const fn attempted(&self) -> bool {
        self.last_attempt > 0
    }

    /// Whether this message may be handed to a delivery run
    ///
    /// Never-attempted messages are always eligible. Otherwise the last attempt
    /// must be at or before `cooldown_cutoff`.
    #[must_use]
    pub const fn is_eligible(&self, cooldown_cutoff: u64) -> bool {
        !self.attempted() || self.last_attempt <= cooldown_cutoff
    }

    /// Whether age-based expiry applies to this message
    ///
    /// Messages with an unknown creation time are never expired.
    #[must_use]
    pub fn is_expired(&self, cutoff: u64, require_attempted: bool) -> bool {
        if require_attempted && !self.attempted() {
            return false;
        }
        self.created_at.is_some_and(|created| created < cutoff)
    }

    /// Whether this message matches a domain filter (`None` matches everything)
    #[must_use]
    pub fn in_domain(&self, domain: Option<&str>) -> bool {
        domain.is_none_or(|d| self.domain.as_deref() == Some(d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(created_at: u64, last_attempt: u64) -> QueuedMessage {
        QueuedMessage {
            last_attempt,
            ..QueuedMessage::new("a@example.com", vec!["b@example.net".into()], *b"hi", created_at)
        }
    }

    #[test]
    fn never_attempted_is_always_eligible() {
        assert!(message(0, 0).is_eligible(0));
        assert!(message(10, 0).is_eligible(1));
    }

    #[test]
    fn cooldown_boundary_is_inclusive() {
        let msg = message(0, 700);
        assert!(!msg.is_eligible(699));
        assert!(msg.is_eligible(700));
    }

    #[test]
    fn expiry_requires_an_attempt() {
        assert!(!message(1, 0).is_expired(1_000, true));
        assert!(message(1, 5).is_expired(1_000, true));
        assert!(message(1, 0).is_expired(1_000, false));
        assert!(!message(1_000, 5).is_expired(1_000, true));
    }

    #[test]
    fn unknown_creation_time_never_expires() {
        let msg = QueuedMessage {
            created_at: None,
            ..message(0, 5)
        };
        assert!(!msg.is_expired(u64::MAX, true));
    }

    #[test]
    fn domain_filter() {
        let tagged = message(0, 0).with_domain("vf");
        assert!(tagged.in_domain(None));
        assert!(tagged.in_domain(Some("vf")));
        assert!(!tagged.in_domain(Some("eg")));
        assert!(!message(0, 0).in_domain(Some("vf")));
    }
}
