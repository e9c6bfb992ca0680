//! One delivery pass over a batch of queued messages.

use std::sync::Arc;

use postq_common::{Clock, internal, tracing};
use postq_queue::{MessageStore, QueuedMessage};
use thiserror::Error;

use crate::{
    endpoint::Endpoint,
    error::{DeliveryError, PermanentError},
    transport::{OpenError, SendOutcome, Session, Transport},
};

/// Consecutive authentication failures tolerated before giving up
pub const MAX_AUTH_FAILURES: u32 = 2;

/// A batch cut short by an error
///
/// `delivered` still counts every message the relay accepted before the
/// error, so the quota can be charged for them.
#[derive(Debug, Error)]
#[error("{error} (after {delivered} delivered)")]
pub struct BatchInterrupted {
    pub delivered: usize,
    #[source]
    pub error: DeliveryError,
}

impl BatchInterrupted {
    fn new(delivered: usize, error: impl Into<DeliveryError>) -> Self {
        Self {
            delivered,
            error: error.into(),
        }
    }
}

/// Pushes batches through a [`Transport`] and settles each message in the store
///
/// Delivered and rejected messages are deleted; transient failures get their
/// attempt time recorded so the scheduler's cooldown applies.
#[derive(Debug)]
pub struct DeliveryEngine {
    transport: Arc<dyn Transport>,
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
    failed_auth_count: u32,
}

impl DeliveryEngine {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn MessageStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            store,
            clock,
            failed_auth_count: 0,
        }
    }

    #[must_use]
    pub const fn failed_auth_count(&self) -> u32 {
        self.failed_auth_count
    }

    /// Deliver `messages` in order through `endpoint`, returning how many the relay accepted
    ///
    /// A relay that cannot be reached, or that refuses the credentials once,
    /// leaves the batch untouched for the next cycle.
    ///
    /// # Errors
    /// [`PermanentError::AuthenticationFailed`] once authentication has failed
    /// [`MAX_AUTH_FAILURES`] times in a row; storage errors while deleting
    pub async fn deliver(
        &mut self,
        messages: Vec<QueuedMessage>,
        endpoint: &Endpoint,
    ) -> Result<usize, BatchInterrupted> {
        if messages.is_empty() {
            return Ok(0);
        }

        if endpoint.is_stub() {
            return self.discard(messages).await;
        }

        let mut session = match self.transport.open(endpoint).await {
            Ok(session) => session,
            Err(OpenError::Auth(reply)) => {
                self.failed_auth_count += 1;

                if self.failed_auth_count >= MAX_AUTH_FAILURES {
                    tracing::error!(
                        relay = %endpoint.socket_address(),
                        failures = self.failed_auth_count,
                        "Authentication failed, giving up: {reply}"
                    );
                    return Err(BatchInterrupted::new(
                        0,
                        PermanentError::AuthenticationFailed(reply),
                    ));
                }

                tracing::warn!(
                    relay = %endpoint.socket_address(),
                    failures = self.failed_auth_count,
                    "Authentication failed, will try again next cycle: {reply}"
                );
                return Ok(0);
            }
            Err(OpenError::Connect(e)) => {
                tracing::warn!(
                    relay = %endpoint.socket_address(),
                    "Unable to open a session, will try again next cycle: {e}"
                );
                return Ok(0);
            }
        };

        self.failed_auth_count = 0;

        let delivered = self.run(session.as_mut(), messages).await;

        if let Err(e) = session.close().await {
            internal!(level = DEBUG, "Error closing session: {e}");
        }

        delivered
    }

    /// Stub relay: count everything as delivered without sending
    async fn discard(&self, messages: Vec<QueuedMessage>) -> Result<usize, BatchInterrupted> {
        let mut delivered = 0;

        for message in messages {
            self.store
                .delete(&message.id)
                .await
                .map_err(|e| BatchInterrupted::new(delivered, e))?;
            delivered += 1;
            internal!(
                level = INFO,
                message_id = %message.id,
                "Discarded message for stub relay"
            );
        }

        Ok(delivered)
    }

    async fn run(
        &self,
        session: &mut dyn Session,
        messages: Vec<QueuedMessage>,
    ) -> Result<usize, BatchInterrupted> {
        let mut delivered = 0;

        for message in messages {
            match session.send(&message.from, &message.to, &message.data).await {
                SendOutcome::Delivered => {
                    // Accepted by the relay, so it counts even if the delete fails
                    delivered += 1;
                    self.store
                        .delete(&message.id)
                        .await
                        .map_err(|e| BatchInterrupted::new(delivered, e))?;
                    tracing::info!(
                        message_id = %message.id,
                        from = %message.from,
                        to = ?message.to,
                        "Sent message"
                    );
                    continue;
                }
                SendOutcome::Rejected(e) => {
                    tracing::warn!(message_id = %message.id, "Removing rejected message: {e}");
                    self.store
                        .delete(&message.id)
                        .await
                        .map_err(|e| BatchInterrupted::new(delivered, e))?;
                }
                SendOutcome::Overloaded(e) => {
                    tracing::warn!(
                        message_id = %message.id,
                        "Relay too busy, leaving the rest of the batch for later: {e}"
                    );
                    break;
                }
                SendOutcome::Transient(e) => {
                    tracing::warn!(message_id = %message.id, "Send failed, will retry: {e}");
                    if let Err(e) = self
                        .store
                        .record_attempt(&message.id, self.clock.now())
                        .await
                    {
                        tracing::warn!(
                            message_id = %message.id,
                            "Unable to record failed attempt: {e}"
                        );
                    }
                }
            }

            if let Err(e) = session.reset().await {
                tracing::warn!("Session unusable after failure, ending batch: {e}");
                break;
            }
        }

        Ok(delivered)
    }
}
