//! A [`Transport`] that follows a script instead of touching the network,
//! and a [`MessageStore`] wrapper that can be told to fail.
//!
//! Used by this crate's tests and by anything embedding the scheduler that
//! wants to check what would be sent.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use postq_queue::{MessageId, MessageStore, QueueError, QueuedMessage};

use crate::{
    endpoint::Endpoint,
    error::{PermanentError, TemporaryError},
    transport::{OpenError, SendOutcome, Session, Transport},
};

/// Scripted result of one [`Session::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scripted {
    Delivered,
    Rejected,
    Overloaded,
    Transient,
}

impl Scripted {
    fn outcome(self) -> SendOutcome {
        match self {
            Self::Delivered => SendOutcome::Delivered,
            Self::Rejected => {
                SendOutcome::Rejected(PermanentError::MessageRejected("550 scripted".into()))
            }
            Self::Overloaded => {
                SendOutcome::Overloaded(TemporaryError::ServerBusy("421 scripted".into()))
            }
            Self::Transient => {
                SendOutcome::Transient(TemporaryError::SmtpTemporary("501 scripted".into()))
            }
        }
    }
}

/// Scripted result of one [`Transport::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedOpen {
    Connected,
    AuthRejected,
    Unreachable,
}

/// Everything the transport was asked to do, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Open(String),
    Send { from: String, to: Vec<String> },
    Reset,
    Close,
}

#[derive(Debug, Default)]
struct Script {
    opens: VecDeque<ScriptedOpen>,
    sends: VecDeque<Scripted>,
    failing_reset: bool,
    failing_close: bool,
    calls: Vec<Call>,
}

/// Clones share the same script and call log.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the results of upcoming opens; `Connected` once the queue is empty
    #[must_use]
    pub fn opens(self, opens: impl IntoIterator<Item = ScriptedOpen>) -> Self {
        self.script().opens.extend(opens);
        self
    }

    /// Queue the results of upcoming sends; `Delivered` once the queue is empty
    #[must_use]
    pub fn sends(self, sends: impl IntoIterator<Item = Scripted>) -> Self {
        self.script().sends.extend(sends);
        self
    }

    #[must_use]
    pub fn failing_reset(self) -> Self {
        self.script().failing_reset = true;
        self
    }

    #[must_use]
    pub fn failing_close(self) -> Self {
        self.script().failing_close = true;
        self
    }

    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.script().calls.clone()
    }

    /// Number of sends attempted so far
    #[must_use]
    pub fn sent(&self) -> usize {
        self.script()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::Send { .. }))
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Session>, OpenError> {
        let mut script = self.script();
        script.calls.push(Call::Open(endpoint.address.clone()));

        match script.opens.pop_front().unwrap_or(ScriptedOpen::Connected) {
            ScriptedOpen::Connected => Ok(Box::new(ScriptedSession {
                script: Arc::clone(&self.script),
            })),
            ScriptedOpen::AuthRejected => Err(OpenError::Auth("535 scripted".into())),
            ScriptedOpen::Unreachable => {
                Err(TemporaryError::ConnectionFailed("scripted".into()).into())
            }
        }
    }
}

struct ScriptedSession {
    script: Arc<Mutex<Script>>,
}

impl ScriptedSession {
    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn send(&mut self, from: &str, to: &[String], _body: &[u8]) -> SendOutcome {
        let mut script = self.script();
        script.calls.push(Call::Send {
            from: from.to_string(),
            to: to.to_vec(),
        });
        script
            .sends
            .pop_front()
            .unwrap_or(Scripted::Delivered)
            .outcome()
    }

    async fn reset(&mut self) -> Result<(), TemporaryError> {
        let mut script = self.script();
        script.calls.push(Call::Reset);
        if script.failing_reset {
            Err(TemporaryError::ConnectionFailed("scripted reset".into()))
        } else {
            Ok(())
        }
    }

    async fn close(&mut self) -> Result<(), TemporaryError> {
        let mut script = self.script();
        script.calls.push(Call::Close);
        if script.failing_close {
            Err(TemporaryError::ConnectionFailed("scripted close".into()))
        } else {
            Ok(())
        }
    }
}

/// Passes everything through to `inner`, except that the `nth` delete (1-based) fails
#[derive(Debug)]
pub struct FlakyStore<S> {
    inner: S,
    failing_delete: usize,
    deletes: AtomicUsize,
}

impl<S: MessageStore> FlakyStore<S> {
    pub const fn failing_delete(inner: S, nth: usize) -> Self {
        Self {
            inner,
            failing_delete: nth,
            deletes: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl<S: MessageStore> MessageStore for FlakyStore<S> {
    async fn insert(&self, message: QueuedMessage) -> postq_queue::Result<MessageId> {
        self.inner.insert(message).await
    }

    async fn fetch_eligible(
        &self,
        domain: Option<&str>,
        cooldown_cutoff: u64,
        limit: Option<usize>,
    ) -> postq_queue::Result<Vec<QueuedMessage>> {
        self.inner.fetch_eligible(domain, cooldown_cutoff, limit).await
    }

    async fn record_attempt(&self, id: &MessageId, attempted_at: u64) -> postq_queue::Result<()> {
        self.inner.record_attempt(id, attempted_at).await
    }

    async fn delete(&self, id: &MessageId) -> postq_queue::Result<()> {
        if self.deletes.fetch_add(1, Ordering::SeqCst) + 1 == self.failing_delete {
            return Err(QueueError::Internal("scripted delete failure".into()));
        }
        self.inner.delete(id).await
    }

    async fn expire_older_than(
        &self,
        cutoff: u64,
        require_attempted: bool,
    ) -> postq_queue::Result<usize> {
        self.inner.expire_older_than(cutoff, require_attempted).await
    }

    async fn list(&self) -> postq_queue::Result<Vec<QueuedMessage>> {
        self.inner.list().await
    }
}
