//! Typed errors for the delivery loop.
//!
//! Three families, each telling the caller what to do next:
//! - Permanent: do not retry (the message or the whole daemon is done)
//! - Temporary: try again on a later cycle
//! - System: local trouble (queue, quota file, configuration)

use postq_queue::QueueError;
use postq_smtp::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Permanent failure: {0}")]
    Permanent(#[from] PermanentError),

    #[error("Temporary failure: {0}")]
    Temporary(#[from] TemporaryError),

    #[error("System error: {0}")]
    System(#[from] SystemError),
}

#[derive(Debug, Error)]
pub enum PermanentError {
    /// The relay refused the message outright (5xx other than 50x/53x).
    #[error("Message rejected: {0}")]
    MessageRejected(String),

    /// The relay refused our credentials too many times in a row.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
}

#[derive(Debug, Error)]
pub enum TemporaryError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The relay answered 4xx: stop this batch, keep the messages.
    #[error("Server busy: {0}")]
    ServerBusy(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Temporary SMTP error: {0}")]
    SmtpTemporary(String),

    #[error("TLS handshake failed: {0}")]
    TlsHandshakeFailed(String),
}

#[derive(Debug, Error)]
pub enum SystemError {
    #[error("Queue error: {0}")]
    Storage(#[from] QueueError),

    #[error("Quota state {path}: {source}")]
    QuotaState {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DeliveryError {
    #[must_use]
    pub const fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary(_))
    }

    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent(_))
    }

    #[must_use]
    pub const fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }

    /// Whether the daemon must stop, whatever the error policy says
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Permanent(PermanentError::AuthenticationFailed(_))
                | Self::System(SystemError::Configuration(_))
        )
    }
}

impl From<QueueError> for DeliveryError {
    fn from(error: QueueError) -> Self {
        Self::System(SystemError::Storage(error))
    }
}

/// Anything the client itself reports is a broken or unusable connection,
/// never a verdict on the message.
impl From<ClientError> for TemporaryError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Io(e) => Self::ConnectionFailed(format!("I/O error: {e}")),
            ClientError::ConnectionClosed => {
                Self::ConnectionFailed("Connection closed unexpectedly".to_string())
            }
            ClientError::TlsError(msg) => Self::TlsHandshakeFailed(msg),
            ClientError::ParseError(msg) => {
                Self::SmtpTemporary(format!("SMTP protocol parse error: {msg}"))
            }
            ClientError::Utf8Error(e) => {
                Self::SmtpTemporary(format!("Reply was not valid UTF-8: {e}"))
            }
        }
    }
}
