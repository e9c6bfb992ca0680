//! The seam between the delivery loop and the wire.
//!
//! The engine only needs to open a session, push messages through it one at
//! a time, reset it after a failure and close it. Every per-message result
//! is one of four [`SendOutcome`]s, so the retry policy can be exercised
//! without a network.

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    endpoint::Endpoint,
    error::{PermanentError, TemporaryError},
};

/// What happened to one message handed to [`Session::send`]
#[derive(Debug)]
pub enum SendOutcome {
    /// Accepted by the relay
    Delivered,
    /// Refused for good; the message should not be tried again
    Rejected(PermanentError),
    /// The relay is too busy to take anything more in this session
    Overloaded(TemporaryError),
    /// Failed this time; worth trying again after the cooldown
    Transient(TemporaryError),
}

/// Why a session could not be opened
#[derive(Debug, Error)]
pub enum OpenError {
    #[error("Authentication rejected: {0}")]
    Auth(String),

    #[error(transparent)]
    Connect(#[from] TemporaryError),
}

/// Opens sessions to a relay
#[async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Connect, greet, negotiate TLS and authenticate
    ///
    /// # Errors
    /// [`OpenError::Auth`] if the relay refused the credentials,
    /// [`OpenError::Connect`] for anything else
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn Session>, OpenError>;
}

/// One open connection to a relay
#[async_trait]
pub trait Session: Send {
    async fn send(&mut self, from: &str, to: &[String], body: &[u8]) -> SendOutcome;

    /// Abandon whatever transaction is in progress
    ///
    /// # Errors
    /// If the session is no longer usable
    async fn reset(&mut self) -> Result<(), TemporaryError>;

    /// Say goodbye; the session must not be used afterwards
    ///
    /// # Errors
    /// If the connection was already broken
    async fn close(&mut self) -> Result<(), TemporaryError>;
}
