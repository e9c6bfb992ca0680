//! Error types for the SMTP client.

use std::io;

use thiserror::Error;

/// Failures below the level of an SMTP reply
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The server sent something that is not an SMTP reply.
    #[error("Failed to parse SMTP response: {0}")]
    ParseError(String),

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("Connection closed unexpectedly")]
    ConnectionClosed,

    #[error("UTF-8 error: {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
}

/// Specialized `Result` type for SMTP client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
