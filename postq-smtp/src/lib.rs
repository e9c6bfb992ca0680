//! Just enough of an SMTP client to hand queued mail to a relay.
//!
//! One [`SmtpClient`] is one connection. Every command returns the parsed
//! [`Response`] and leaves it to the caller to decide what a code means;
//! only I/O, TLS and protocol-level problems surface as [`ClientError`].

mod client;
pub mod data;
mod error;
mod response;

pub use client::SmtpClient;
pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};
