//! Outbound delivery for postq
//!
//! This crate provides:
//! - A quota that survives restarts ([`QuotaTracker`])
//! - Rotation through per-domain relays ([`DomainRotator`])
//! - The per-message delivery state machine ([`DeliveryEngine`])
//! - The polling loop tying it all together ([`Scheduler`])
//!
//! The wire is reached only through the [`Transport`] trait. [`SmtpTransport`]
//! is the real one; [`testing::ScriptedTransport`] follows a script.

pub mod cleanup;
mod config;
mod endpoint;
mod engine;
mod error;
mod quota;
mod rotation;
mod scheduler;
mod smtp_transport;
pub mod testing;
mod transport;
mod types;

pub use config::DeliveryConfig;
pub use endpoint::{AuthMechanism, Endpoint, EndpointRegistry, STUB_ADDRESS};
pub use engine::{BatchInterrupted, DeliveryEngine, MAX_AUTH_FAILURES};
pub use error::{DeliveryError, PermanentError, SystemError, TemporaryError};
pub use quota::{QuotaSettings, QuotaState, QuotaTracker};
pub use rotation::DomainRotator;
pub use scheduler::{CycleReport, ErrorPolicy, RETRY_COOLDOWN_SECS, RunOptions, Scheduler, Stopped};
pub use smtp_transport::{SmtpSession, SmtpTransport, classify_refusal};
pub use transport::{OpenError, SendOutcome, Session, Transport};
pub use types::SmtpTimeouts;
