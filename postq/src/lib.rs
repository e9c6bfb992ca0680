//! postq: deliver a persisted mail queue to SMTP relays
//!
//! The binary is a thin wrapper over [`Postq`], which loads the queue and
//! delivery configuration, claims the pid file and runs the scheduler until
//! it finishes or is told to stop.

pub mod cli;
pub mod controller;
pub mod lifecycle;
pub mod mailq;

pub use cli::Cli;
pub use controller::{Daemon, Postq};
