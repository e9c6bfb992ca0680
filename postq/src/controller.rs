use std::{path::PathBuf, sync::{Arc, LazyLock}};

use postq_common::{Signal, SystemClock, internal, tracing};
use postq_delivery::{DeliveryConfig, Scheduler, SmtpTransport, Stopped};
use postq_queue::QueueConfig;
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::lifecycle::ProcessLifecycle;

/// Top-level configuration file
///
/// ```ron
/// (
///     queue: File(path: "/var/spool/postq"),
///     delivery: (
///         endpoint: Some((address: "smtp.example.com")),
///     ),
///     pid_file: Some("/run/postq.pid"),
/// )
/// ```
#[derive(Debug, Default, Deserialize)]
pub struct Postq {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub pid_file: Option<PathBuf>,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Wait for SIGINT or SIGTERM and tell the scheduler to stop
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered, shutting down after the current cycle");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate signal received, shutting down after the current cycle");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Interrupted, e.to_string()))?;

    Ok(())
}

impl Postq {
    /// Parse a RON configuration
    ///
    /// # Errors
    /// If `source` is not a valid configuration
    pub fn from_ron(source: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(source)?)
    }

    /// Claim the pid file, open the queue and build the scheduler
    ///
    /// Everything that can fail because of configuration fails here, before
    /// any mail is touched.
    ///
    /// # Errors
    /// If another instance is running, the queue cannot be opened, or the
    /// delivery configuration is invalid
    pub async fn prepare(self) -> anyhow::Result<Daemon> {
        let lifecycle = self.pid_file.map(ProcessLifecycle::start).transpose()?;

        let store = self.queue.into_store().await?;
        let transport = SmtpTransport::new(self.delivery.timeouts, self.delivery.helo_name.clone());
        let scheduler = Scheduler::new(
            &self.delivery,
            store,
            Arc::new(transport),
            Arc::new(SystemClock),
        )?;

        Ok(Daemon {
            scheduler,
            _lifecycle: lifecycle,
        })
    }
}

/// A configured daemon, ready to run
#[derive(Debug)]
pub struct Daemon {
    scheduler: Scheduler,
    _lifecycle: Option<ProcessLifecycle>,
}

impl Daemon {
    /// Run the delivery loop until it finishes or a signal arrives
    ///
    /// The pid file is released when this returns.
    ///
    /// # Errors
    /// Whatever stopped the scheduler
    pub async fn run(mut self) -> anyhow::Result<Stopped> {
        internal!(level = INFO, "postq running");

        let signals = tokio::spawn(async {
            if let Err(e) = shutdown().await {
                tracing::error!("Unable to listen for shutdown signals: {e}");
            }
        });

        let stopped = self.scheduler.serve(SHUTDOWN_BROADCAST.subscribe()).await;
        signals.abort();

        internal!(level = INFO, "Shutting down...");
        Ok(stopped?)
    }
}
