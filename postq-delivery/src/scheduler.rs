//! The top-level delivery loop.
//!
//! Each cycle checks the quota, expires old failures, picks the next sending
//! domain, fetches whatever is eligible and hands it to the
//! [`DeliveryEngine`]. Shutdown signals are honoured between cycles and
//! while sleeping, never in the middle of a batch.

use std::{sync::Arc, time::Duration};

use postq_common::{Clock, Signal, internal, tracing};
use postq_queue::MessageStore;
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::{
    cleanup,
    config::DeliveryConfig,
    endpoint::{Endpoint, EndpointRegistry},
    engine::DeliveryEngine,
    error::{DeliveryError, SystemError},
    quota::QuotaTracker,
    rotation::DomainRotator,
    transport::Transport,
};

/// How long a message rests after a failed attempt before it is tried again
pub const RETRY_COOLDOWN_SECS: u64 = 300;

/// What the loop does with an error it did not expect
///
/// Fatal errors (see [`DeliveryError::is_fatal`]) always stop the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum ErrorPolicy {
    /// Stop and return the error; for a standalone daemon
    #[default]
    Propagate,
    /// Log it and carry on with the next cycle; for a loop embedded in a host
    LogAndContinue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub batch_size: Option<usize>,
    pub delay: Duration,
    pub max_age_secs: u64,
    pub once: bool,
    pub on_error: ErrorPolicy,
}

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub quota_exceeded: bool,
    pub expired: usize,
    pub domain: Option<String>,
    pub fetched: usize,
    pub delivered: usize,
}

/// Why [`Scheduler::serve`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stopped {
    /// The single cycle of a run-once configuration finished
    Completed,
    /// A shutdown signal arrived
    Signalled,
}

#[derive(Debug)]
pub struct Scheduler {
    options: RunOptions,
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
    endpoint: Option<Endpoint>,
    domains: EndpointRegistry,
    rotator: DomainRotator,
    quota: QuotaTracker,
    engine: DeliveryEngine,
}

impl Scheduler {
    /// # Errors
    /// If `config` does not validate
    pub fn new(
        config: &DeliveryConfig,
        store: Arc<dyn MessageStore>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, DeliveryError> {
        config.validate()?;

        Ok(Self {
            options: config.run_options(),
            endpoint: config.endpoint.clone(),
            domains: config.domains.clone(),
            rotator: DomainRotator::new(config.domains.domains()),
            quota: QuotaTracker::new(config.quota_settings(), Arc::clone(&clock)),
            engine: DeliveryEngine::new(transport, Arc::clone(&store), Arc::clone(&clock)),
            store,
            clock,
        })
    }

    #[must_use]
    pub const fn options(&self) -> &RunOptions {
        &self.options
    }

    fn endpoint_for(&self, domain: Option<&str>) -> Option<&Endpoint> {
        domain
            .and_then(|d| self.domains.get(d))
            .or(self.endpoint.as_ref())
    }

    /// Largest batch this cycle may fetch, `None` for no limit
    fn batch_limit(&self) -> Option<usize> {
        match (self.options.batch_size, self.quota.remaining()) {
            (Some(batch), Some(remaining)) => Some(batch.min(remaining)),
            (batch, remaining) => batch.or(remaining),
        }
    }

    /// Run a single cycle
    ///
    /// # Errors
    /// Storage and quota-file failures, a missing relay, or repeated
    /// authentication failure
    pub async fn run_cycle(&mut self) -> Result<CycleReport, DeliveryError> {
        let mut report = CycleReport::default();

        if self.quota.exceeded().await? {
            tracing::info!(
                period_end = ?self.quota.period_end(),
                sent = self.quota.state().sent_count,
                "Quota exceeded, skipping cycle"
            );
            report.quota_exceeded = true;
            return Ok(report);
        }

        let now = self.clock.now();
        report.expired =
            cleanup::expire(self.store.as_ref(), self.options.max_age_secs, now).await?;
        report.domain = self.rotator.next_domain();

        let endpoint = self
            .endpoint_for(report.domain.as_deref())
            .cloned()
            .ok_or_else(|| {
                SystemError::Configuration(format!(
                    "no relay for domain {}",
                    report.domain.as_deref().unwrap_or("<default>")
                ))
            })?;

        let batch = self
            .store
            .fetch_eligible(
                report.domain.as_deref(),
                now.saturating_sub(RETRY_COOLDOWN_SECS),
                self.batch_limit(),
            )
            .await?;
        report.fetched = batch.len();

        let mut interrupted = None;
        if batch.is_empty() {
            internal!(level = DEBUG, "Nothing to send");
        } else {
            tracing::info!(
                domain = report.domain.as_deref().unwrap_or("<default>"),
                count = report.fetched,
                "Found messages to send"
            );
            match self.engine.deliver(batch, &endpoint).await {
                Ok(delivered) => report.delivered = delivered,
                Err(e) => {
                    report.delivered = e.delivered;
                    interrupted = Some(e.error);
                }
            }
        }

        // Charge the quota for whatever the relay accepted, even when the batch was cut short
        let recorded = if self.quota.is_enabled() {
            self.quota.record(report.delivered).await
        } else {
            Ok(())
        };

        if let Some(error) = interrupted {
            if let Err(e) = recorded {
                tracing::error!("Unable to record quota after an interrupted batch: {e}");
            }
            return Err(error);
        }
        recorded?;

        Ok(report)
    }

    /// Loop until the single cycle is done, a shutdown signal arrives or a
    /// cycle fails under [`ErrorPolicy::Propagate`]
    ///
    /// # Errors
    /// The first fatal error, or any cycle error when propagating
    pub async fn serve(
        &mut self,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> Result<Stopped, DeliveryError> {
        internal!(
            level = INFO,
            "Delivery loop starting (once: {}, delay: {:?})",
            self.options.once,
            self.options.delay
        );

        loop {
            match shutdown.try_recv() {
                Ok(_) | Err(TryRecvError::Lagged(_)) => return Ok(Self::signalled()),
                Err(TryRecvError::Empty | TryRecvError::Closed) => {}
            }

            match self.run_cycle().await {
                Ok(report) => internal!(level = DEBUG, "Cycle finished: {report:?}"),
                Err(e) => {
                    tracing::error!("Delivery cycle failed: {e}");

                    if e.is_fatal() || self.options.on_error == ErrorPolicy::Propagate {
                        return Err(e);
                    }
                }
            }

            if self.options.once {
                return Ok(Stopped::Completed);
            }

            let pause = tokio::time::sleep(self.options.delay);
            tokio::pin!(pause);

            tokio::select! {
                () = &mut pause => {}
                signal = shutdown.recv() => match signal {
                    Ok(_) | Err(RecvError::Lagged(_)) => return Ok(Self::signalled()),
                    Err(RecvError::Closed) => pause.await,
                },
            }
        }
    }

    fn signalled() -> Stopped {
        internal!(level = INFO, "Delivery loop received shutdown signal");
        Stopped::Signalled
    }
}
