//! The `delivery` section of the configuration file.

use std::{path::PathBuf, time::Duration};

use serde::Deserialize;

use crate::{
    endpoint::{Endpoint, EndpointRegistry},
    error::{DeliveryError, SystemError},
    quota::QuotaSettings,
    scheduler::{ErrorPolicy, RunOptions},
    types::SmtpTimeouts,
};

const fn default_delay() -> u64 {
    60
}

const fn default_max_age() -> u64 {
    604_800 // 7 days
}

const fn default_period() -> u64 {
    86_400 // 1 day
}

fn default_quota_state_path() -> PathBuf {
    PathBuf::from("/var/lib/postq/quota")
}

fn default_helo_name() -> String {
    "localhost".to_string()
}

/// Where to send, how often, and how much
///
/// ```ron
/// delivery: (
///     endpoint: Some((
///         address: "smtp.example.com",
///         port: 587,
///         user_name: Some("mailer"),
///         password: Some("secret"),
///     )),
///     batch_size: Some(100),
///     quota: Some(1000),
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Relay used when no sending domains are configured
    #[serde(default)]
    pub endpoint: Option<Endpoint>,

    /// Per-domain relays; a non-empty registry turns on domain rotation
    #[serde(default)]
    pub domains: EndpointRegistry,

    /// Most messages to attempt per cycle (`None` = no limit)
    #[serde(default)]
    pub batch_size: Option<usize>,

    /// Pause between cycles, in seconds
    ///
    /// Default: 60 seconds
    #[serde(default = "default_delay")]
    pub delay_secs: u64,

    /// Failed messages older than this are dropped; `0` keeps them forever
    ///
    /// Default: 604800 seconds (7 days)
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,

    /// Run a single cycle and exit
    #[serde(default)]
    pub once: bool,

    /// Messages allowed per quota period (`None` = unlimited)
    #[serde(default)]
    pub quota: Option<usize>,

    /// Length of a quota period, in seconds
    ///
    /// Default: 86400 seconds (1 day) when a quota is set
    #[serde(default)]
    pub period_secs: Option<u64>,

    /// Where the quota counter survives restarts
    #[serde(default = "default_quota_state_path")]
    pub quota_state_path: PathBuf,

    #[serde(default)]
    pub on_error: ErrorPolicy,

    #[serde(default)]
    pub timeouts: SmtpTimeouts,

    /// Name announced in EHLO when an endpoint does not set its own
    #[serde(default = "default_helo_name")]
    pub helo_name: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            domains: EndpointRegistry::default(),
            batch_size: None,
            delay_secs: default_delay(),
            max_age_secs: default_max_age(),
            once: false,
            quota: None,
            period_secs: None,
            quota_state_path: default_quota_state_path(),
            on_error: ErrorPolicy::default(),
            timeouts: SmtpTimeouts::default(),
            helo_name: default_helo_name(),
        }
    }
}

impl DeliveryConfig {
    /// Reject configurations the scheduler cannot run with
    ///
    /// # Errors
    /// [`SystemError::Configuration`] describing the first problem found
    pub fn validate(&self) -> Result<(), DeliveryError> {
        let invalid = |reason: String| -> DeliveryError { SystemError::Configuration(reason).into() };

        if self.endpoint.is_none() && self.domains.is_empty() {
            return Err(invalid(
                "no relay configured: set `endpoint` or at least one entry in `domains`".into(),
            ));
        }

        if let Some(endpoint) = &self.endpoint
            && endpoint.address.trim().is_empty()
        {
            return Err(invalid("`endpoint` has an empty address".into()));
        }

        if let Some((domain, _)) = self
            .domains
            .entries()
            .find(|(_, endpoint)| endpoint.address.trim().is_empty())
        {
            return Err(invalid(format!("relay for domain {domain} has an empty address")));
        }

        if self.quota.is_some() && self.period_secs == Some(0) {
            return Err(invalid("`period_secs` must be greater than zero".into()));
        }

        Ok(())
    }

    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            batch_size: self.batch_size,
            delay: Duration::from_secs(self.delay_secs),
            max_age_secs: self.max_age_secs,
            once: self.once,
            on_error: self.on_error,
        }
    }

    /// Quota settings, if a quota is configured
    #[must_use]
    pub fn quota_settings(&self) -> Option<QuotaSettings> {
        self.quota.map(|limit| QuotaSettings {
            limit,
            period_secs: self.period_secs.unwrap_or_else(default_period),
            state_path: self.quota_state_path.clone(),
        })
    }
}
