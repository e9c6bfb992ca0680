//! SMTP relay endpoints
//!
//! A single default endpoint, a registry of per-domain endpoints, or both.
//! The registry keeps the order the domains were written in, which is the
//! order they are rotated through.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Address that turns delivery into a no-op which just drains the queue
pub const STUB_ADDRESS: &str = "stub";

const fn default_port() -> u16 {
    25
}

const fn default_tls() -> bool {
    true
}

/// SASL mechanism used when credentials are configured
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMechanism {
    #[default]
    Plain,
    Login,
}

/// One relay to hand mail to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Host name or IP of the relay, or `"stub"`
    pub address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Name to greet the relay with, falling back to the delivery `helo_name`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default)]
    pub authentication: AuthMechanism,

    /// Use STARTTLS when the relay offers it
    ///
    /// Default: `true`
    #[serde(default = "default_tls")]
    pub tls: bool,

    /// Skip certificate verification after STARTTLS (testing only)
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Endpoint {
    #[must_use]
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            domain: None,
            user_name: None,
            password: None,
            authentication: AuthMechanism::default(),
            tls: default_tls(),
            accept_invalid_certs: false,
        }
    }

    /// An endpoint that swallows every message without touching the network
    #[must_use]
    pub fn stub() -> Self {
        Self::new(STUB_ADDRESS, default_port())
    }

    #[must_use]
    pub fn is_stub(&self) -> bool {
        self.address == STUB_ADDRESS
    }

    /// `host:port` for connecting
    #[must_use]
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// User name and password, if both are set
    #[must_use]
    pub fn credentials(&self) -> Option<(&str, &str)> {
        self.user_name.as_deref().zip(self.password.as_deref())
    }
}

/// Endpoints keyed by sending domain, in configuration order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointRegistry {
    domains: IndexMap<String, Endpoint>,
}

impl EndpointRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, domain: &str) -> Option<&Endpoint> {
        self.domains.get(domain)
    }

    pub fn insert(&mut self, domain: impl Into<String>, endpoint: Endpoint) {
        self.domains.insert(domain.into(), endpoint);
    }

    /// Domain keys in rotation order
    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.domains.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &Endpoint)> {
        self.domains.iter().map(|(domain, endpoint)| (domain.as_str(), endpoint))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}
