use std::time::Duration;

use serde::{Deserialize, Serialize};

const fn default_connect_secs() -> u64 {
    30
}

const fn default_command_secs() -> u64 {
    30
}

const fn default_data_secs() -> u64 {
    120
}

const fn default_quit_secs() -> u64 {
    10
}

/// Per-phase limits on how long to wait for the relay
///
/// ```ron
/// timeouts: (
///     connect_secs: 10,
///     data_secs: 300,
/// )
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpTimeouts {
    /// TCP connect plus the greeting
    ///
    /// Default: 30 seconds
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,

    /// EHLO, STARTTLS, AUTH, MAIL, RCPT, DATA and RSET
    ///
    /// Default: 30 seconds
    #[serde(default = "default_command_secs")]
    pub command_secs: u64,

    /// Sending the message body and waiting for the final reply
    ///
    /// Default: 120 seconds
    #[serde(default = "default_data_secs")]
    pub data_secs: u64,

    /// Default: 10 seconds
    #[serde(default = "default_quit_secs")]
    pub quit_secs: u64,
}

impl Default for SmtpTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            command_secs: default_command_secs(),
            data_secs: default_data_secs(),
            quit_secs: default_quit_secs(),
        }
    }
}

impl SmtpTimeouts {
    #[must_use]
    pub const fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub const fn command(&self) -> Duration {
        Duration::from_secs(self.command_secs)
    }

    #[must_use]
    pub const fn data(&self) -> Duration {
        Duration::from_secs(self.data_secs)
    }

    #[must_use]
    pub const fn quit(&self) -> Duration {
        Duration::from_secs(self.quit_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let timeouts: SmtpTimeouts = ron::from_str("(data_secs: 300)").unwrap();
        assert_eq!(
            timeouts,
            SmtpTimeouts {
                data_secs: 300,
                ..SmtpTimeouts::default()
            }
        );
        assert_eq!(timeouts.connect(), Duration::from_secs(30));
        assert_eq!(timeouts.quit(), Duration::from_secs(10));
    }
}
