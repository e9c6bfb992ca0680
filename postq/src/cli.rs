//! Command-line flags; anything given here beats the configuration file.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use clap::Parser;

use crate::controller::Postq;

const CONFIG_ENV: &str = "POSTQ_CONFIG";

/// Scans the mail queue for new messages and sends them to the configured SMTP relay
#[derive(Parser, Debug, Default)]
#[command(name = "postq")]
#[command(version)]
pub struct Cli {
    /// Configuration file (default: $POSTQ_CONFIG, ./postq.config.ron, /etc/postq/postq.config.ron)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum number of messages to send per cycle
    #[arg(short, long)]
    pub batch_size: Option<usize>,

    /// Seconds to wait between checks for new mail
    #[arg(long)]
    pub delay: Option<u64>,

    /// Messages allowed per quota period
    #[arg(short, long)]
    pub quota: Option<usize>,

    /// Quota period in seconds
    #[arg(short = 'r', long)]
    pub period: Option<u64>,

    /// Seconds after which a failing message is dropped (0 keeps it forever)
    #[arg(long)]
    pub max_age: Option<u64>,

    /// Check for mail and deliver once, then exit
    #[arg(short, long)]
    pub once: bool,

    /// Pid file guarding against a second instance
    #[arg(short, long)]
    pub pidfile: Option<PathBuf>,

    /// Log at DEBUG or more
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the messages waiting to be sent, then exit
    #[arg(long)]
    pub mailq: bool,
}

impl Cli {
    /// Overlay the flags that were given onto `config`
    pub fn apply(&self, config: &mut Postq) {
        let delivery = &mut config.delivery;

        if let Some(batch_size) = self.batch_size {
            delivery.batch_size = Some(batch_size);
        }
        if let Some(delay) = self.delay {
            delivery.delay_secs = delay;
        }
        if let Some(quota) = self.quota {
            delivery.quota = Some(quota);
        }
        if let Some(period) = self.period {
            delivery.period_secs = Some(period);
        }
        if let Some(max_age) = self.max_age {
            delivery.max_age_secs = max_age;
        }
        if self.once {
            delivery.once = true;
        }
        if let Some(pidfile) = &self.pidfile {
            config.pid_file = Some(pidfile.clone());
        }
    }

    /// The configuration file to load
    ///
    /// # Errors
    /// If an explicitly named file does not exist, or none of the defaults do
    pub fn config_path(&self) -> anyhow::Result<PathBuf> {
        find_config_file(
            self.config.as_deref(),
            std::env::var_os(CONFIG_ENV),
            &[
                PathBuf::from("./postq.config.ron"),
                PathBuf::from("/etc/postq/postq.config.ron"),
            ],
        )
    }
}

/// Pick the configuration file using the following precedence:
/// 1. `--config`
/// 2. `POSTQ_CONFIG` environment variable
/// 3. The first of `defaults` that exists
fn find_config_file(
    explicit: Option<&Path>,
    env: Option<OsString>,
    defaults: &[PathBuf],
) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        anyhow::bail!("Configuration file {} does not exist", path.display());
    }

    if let Some(env_path) = env {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = defaults.iter().find(|p| p.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_parses_short_and_long_flags() {
        let cli = Cli::try_parse_from([
            "postq", "-b", "10", "--delay", "30", "-q", "100", "-r", "3600", "--max-age", "0",
            "-o", "-p", "/run/postq.pid", "-v",
        ])
        .unwrap();

        assert_eq!(cli.batch_size, Some(10));
        assert_eq!(cli.delay, Some(30));
        assert_eq!(cli.quota, Some(100));
        assert_eq!(cli.period, Some(3600));
        assert_eq!(cli.max_age, Some(0));
        assert!(cli.once);
        assert_eq!(cli.pidfile, Some(PathBuf::from("/run/postq.pid")));
        assert!(cli.verbose);
        assert!(!cli.mailq);
    }

    #[test]
    fn test_rejects_bad_numbers() {
        assert!(Cli::try_parse_from(["postq", "--batch-size", "lots"]).is_err());
    }

    #[test]
    fn test_flags_override_config() {
        let mut config = Postq::default();
        config.delivery.delay_secs = 5;
        config.delivery.batch_size = Some(1);

        let cli = Cli {
            batch_size: Some(20),
            quota: Some(7),
            once: true,
            pidfile: Some(PathBuf::from("/tmp/postq.pid")),
            ..Cli::default()
        };
        cli.apply(&mut config);

        assert_eq!(config.delivery.batch_size, Some(20));
        assert_eq!(config.delivery.delay_secs, 5);
        assert_eq!(config.delivery.quota, Some(7));
        assert!(config.delivery.once);
        assert_eq!(config.pid_file, Some(PathBuf::from("/tmp/postq.pid")));
    }

    #[test]
    fn test_config_file_precedence() {
        let dir = TempDir::new().unwrap();
        let explicit = dir.path().join("explicit.ron");
        let from_env = dir.path().join("env.ron");
        let fallback = dir.path().join("fallback.ron");
        for path in [&explicit, &from_env, &fallback] {
            std::fs::write(path, "()").unwrap();
        }
        let defaults = [dir.path().join("missing.ron"), fallback.clone()];

        assert_eq!(
            find_config_file(Some(&explicit), Some(from_env.clone().into()), &defaults).unwrap(),
            explicit
        );
        assert_eq!(
            find_config_file(None, Some(from_env.clone().into()), &defaults).unwrap(),
            from_env
        );
        assert_eq!(find_config_file(None, None, &defaults).unwrap(), fallback);
    }

    #[test]
    fn test_missing_config_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.ron");

        assert!(find_config_file(Some(&missing), None, &[]).is_err());
        assert!(find_config_file(None, Some(missing.clone().into()), &[]).is_err());

        let err = find_config_file(None, None, std::slice::from_ref(&missing)).unwrap_err();
        assert!(err.to_string().contains("missing.ron"));
    }
}
