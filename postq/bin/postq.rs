#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::process::ExitCode;

use clap::Parser;
use postq::{Cli, Postq, mailq};
use postq_common::logging;
use postq_delivery::Stopped;

/// Configuration or usage problem
const EXIT_CONFIG: u8 = 1;
/// The delivery loop stopped on an error
const EXIT_FATAL: u8 = 2;
/// Stopped by SIGINT or SIGTERM
const EXIT_SIGNALLED: u8 = 130;

fn load_config(cli: &Cli) -> anyhow::Result<Postq> {
    let config_path = cli.config_path()?;
    let config_content = std::fs::read_to_string(&config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config from {}: {}",
            config_path.display(),
            e
        )
    })?;

    let mut config = Postq::from_ron(&config_content)
        .map_err(|e| anyhow::anyhow!("Invalid config in {}: {e}", config_path.display()))?;
    cli.apply(&mut config);
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(EXIT_CONFIG)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    if cli.mailq {
        return match mailq::list(config.queue).await {
            Ok(listing) => {
                print!("{listing}");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("{e:#}");
                ExitCode::from(EXIT_CONFIG)
            }
        };
    }

    logging::init(cli.verbose);

    let daemon = match config.prepare().await {
        Ok(daemon) => daemon,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    match daemon.run().await {
        Ok(Stopped::Completed) => ExitCode::SUCCESS,
        Ok(Stopped::Signalled) => ExitCode::from(EXIT_SIGNALLED),
        Err(e) => {
            eprintln!("Unhandled error: {e:#}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}
