//! Command Line Interface
//!
//! Argument parsing and logging setup for the `atv-remote` binary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// Android TV remote
#[derive(Parser, Debug)]
#[command(name = "atv-remote")]
#[command(about = "Pair with and control Android TV devices", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Talk to an in-memory simulated TV instead of the network bridge
    #[arg(long)]
    pub simulate: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Enable JSON structured logging
    #[arg(long)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Pair a new device and store it as a config entry
    Pair {
        /// Device address; prompted for when omitted
        #[arg(short, long)]
        address: Option<String>,
    },

    /// List stored config entries
    List,

    /// Remove a stored config entry
    Remove {
        /// Entry id or a unique prefix of it
        entry_id: String,
    },

    /// Send remote commands to a paired device
    Send {
        /// Entry id or a unique prefix of it
        entry_id: String,

        /// Hold the first command for this many seconds
        #[arg(long, value_name = "SECS")]
        hold: Option<f64>,

        /// Key names, sent in order
        #[arg(required = true)]
        commands: Vec<String>,
    },

    /// Keep every paired device connected and log activity changes
    Run,
}

/// Initialize tracing based on CLI options
///
/// `RUST_LOG` takes precedence over `--log-level`. Logs go to stderr so
/// command output stays on stdout.
pub fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli.log_level.parse::<Level>().with_context(|| {
        format!(
            "Invalid log level '{}'. Valid levels: error, warn, info, debug, trace",
            cli.log_level
        )
    })?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level.as_str()))
        .context("Failed to create log filter")?;

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    if cli.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    debug!("Logging initialized: level={}, json={}", log_level, cli.json_logs);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send() {
        let cli = Cli::try_parse_from([
            "atv-remote", "--simulate", "send", "1a2b", "--hold", "2", "POWER", "HOME",
        ])
        .unwrap();

        assert!(cli.simulate);
        match cli.command {
            Command::Send {
                entry_id,
                hold,
                commands,
            } => {
                assert_eq!(entry_id, "1a2b");
                assert_eq!(hold, Some(2.0));
                assert_eq!(commands, vec!["POWER", "HOME"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_send_requires_commands() {
        assert!(Cli::try_parse_from(["atv-remote", "send", "1a2b"]).is_err());
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["atv-remote", "pair"]).unwrap();
        assert_eq!(cli.log_level, "info");
        assert!(cli.config.is_none());
        assert!(matches!(cli.command, Command::Pair { address: None }));
    }
}
