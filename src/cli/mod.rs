//! Command-line interface module
//!
//! This module handles argument parsing, logging setup and output formatting.
//! It contains no business logic - that belongs in the [`crate::core`] module.

pub mod commands;
pub mod logging;
pub mod output;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use crate::core::cancel::{listen_for_signals, CancellationToken};
use crate::core::global_config::GlobalConfig;
use crate::infra::dirs::AppDirs;
use crate::infra::run_log::RunLog;
use commands::Commands;

/// Build and flash iCESugar-nano FPGA designs
///
/// Runs yosys, nextpnr-ice40 and icepack, then programs the board with
/// icesprog or, failing that, through the iCELink drive.
#[derive(Parser, Debug)]
#[command(name = "icesugar-flash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbose output: stream tool output and log debug messages (-vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of the one in the config directory
    #[arg(long, global = true, env = "ICESUGAR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Everything a command needs for one invocation
#[derive(Debug)]
pub struct Session {
    /// Loaded configuration
    pub config: GlobalConfig,
    /// Cancellation token shared with the signal listener
    pub token: Arc<CancellationToken>,
    /// `-v` count
    pub verbose: u8,
}

impl Cli {
    /// Execute the CLI command
    pub async fn run(self) -> Result<()> {
        let dirs = AppDirs::new();
        let config = match &self.config {
            Some(path) => GlobalConfig::load_from_path(path),
            None => GlobalConfig::load(&dirs),
        }
        .context("Failed to load configuration")?;

        let run_log = RunLog::new(config.log_path(&dirs), config.log_max_lines());
        let rotated_at_start = run_log.rotate();
        logging::init(self.verbose, Some(&run_log))?;
        if let Err(e) = rotated_at_start {
            tracing::warn!("Could not rotate {}: {e}", run_log.path().display());
        }

        let token = Arc::new(CancellationToken::new());
        listen_for_signals(Arc::clone(&token));

        let session = Session {
            config,
            token,
            verbose: self.verbose,
        };
        let result = self.command.run(&session).await;

        if let Err(e) = run_log.rotate() {
            tracing::warn!("Could not rotate {}: {e}", run_log.path().display());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_flash_with_options() {
        let cli = Cli::try_parse_from([
            "icesugar-flash",
            "-v",
            "flash",
            "top.v,uart.v",
            "--clock",
            "2",
            "--force-mass-storage",
            "--no-clean",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 1);
        let Commands::Flash(args) = cli.command else {
            panic!("expected flash");
        };
        assert_eq!(args.clock, Some(2));
        assert!(args.force_mass_storage);
        assert!(args.no_clean);
        assert_eq!(args.design.sources, vec!["top.v,uart.v"]);
    }

    #[test]
    fn test_clock_out_of_range_rejected() {
        let result = Cli::try_parse_from(["icesugar-flash", "flash", "top.v", "--clock", "7"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_flash_requires_sources() {
        assert!(Cli::try_parse_from(["icesugar-flash", "flash"]).is_err());
    }
}
