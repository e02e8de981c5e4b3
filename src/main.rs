//! icesugar-flash CLI
//!
//! Entry point for the icesugar-flash command-line application.

use clap::Parser;
use std::process::ExitCode;

use icesugar_flash::cli::output::display_error;
use icesugar_flash::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            display_error(&e);
            ExitCode::FAILURE
        }
    }
}
