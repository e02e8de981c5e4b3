//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod build;
pub mod doctor;
pub mod flash;
pub mod status;

use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::PathBuf;

use super::Session;
use crate::core::request::{split_sources, BuildRequest};
use crate::error::FlashError;

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a design and program it onto the board
    Flash(FlashArgs),

    /// Build a design without programming it
    Build(DesignArgs),

    /// Check whether the board is connected
    Status,

    /// Check toolchain, host utilities and board
    Doctor,
}

/// Design inputs shared by `flash` and `build`
#[derive(Args, Debug, Clone)]
pub struct DesignArgs {
    /// Verilog sources; the first names the design (comma-separated lists work too)
    #[arg(required = true, num_args = 1..)]
    pub sources: Vec<String>,

    /// Pin constraint file [default: first source with .pcf extension]
    #[arg(short, long)]
    pub pcf: Option<PathBuf>,

    /// Output directory [default: out/ next to the first source]
    #[arg(short, long)]
    pub out_dir: Option<PathBuf>,

    /// Design name for the artifacts [default: first source's file stem]
    #[arg(short, long)]
    pub name: Option<String>,
}

impl DesignArgs {
    /// Turn the arguments into a build request
    pub fn to_request(&self, verbose: bool) -> Result<BuildRequest, FlashError> {
        let mut request = BuildRequest::new(split_sources(&self.sources))?.with_verbose(verbose);
        if let Some(pcf) = &self.pcf {
            request = request.with_pin_constraints(pcf);
        }
        if let Some(dir) = &self.out_dir {
            request = request.with_output_dir(dir);
        }
        if let Some(name) = &self.name {
            request = request.with_base_name(name);
        }
        Ok(request)
    }
}

/// Arguments of `flash`
#[derive(Args, Debug, Clone)]
pub struct FlashArgs {
    #[command(flatten)]
    pub design: DesignArgs,

    /// iCELink clock: 1=8MHz, 2=12MHz, 3=36MHz, 4=72MHz
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=4))]
    pub clock: Option<u8>,

    /// Skip icesprog and copy the bitstream to the iCELink drive
    #[arg(long)]
    pub force_mass_storage: bool,

    /// Keep the build artifacts after programming
    #[arg(long)]
    pub no_clean: bool,
}

impl Commands {
    /// Execute the command
    pub async fn run(self, session: &Session) -> Result<()> {
        match self {
            Self::Flash(args) => flash::execute(session, &args).await,
            Self::Build(args) => build::execute(session, &args).await,
            Self::Status => status::execute(session).await,
            Self::Doctor => doctor::execute(session).await,
        }
    }
}
