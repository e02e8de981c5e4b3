//! CLI command for `icesugar-flash flash`

use anyhow::Result;

use super::FlashArgs;
use crate::cli::output::{print_detail, print_success};
use crate::cli::Session;
use crate::core::driver::{Driver, RunOptions};
use crate::core::flash::ClockSpeed;

/// Execute the flash command
pub async fn execute(session: &Session, args: &FlashArgs) -> Result<()> {
    let request = args.design.to_request(session.verbose > 0)?;
    let clock = args
        .clock
        .map(ClockSpeed::try_from)
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let options = RunOptions {
        force_mass_storage: args.force_mass_storage,
        clock,
        clean: !args.no_clean,
        build_only: false,
    };

    let outcome = Driver::new(&session.config, &session.token)
        .run(&request, &options)
        .await?;

    if let Some(method) = &outcome.delivery {
        print_success(&format!("Programmed {} via {method}", request.base_name()));
    }
    if outcome.cleaned.is_empty() {
        print_detail(&format!("Bitstream: {}", outcome.artifacts.bin.display()));
    }
    Ok(())
}
