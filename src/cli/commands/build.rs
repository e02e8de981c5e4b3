//! CLI command for `icesugar-flash build`

use anyhow::Result;

use super::DesignArgs;
use crate::cli::output::{print_detail, print_success};
use crate::cli::Session;
use crate::core::driver::{Driver, RunOptions};

/// Execute the build command
pub async fn execute(session: &Session, args: &DesignArgs) -> Result<()> {
    let request = args.to_request(session.verbose > 0)?;
    let options = RunOptions {
        build_only: true,
        ..RunOptions::default()
    };

    let outcome = Driver::new(&session.config, &session.token)
        .run(&request, &options)
        .await?;

    print_success(&format!("Built {}", request.base_name()));
    for path in outcome.artifacts.paths() {
        print_detail(&path.display().to_string());
    }
    Ok(())
}
