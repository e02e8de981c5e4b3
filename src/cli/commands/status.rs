//! CLI command for `icesugar-flash status`

use anyhow::Result;

use crate::cli::output::{print_detail, print_success};
use crate::cli::Session;
use crate::error::{DeviceError, FlashError};
use crate::infra::device::check_usb_presence;
use crate::infra::toolchain::ToolchainEnvironment;

/// Execute the status command. A missing board is an error here.
pub async fn execute(session: &Session) -> Result<()> {
    let config = &session.config;
    let id = config.usb_id()?;
    let env = ToolchainEnvironment::from_ambient();

    let presence = check_usb_presence(id, env.vars(), config.probe_timeout(), &session.token)
        .await
        .map_err(FlashError::from)?;

    if !presence.is_present() {
        return Err(FlashError::from(DeviceError::NotFound { id: id.to_string() }).into());
    }

    print_success(&format!("iCESugar-nano ({id}) connected"));
    match &presence.serial_port {
        Some(port) => print_detail(&format!("Serial port: {}", port.display())),
        None => print_detail("No serial port found"),
    }
    Ok(())
}
