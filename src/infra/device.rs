//! USB device detection
//!
//! Finds the iCELink probe in the `lsusb` listing and, when it is connected,
//! looks for its companion serial port.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::config::defaults;
use crate::core::cancel::{CancellationToken, Cancelled};
use crate::infra::filesystem::expand_pattern;
use crate::infra::process::{self, Invocation, ProcessError};

/// USB vendor and product identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UsbId {
    /// Vendor id
    pub vendor: u16,
    /// Product id
    pub product: u16,
}

impl FromStr for UsbId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (vendor, product) = s
            .split_once(':')
            .ok_or_else(|| format!("USB id '{s}' must look like vvvv:pppp"))?;
        let parse = |part: &str| {
            u16::from_str_radix(part, 16).map_err(|e| format!("Invalid USB id '{s}': {e}"))
        };
        Ok(Self {
            vendor: parse(vendor)?,
            product: parse(product)?,
        })
    }
}

impl fmt::Display for UsbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor, self.product)
    }
}

/// Outcome of probing for the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// Listed by `lsusb`
    Connected,
    /// `lsusb` ran and the device is not listed
    NotConnected,
    /// `lsusb` could not be run
    Unknown,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected => write!(f, "connected"),
            Self::NotConnected => write!(f, "not connected"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of a USB presence check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbPresence {
    /// Probe outcome
    pub status: DeviceStatus,
    /// First companion serial port found, informational only
    pub serial_port: Option<PathBuf>,
}

impl UsbPresence {
    /// Whether the device is known to be connected
    pub fn is_present(&self) -> bool {
        self.status == DeviceStatus::Connected
    }
}

/// Extract the `ID vvvv:pppp` column of every `lsusb` line
pub fn parse_lsusb(output: &str) -> Vec<UsbId> {
    let Ok(pattern) = regex::Regex::new(r"\bID ([0-9a-fA-F]{4}:[0-9a-fA-F]{4})\b") else {
        return Vec::new();
    };
    output
        .lines()
        .filter_map(|line| pattern.captures(line))
        .filter_map(|caps| caps.get(1)?.as_str().parse().ok())
        .collect()
}

/// Check whether the device `id` is connected.
///
/// Absence is reported through [`UsbPresence::status`], never as an error.
pub async fn check_usb_presence(
    id: UsbId,
    env: &BTreeMap<String, String>,
    timeout: Duration,
    token: &CancellationToken,
) -> Result<UsbPresence, Cancelled> {
    token.check()?;

    let listing = process::run(&Invocation::new("lsusb", timeout), env, token).await;
    let status = match listing {
        Ok(output) if output.success => {
            tracing::debug!("lsusb output:\n{}", output.output);
            if parse_lsusb(&output.output).contains(&id) {
                DeviceStatus::Connected
            } else {
                DeviceStatus::NotConnected
            }
        }
        Ok(output) => {
            tracing::warn!("lsusb exited with {:?}: {}", output.code, output.output.trim());
            DeviceStatus::Unknown
        }
        Err(ProcessError::Cancelled { .. }) => return Err(Cancelled),
        Err(e) => {
            tracing::warn!("Could not list USB devices: {e}");
            DeviceStatus::Unknown
        }
    };

    if status != DeviceStatus::Connected {
        tracing::warn!("iCESugar-nano ({id}) not found ({status}). Check connection.");
        return Ok(UsbPresence {
            status,
            serial_port: None,
        });
    }

    tracing::info!("Found iCESugar-nano ({id})");
    let serial_port = find_serial_port();
    match &serial_port {
        Some(port) => tracing::info!("Found serial device: {}", port.display()),
        None => tracing::info!("No ttyUSB/ACM devices found. Continuing without serial port."),
    }

    Ok(UsbPresence {
        status,
        serial_port,
    })
}

/// First device node matching the known serial naming patterns
pub fn find_serial_port() -> Option<PathBuf> {
    defaults::SERIAL_PATTERNS
        .iter()
        .flat_map(|pattern| expand_pattern(pattern))
        .next()
}
