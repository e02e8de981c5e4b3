//! Bitstream delivery
//!
//! Programs the board by writing the bitstream with the programmer tool and,
//! when that keeps failing, by copying it onto the probe's mass-storage
//! volume.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::cancel::{CancellationToken, Cancelled};
use super::retry::{retry, RetryError, RetryPolicy};
use crate::config::defaults;
use crate::error::{DeliveryError, DeviceError, TransferError};
use crate::infra::filesystem::ensure_writable_dir;
use crate::infra::mass_storage::VolumeLocator;
use crate::infra::process::{self, Invocation, OutputMode, ProcessError};

const DIRECT_WRITE: &str = "Direct write";
const MASS_STORAGE: &str = "Mass-storage copy";

/// Programmer clock of the iCELink probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSpeed {
    /// 8 MHz
    Mhz8 = 1,
    /// 12 MHz
    Mhz12 = 2,
    /// 36 MHz
    Mhz36 = 3,
    /// 72 MHz
    Mhz72 = 4,
}

impl ClockSpeed {
    /// Value passed to `icesprog -c`
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Frequency in MHz
    pub fn mhz(self) -> u32 {
        match self {
            Self::Mhz8 => 8,
            Self::Mhz12 => 12,
            Self::Mhz36 => 36,
            Self::Mhz72 => 72,
        }
    }
}

impl TryFrom<u8> for ClockSpeed {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Mhz8),
            2 => Ok(Self::Mhz12),
            3 => Ok(Self::Mhz36),
            4 => Ok(Self::Mhz72),
            other => Err(format!("Clock option must be 1-4, got {other}")),
        }
    }
}

impl fmt::Display for ClockSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} MHz", self.mhz())
    }
}

/// How the bitstream reached the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryMethod {
    /// Programmer tool wrote it
    DirectWrite,
    /// Copied onto the mass-storage volume
    MassStorage {
        /// Where the volume was mounted
        mount_point: PathBuf,
    },
}

impl fmt::Display for DeliveryMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectWrite => write!(f, "direct write"),
            Self::MassStorage { mount_point } => {
                write!(f, "mass-storage copy to {}", mount_point.display())
            }
        }
    }
}

/// Delivery settings
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Programmer executable
    pub programmer: String,
    /// Retry budget for direct writes
    pub direct_policy: RetryPolicy,
    /// Retry budget for mass-storage copies
    pub mass_storage_policy: RetryPolicy,
    /// Timeout for each programmer invocation
    pub tool_timeout: Duration,
    /// Timeout for `sync`
    pub sync_timeout: Duration,
    /// Wait after copying, before checking the file landed
    pub settle_delay: Duration,
    /// Stream programmer output
    pub verbose: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        let base = Duration::from_millis(defaults::BASE_DELAY_MS);
        Self {
            programmer: defaults::PROGRAMMER.to_string(),
            direct_policy: RetryPolicy::new(defaults::DIRECT_WRITE_ATTEMPTS, base),
            mass_storage_policy: RetryPolicy::new(defaults::MASS_STORAGE_ATTEMPTS, base),
            tool_timeout: Duration::from_secs(defaults::PROGRAMMER_TIMEOUT_SECS),
            sync_timeout: Duration::from_secs(defaults::SYNC_TIMEOUT_SECS),
            settle_delay: Duration::from_millis(defaults::SETTLE_DELAY_MS),
            verbose: false,
        }
    }
}

/// Delivers bitstreams to the board
#[derive(Debug)]
pub struct Programmer<'a, L> {
    config: DeliveryConfig,
    locator: L,
    env: &'a BTreeMap<String, String>,
    token: &'a CancellationToken,
}

impl<'a, L: VolumeLocator> Programmer<'a, L> {
    /// Create a programmer running tools with exactly `env`
    pub fn new(
        config: DeliveryConfig,
        locator: L,
        env: &'a BTreeMap<String, String>,
        token: &'a CancellationToken,
    ) -> Self {
        Self {
            config,
            locator,
            env,
            token,
        }
    }

    /// Deliver `bitstream`, falling back to mass storage when direct writes
    /// are exhausted. `force_mass_storage` skips the programmer tool.
    pub async fn deliver(
        &self,
        bitstream: &Path,
        force_mass_storage: bool,
    ) -> Result<DeliveryMethod, DeliveryError> {
        if force_mass_storage {
            tracing::info!("Using drag-and-drop programming as requested");
        } else {
            tracing::info!("Programming FPGA with {}...", self.config.programmer);
            let direct = retry(self.config.direct_policy, DIRECT_WRITE, self.token, |_| {
                self.direct_write(bitstream)
            })
            .await;
            match direct {
                Ok(()) => {
                    tracing::info!("FPGA programmed successfully");
                    return Ok(DeliveryMethod::DirectWrite);
                }
                Err(RetryError::Cancelled { .. }) => return Err(DeliveryError::Cancelled),
                Err(RetryError::Exhausted { source, .. }) => {
                    tracing::warn!(
                        "{} failed ({source}). Trying drag-and-drop programming...",
                        self.config.programmer
                    );
                }
            }
        }

        let mount_point = retry(
            self.config.mass_storage_policy,
            MASS_STORAGE,
            self.token,
            |_| self.copy_to_volume(bitstream),
        )
        .await
        .map_err(|e| match e {
            RetryError::Cancelled { .. } => DeliveryError::Cancelled,
            RetryError::Exhausted {
                attempts, source, ..
            } => DeliveryError::Exhausted {
                strategy: MASS_STORAGE,
                attempts,
                source,
            },
        })?;

        tracing::info!("Drag-and-drop programming completed");
        Ok(DeliveryMethod::MassStorage { mount_point })
    }

    /// Set the probe clock. Failures only warn.
    pub async fn set_clock(&self, clock: ClockSpeed) -> Result<(), Cancelled> {
        self.token.check()?;
        tracing::info!("Setting iCELink clock to {clock}...");
        let invocation = Invocation::new(&self.config.programmer, self.config.tool_timeout)
            .arg("-c")
            .arg(clock.index().to_string());
        match process::run(&invocation, self.env, self.token).await {
            Ok(output) if output.success => tracing::info!("Clock set to {clock}"),
            Ok(output) => tracing::warn!(
                "Failed to set clock, continuing: {}",
                output.output.trim()
            ),
            Err(ProcessError::Cancelled { .. }) => return Err(Cancelled),
            Err(e) => tracing::warn!("Failed to set clock, continuing: {e}"),
        }
        Ok(())
    }

    async fn direct_write(&self, bitstream: &Path) -> Result<(), TransferError> {
        let mode = if self.config.verbose {
            OutputMode::Streamed
        } else {
            OutputMode::Captured
        };
        let invocation = Invocation::new(&self.config.programmer, self.config.tool_timeout)
            .arg("-w")
            .arg(bitstream)
            .with_mode(mode);
        let output = process::run(&invocation, self.env, self.token).await?;
        if output.success {
            Ok(())
        } else {
            Err(TransferError::ToolFailed {
                tool: self.config.programmer.clone(),
                code: output.code,
                output: output.output,
            })
        }
    }

    async fn copy_to_volume(&self, bitstream: &Path) -> Result<PathBuf, TransferError> {
        let mount_point = self.locator.locate(self.token).await?;
        ensure_writable_dir(&mount_point)?;

        let file_name = bitstream.file_name().ok_or_else(|| TransferError::Copy {
            from: bitstream.to_path_buf(),
            to: mount_point.clone(),
            error: "bitstream path has no file name".to_string(),
        })?;
        let destination = mount_point.join(file_name);

        tracing::info!("Copying {} to {}", bitstream.display(), mount_point.display());
        tokio::fs::copy(bitstream, &destination)
            .await
            .map_err(|e| TransferError::Copy {
                from: bitstream.to_path_buf(),
                to: destination.clone(),
                error: e.to_string(),
            })?;

        self.sync().await?;

        if !self.config.settle_delay.is_zero() {
            tracing::debug!(
                "Waiting {:.1}s for the device to take the bitstream",
                self.config.settle_delay.as_secs_f64()
            );
            tokio::select! {
                () = tokio::time::sleep(self.config.settle_delay) => {}
                () = self.token.requested() => return Err(DeviceError::Cancelled.into()),
            }
        }

        if !destination.exists() {
            return Err(TransferError::NotIngested { path: destination });
        }
        Ok(mount_point)
    }

    /// Flush filesystem buffers. Only cancellation is an error.
    async fn sync(&self) -> Result<(), TransferError> {
        let invocation = Invocation::new("sync", self.config.sync_timeout);
        match process::run(&invocation, self.env, self.token).await {
            Ok(output) if output.success => {}
            Ok(output) => tracing::warn!("sync exited with {:?}", output.code),
            Err(ProcessError::Cancelled { .. }) => return Err(DeviceError::Cancelled.into()),
            Err(e) => tracing::warn!("sync unavailable: {e}"),
        }
        Ok(())
    }
}
