//! Error types for icesugar-flash
//!
//! Domain-specific error types using thiserror. Each component reports its own
//! error type; [`FlashError`] wraps them at the driver boundary.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::core::cancel::Cancelled;
use crate::core::pipeline::Stage;
use crate::infra::process::ProcessError;

/// Input validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// No source file given
    #[error("At least one Verilog source file is required")]
    NoSources,

    /// Input file missing
    #[error("File {path} does not exist")]
    FileNotFound { path: PathBuf },

    /// Input file has the wrong extension
    #[error("File {path} must have .{expected} extension")]
    WrongExtension {
        path: PathBuf,
        expected: &'static str,
    },

    /// No usable file stem
    #[error("Cannot derive a design name from {path}")]
    NoBaseName { path: PathBuf },
}

/// Toolchain resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolchainError {
    /// One or more executables could not be found
    #[error("Required tools not found in PATH: {}", tools.join(", "))]
    ToolMissing { tools: Vec<String> },

    /// Cancelled while sourcing the activation script
    #[error("Toolchain resolution cancelled")]
    Cancelled,
}

/// Failure of a single build stage attempt
#[derive(Error, Debug)]
pub enum StageError {
    /// The stage did not finish within its wall-clock budget
    #[error("{stage} timed out after {}s", timeout.as_secs_f64())]
    Timeout { stage: Stage, timeout: Duration },

    /// The tool exited unsuccessfully
    #[error("{stage} exited with {}", describe_exit(*code))]
    Execution {
        stage: Stage,
        code: Option<i32>,
        output: String,
    },

    /// The tool could not be run at all
    #[error("{stage}: {source}")]
    Launch {
        stage: Stage,
        #[source]
        source: ProcessError,
    },
}

/// Build pipeline errors
#[derive(Error, Debug)]
pub enum BuildError {
    /// A stage used up its retry budget
    #[error("{stage} failed after {attempts} attempt(s): {source}")]
    StageFailed {
        stage: Stage,
        attempts: u32,
        #[source]
        source: StageError,
    },

    /// Every stage exited zero but some outputs are absent or empty
    #[error("Toolchain finished but produced no output at: {}", display_paths(paths))]
    MissingArtifacts { paths: Vec<PathBuf> },

    /// Output directory handling failed
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },

    /// Cancellation observed
    #[error("Build cancelled")]
    Cancelled,
}

/// Device detection and mass-storage errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// USB device not connected
    #[error("iCESugar-nano ({id}) not found. Check the USB connection")]
    NotFound { id: String },

    /// Every way of locating or mounting the volume failed
    #[error("Could not find or mount the {label} volume: {reason}")]
    Mount { label: String, reason: String },

    /// The mount point exists but cannot be written
    #[error("Mass-storage volume {path} is not writable")]
    NotWritable { path: PathBuf },

    /// Filesystem error
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },

    /// Cancellation observed
    #[error("Device operation cancelled")]
    Cancelled,
}

/// Failure of a single delivery attempt
#[derive(Error, Debug)]
pub enum TransferError {
    /// The programmer tool exited unsuccessfully
    #[error("{tool} exited with {}", describe_exit(*code))]
    ToolFailed {
        tool: String,
        code: Option<i32>,
        output: String,
    },

    /// The programmer tool could not be run or timed out
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Mount point lookup or permission failure
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// Copy to the volume failed
    #[error("Failed to copy {from} to {to}: {error}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        error: String,
    },

    /// Copied file vanished or never appeared
    #[error("Bitstream not present at {path} after settling")]
    NotIngested { path: PathBuf },
}

/// Programmer errors
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Every available strategy used up its retry budget
    #[error("{strategy} failed after {attempts} attempt(s): {source}")]
    Exhausted {
        strategy: &'static str,
        attempts: u32,
        #[source]
        source: TransferError,
    },

    /// Cancellation observed
    #[error("Delivery cancelled")]
    Cancelled,
}

/// Top-level error type for one run
#[derive(Error, Debug)]
pub enum FlashError {
    /// Invalid input
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Missing executables
    #[error("Toolchain error: {0}")]
    Toolchain(ToolchainError),

    /// Build failure
    #[error("Build error: {0}")]
    Build(BuildError),

    /// Device failure
    #[error("Device error: {0}")]
    Device(DeviceError),

    /// Delivery failure
    #[error("Programming error: {0}")]
    Delivery(DeliveryError),

    /// Interrupted by the user
    #[error("Cancelled by user")]
    Cancelled,

    /// Anything else
    #[error("Unexpected error: {0:#}")]
    Unexpected(#[from] anyhow::Error),
}

impl FlashError {
    /// Whether this error stems from a cancellation request
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<Cancelled> for FlashError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl From<ToolchainError> for FlashError {
    fn from(error: ToolchainError) -> Self {
        match error {
            ToolchainError::Cancelled => Self::Cancelled,
            other => Self::Toolchain(other),
        }
    }
}

impl From<BuildError> for FlashError {
    fn from(error: BuildError) -> Self {
        match error {
            BuildError::Cancelled => Self::Cancelled,
            other => Self::Build(other),
        }
    }
}

impl From<DeviceError> for FlashError {
    fn from(error: DeviceError) -> Self {
        match error {
            DeviceError::Cancelled => Self::Cancelled,
            other => Self::Device(other),
        }
    }
}

impl From<DeliveryError> for FlashError {
    fn from(error: DeliveryError) -> Self {
        match error {
            DeliveryError::Cancelled => Self::Cancelled,
            other => Self::Delivery(other),
        }
    }
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "termination by signal".to_string(),
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
