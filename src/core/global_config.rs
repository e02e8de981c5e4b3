//! Global configuration management
//!
//! Reads settings from `config.toml` in the config directory. Every field is
//! optional; accessors fall back to the values in [`crate::config::defaults`].

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use super::flash::DeliveryConfig;
use super::pipeline::PipelineConfig;
use super::retry::RetryPolicy;
use crate::config::defaults;
use crate::infra::device::UsbId;
use crate::infra::dirs::AppDirs;
use crate::infra::mass_storage::MassStorageConfig;
use crate::infra::toolchain::default_activation_script;

/// Global configuration error types
#[derive(Error, Debug)]
pub enum GlobalConfigError {
    /// Failed to read config file
    #[error("Failed to read config file '{path}': {error}")]
    ReadError { path: String, error: String },

    /// Failed to parse config file
    #[error("Failed to parse config file '{path}': {error}")]
    ParseError { path: String, error: String },

    /// A value parsed but makes no sense
    #[error("Invalid value for '{key}': {error}")]
    InvalidValue { key: String, error: String },
}

/// Global configuration for icesugar-flash
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlobalConfig {
    /// Retry budgets
    #[serde(default)]
    pub retry: RetrySettings,

    /// Timeouts for external tools
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Board and probe settings
    #[serde(default)]
    pub device: DeviceConfig,

    /// Tool names and activation
    #[serde(default)]
    pub toolchain: ToolchainConfig,

    /// Run log settings
    #[serde(default)]
    pub log: LogConfig,
}

/// Retry budgets per operation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetrySettings {
    /// Each build stage
    #[serde(default)]
    pub build: RetrySection,

    /// Programmer tool writes
    #[serde(default)]
    pub direct_write: RetrySection,

    /// Mass-storage copies
    #[serde(default)]
    pub mass_storage: RetrySection,
}

/// One retry budget
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RetrySection {
    /// Maximum attempts
    pub max_attempts: Option<u32>,

    /// Delay before the first retry, in milliseconds
    pub base_delay_ms: Option<u64>,
}

impl RetrySection {
    fn policy(&self, default_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts.unwrap_or(default_attempts),
            Duration::from_millis(self.base_delay_ms.unwrap_or(defaults::BASE_DELAY_MS)),
        )
    }
}

/// Timeouts, in seconds
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeoutConfig {
    pub synthesize_secs: Option<u64>,
    pub place_route_secs: Option<u64>,
    pub pack_secs: Option<u64>,
    pub programmer_secs: Option<u64>,
    pub probe_secs: Option<u64>,
    pub mount_secs: Option<u64>,
    pub sync_secs: Option<u64>,
    pub activation_secs: Option<u64>,
}

/// Board and probe settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceConfig {
    /// USB id of the probe, `vvvv:pppp`
    pub usb_id: Option<String>,

    /// Mass-storage volume label
    pub volume_label: Option<String>,

    /// Where the volume is mounted by hand
    pub mount_point: Option<PathBuf>,

    /// Wait after copying to the volume, in milliseconds
    pub settle_delay_ms: Option<u64>,

    /// nextpnr device flag
    pub fpga_device: Option<String>,

    /// nextpnr package
    pub fpga_package: Option<String>,

    /// Command prefixed to `mount`, like `sudo`
    pub privilege_helper: Option<String>,
}

/// Tool names and activation script
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolchainConfig {
    /// Script sourced when tools are missing from `PATH`
    pub activation_script: Option<PathBuf>,

    pub synthesizer: Option<String>,
    pub place_route: Option<String>,
    pub packer: Option<String>,
    pub programmer: Option<String>,
}

/// Run log settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    /// Lines kept after rotation
    pub max_lines: Option<usize>,

    /// Log file location
    pub path: Option<PathBuf>,
}

fn secs(value: Option<u64>, default: u64) -> Duration {
    Duration::from_secs(value.unwrap_or(default))
}

impl GlobalConfig {
    /// Load global configuration from the config directory
    ///
    /// # Errors
    ///
    /// Returns `GlobalConfigError::ParseError` if the config file exists but
    /// contains invalid TOML.
    pub fn load(dirs: &AppDirs) -> Result<Self, GlobalConfigError> {
        Self::load_from_path(&dirs.global_config_path())
    }

    /// Load global configuration from a specific path.
    ///
    /// A missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<Self, GlobalConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| GlobalConfigError::ReadError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| GlobalConfigError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// USB id of the probe
    pub fn usb_id(&self) -> Result<UsbId, GlobalConfigError> {
        self.device
            .usb_id
            .as_deref()
            .unwrap_or(defaults::USB_ID)
            .parse()
            .map_err(|error| GlobalConfigError::InvalidValue {
                key: "device.usb_id".to_string(),
                error,
            })
    }

    /// Script to source when tools are missing, if one is configured or installed
    #[must_use]
    pub fn activation_script(&self) -> Option<PathBuf> {
        self.toolchain
            .activation_script
            .clone()
            .or_else(default_activation_script)
    }

    /// Timeout for sourcing the activation script
    #[must_use]
    pub fn activation_timeout(&self) -> Duration {
        secs(self.timeouts.activation_secs, defaults::ACTIVATION_TIMEOUT_SECS)
    }

    /// Timeout for `lsusb`, `lsblk` and `blkid`
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        secs(self.timeouts.probe_secs, defaults::PROBE_TIMEOUT_SECS)
    }

    /// Programmer executable
    #[must_use]
    pub fn programmer(&self) -> &str {
        self.toolchain
            .programmer
            .as_deref()
            .unwrap_or(defaults::PROGRAMMER)
    }

    /// Build pipeline settings
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        let toolchain = &self.toolchain;
        PipelineConfig {
            synthesizer: toolchain
                .synthesizer
                .clone()
                .unwrap_or_else(|| defaults::SYNTHESIZER.to_string()),
            place_route: toolchain
                .place_route
                .clone()
                .unwrap_or_else(|| defaults::PLACE_ROUTE.to_string()),
            packer: toolchain
                .packer
                .clone()
                .unwrap_or_else(|| defaults::PACKER.to_string()),
            fpga_device: self
                .device
                .fpga_device
                .clone()
                .unwrap_or_else(|| defaults::FPGA_DEVICE.to_string()),
            fpga_package: self
                .device
                .fpga_package
                .clone()
                .unwrap_or_else(|| defaults::FPGA_PACKAGE.to_string()),
            policy: self.retry.build.policy(defaults::BUILD_ATTEMPTS),
            synthesize_timeout: secs(self.timeouts.synthesize_secs, defaults::SYNTHESIZE_TIMEOUT_SECS),
            place_route_timeout: secs(
                self.timeouts.place_route_secs,
                defaults::PLACE_ROUTE_TIMEOUT_SECS,
            ),
            pack_timeout: secs(self.timeouts.pack_secs, defaults::PACK_TIMEOUT_SECS),
        }
    }

    /// Delivery settings
    #[must_use]
    pub fn delivery_config(&self, verbose: bool) -> DeliveryConfig {
        DeliveryConfig {
            programmer: self.programmer().to_string(),
            direct_policy: self.retry.direct_write.policy(defaults::DIRECT_WRITE_ATTEMPTS),
            mass_storage_policy: self.retry.mass_storage.policy(defaults::MASS_STORAGE_ATTEMPTS),
            tool_timeout: secs(self.timeouts.programmer_secs, defaults::PROGRAMMER_TIMEOUT_SECS),
            sync_timeout: secs(self.timeouts.sync_secs, defaults::SYNC_TIMEOUT_SECS),
            settle_delay: Duration::from_millis(
                self.device.settle_delay_ms.unwrap_or(defaults::SETTLE_DELAY_MS),
            ),
            verbose,
        }
    }

    /// Volume discovery settings
    #[must_use]
    pub fn mass_storage_config(&self) -> MassStorageConfig {
        let label = self
            .device
            .volume_label
            .clone()
            .unwrap_or_else(|| defaults::VOLUME_LABEL.to_string());
        let mount_point = self
            .device
            .mount_point
            .clone()
            .unwrap_or_else(|| PathBuf::from(defaults::MOUNT_POINT));

        // Automount patterns follow the label; the manual mount point is always tried last
        let mut patterns: Vec<String> = defaults::MOUNT_PATTERNS
            .iter()
            .map(|pattern| pattern.replace(defaults::VOLUME_LABEL, &label))
            .collect();
        let manual = mount_point.display().to_string();
        if !patterns.contains(&manual) {
            patterns.push(manual);
        }

        MassStorageConfig {
            label,
            patterns,
            device_candidates: defaults::DEVICE_NODE_CANDIDATES
                .iter()
                .map(PathBuf::from)
                .collect(),
            mount_point,
            privilege_helper: self.device.privilege_helper.clone(),
            probe_timeout: self.probe_timeout(),
            mount_timeout: secs(self.timeouts.mount_secs, defaults::MOUNT_TIMEOUT_SECS),
        }
    }

    /// Maximum run log length in lines
    #[must_use]
    pub fn log_max_lines(&self) -> usize {
        self.log.max_lines.unwrap_or(defaults::LOG_MAX_LINES)
    }

    /// Run log location
    #[must_use]
    pub fn log_path(&self, dirs: &AppDirs) -> PathBuf {
        self.log.path.clone().unwrap_or_else(|| dirs.log_path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = GlobalConfig::default();
        let pipeline = config.pipeline_config();
        let delivery = config.delivery_config(false);

        assert_eq!(pipeline.tools(), ["yosys", "nextpnr-ice40", "icepack"]);
        assert_eq!(pipeline.policy.max_attempts(), 3);
        assert_eq!(delivery.programmer, "icesprog");
        assert_eq!(delivery.settle_delay, Duration::from_millis(5000));
        assert_eq!(config.usb_id().unwrap().to_string(), "1d50:602b");
        assert_eq!(config.log_max_lines(), 5000);
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let temp_dir = TempDir::new().unwrap();
        let config = GlobalConfig::load_from_path(&temp_dir.path().join("config.toml")).unwrap();
        assert!(config.toolchain.synthesizer.is_none());
    }

    #[test]
    fn test_load_valid_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let content = r#"
[retry.build]
max_attempts = 5
base_delay_ms = 250

[retry.mass_storage]
max_attempts = 1

[timeouts]
place_route_secs = 900

[device]
settle_delay_ms = 0
privilege_helper = "sudo"

[toolchain]
synthesizer = "/opt/cad/bin/yosys"
"#;
        fs::write(&config_path, content).unwrap();

        let config = GlobalConfig::load_from_path(&config_path).unwrap();
        let pipeline = config.pipeline_config();
        let delivery = config.delivery_config(false);

        assert_eq!(pipeline.policy.max_attempts(), 5);
        assert_eq!(pipeline.policy.base_delay(), Duration::from_millis(250));
        assert_eq!(pipeline.place_route_timeout, Duration::from_secs(900));
        assert_eq!(pipeline.synthesizer, "/opt/cad/bin/yosys");
        assert_eq!(delivery.mass_storage_policy.max_attempts(), 1);
        assert_eq!(delivery.direct_policy.max_attempts(), 3);
        assert!(delivery.settle_delay.is_zero());
        assert_eq!(
            config.mass_storage_config().privilege_helper.as_deref(),
            Some("sudo")
        );
    }

    #[test]
    fn test_load_invalid_toml_returns_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "invalid toml [[[").unwrap();

        let result = GlobalConfig::load_from_path(&config_path);
        assert!(matches!(result, Err(GlobalConfigError::ParseError { .. })));
    }

    #[test]
    fn test_invalid_usb_id() {
        let config = GlobalConfig {
            device: DeviceConfig {
                usb_id: Some("nope".to_string()),
                ..DeviceConfig::default()
            },
            ..GlobalConfig::default()
        };
        assert!(matches!(
            config.usb_id(),
            Err(GlobalConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_custom_label_follows_into_patterns() {
        let config = GlobalConfig {
            device: DeviceConfig {
                volume_label: Some("DAPLINK".to_string()),
                mount_point: Some(PathBuf::from("/mnt/probe")),
                ..DeviceConfig::default()
            },
            ..GlobalConfig::default()
        };
        let storage = config.mass_storage_config();

        assert_eq!(storage.label, "DAPLINK");
        assert_eq!(storage.patterns[0], "/media/*/DAPLINK");
        assert_eq!(storage.patterns.last().map(String::as_str), Some("/mnt/probe"));
    }
}
