//! Platform-specific directory management
//!
//! Config lives in the platform config directory, the run log in the data
//! directory. Both can be redirected:
//! - `ICESUGAR_CONFIG_DIR` - Override config directory
//! - `ICESUGAR_DATA_DIR` - Override data directory

use std::env;
use std::path::PathBuf;

use crate::config::defaults::LOG_FILE_NAME;

/// Environment variable names for directory overrides
pub const ENV_CONFIG_DIR: &str = "ICESUGAR_CONFIG_DIR";
pub const ENV_DATA_DIR: &str = "ICESUGAR_DATA_DIR";

/// Application name used in directory paths
const APP_NAME: &str = "icesugar-flash";

/// Directory provider for icesugar-flash
#[derive(Debug, Clone)]
pub struct AppDirs {
    config_dir: PathBuf,
    data_dir: PathBuf,
}

impl AppDirs {
    /// Resolve directories from the environment, then platform defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            config_dir: resolve(ENV_CONFIG_DIR, dirs::config_dir, ".config"),
            data_dir: resolve(ENV_DATA_DIR, dirs::data_dir, ".local/share"),
        }
    }

    /// Use explicit directories
    #[must_use]
    pub fn with_roots(config_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            data_dir: data_dir.into(),
        }
    }

    /// Config directory
    /// - Linux: `$XDG_CONFIG_HOME/icesugar-flash` or `~/.config/icesugar-flash`
    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    /// Data directory, home of the run log
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }

    /// `config.toml` in the config directory
    #[must_use]
    pub fn global_config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Default run log location
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE_NAME)
    }
}

impl Default for AppDirs {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve(var: &str, platform: fn() -> Option<PathBuf>, home_fallback: &str) -> PathBuf {
    if let Some(path) = env::var_os(var).filter(|p| !p.is_empty()) {
        return PathBuf::from(path);
    }
    platform().map(|p| p.join(APP_NAME)).unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(home_fallback)
            .join(APP_NAME)
    })
}
