//! Toolchain resolution
//!
//! Locates the FPGA tools and, when some are missing from `PATH`, sources the
//! toolchain activation script (OSS CAD Suite `environment`) in a subshell to
//! learn which variables it would add.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use crate::config::defaults;
use crate::core::cancel::CancellationToken;
use crate::error::ToolchainError;

/// Variables a subshell sets on its own and that never count as augmentation
const SHELL_BOOKKEEPING: &[&str] = &["_", "SHLVL", "PWD", "OLDPWD"];

/// Environment every external invocation of a run uses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainEnvironment {
    vars: BTreeMap<String, String>,
    augmentation: BTreeMap<String, String>,
}

impl ToolchainEnvironment {
    /// Environment of the current process, without augmentation
    pub fn from_ambient() -> Self {
        Self::new(std::env::vars().collect(), BTreeMap::new())
    }

    /// Combine an ambient map with an augmentation overlay
    pub fn new(ambient: BTreeMap<String, String>, augmentation: BTreeMap<String, String>) -> Self {
        let mut vars = ambient;
        vars.extend(augmentation.clone());
        Self { vars, augmentation }
    }

    /// Full variable map
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Variables added or changed by the activation script
    pub fn augmentation(&self) -> &BTreeMap<String, String> {
        &self.augmentation
    }

    /// Whether the activation script contributed anything
    pub fn is_augmented(&self) -> bool {
        !self.augmentation.is_empty()
    }

    /// `PATH` of this environment
    pub fn path(&self) -> Option<&str> {
        self.vars.get("PATH").map(String::as_str)
    }

    /// Locate `tool` under this environment's `PATH`
    pub fn locate(&self, tool: &str) -> Option<PathBuf> {
        locate_in(tool, self.path())
    }
}

/// Resolves tools against the ambient environment and, lazily, the
/// activation script.
#[derive(Debug)]
pub struct ToolchainResolver {
    ambient: BTreeMap<String, String>,
    activation_script: Option<PathBuf>,
    timeout: Duration,
    augmentation: Option<BTreeMap<String, String>>,
}

impl ToolchainResolver {
    /// Create a resolver over the current process environment
    pub fn new(activation_script: Option<PathBuf>, timeout: Duration) -> Self {
        Self::with_ambient(std::env::vars().collect(), activation_script, timeout)
    }

    /// Create a resolver over an explicit ambient environment
    pub fn with_ambient(
        ambient: BTreeMap<String, String>,
        activation_script: Option<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            ambient,
            activation_script,
            timeout,
            augmentation: None,
        }
    }

    /// The activation script this resolver would source, if any
    pub fn activation_script(&self) -> Option<&Path> {
        self.activation_script.as_deref()
    }

    /// Resolve every tool, reporting all missing ones at once
    pub async fn resolve(
        &mut self,
        tools: &[&str],
        token: &CancellationToken,
    ) -> Result<ToolchainEnvironment, ToolchainError> {
        let ambient_path = self.ambient.get("PATH").cloned();
        let mut missing = Vec::new();
        let mut needs_augmentation = false;

        for tool in tools {
            if let Some(path) = locate_in(tool, ambient_path.as_deref()) {
                tracing::debug!("Found {tool} at {}", path.display());
                continue;
            }

            self.ensure_augmentation(token).await?;
            match locate_in(tool, self.augmented_path().as_deref()) {
                Some(path) => {
                    tracing::debug!("Found {tool} at {} via activation script", path.display());
                    needs_augmentation = true;
                }
                None => {
                    tracing::error!("{tool} is not installed.");
                    missing.push((*tool).to_string());
                }
            }
        }

        if !missing.is_empty() {
            return Err(ToolchainError::ToolMissing { tools: missing });
        }

        let augmentation = if needs_augmentation {
            self.augmentation.clone().unwrap_or_default()
        } else {
            BTreeMap::new()
        };
        Ok(ToolchainEnvironment::new(self.ambient.clone(), augmentation))
    }

    /// Locate a single tool, consulting the activation script when needed
    pub async fn locate(
        &mut self,
        tool: &str,
        token: &CancellationToken,
    ) -> Result<Option<PathBuf>, ToolchainError> {
        if let Some(path) = locate_in(tool, self.ambient.get("PATH").map(String::as_str)) {
            return Ok(Some(path));
        }
        self.ensure_augmentation(token).await?;
        Ok(locate_in(tool, self.augmented_path().as_deref()))
    }

    /// Compute the augmentation once per resolver
    async fn ensure_augmentation(&mut self, token: &CancellationToken) -> Result<(), ToolchainError> {
        if self.augmentation.is_some() {
            return Ok(());
        }
        let augmentation = match &self.activation_script {
            Some(script) => {
                source_activation_script(script, &self.ambient, self.timeout, token).await?
            }
            None => BTreeMap::new(),
        };
        self.augmentation = Some(augmentation);
        Ok(())
    }

    /// `PATH` after augmentation, falling back to the ambient one
    fn augmented_path(&self) -> Option<String> {
        self.augmentation
            .as_ref()
            .and_then(|augmentation| augmentation.get("PATH"))
            .or_else(|| self.ambient.get("PATH"))
            .cloned()
    }
}

/// Default activation script location, when it exists
pub fn default_activation_script() -> Option<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(defaults::ACTIVATION_SCRIPT))
        .filter(|path| path.is_file())
}

/// Variables present in `after` that are new or differ from `before`
pub fn diff_environment(
    before: &BTreeMap<String, String>,
    after: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    after
        .iter()
        .filter(|(key, _)| !SHELL_BOOKKEEPING.contains(&key.as_str()))
        .filter(|(key, value)| before.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Parse the NUL-separated output of `env -0`
pub fn parse_env_output(output: &[u8]) -> BTreeMap<String, String> {
    output
        .split(|byte| *byte == 0)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let entry = String::from_utf8_lossy(entry);
            let (key, value) = entry.split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

fn locate_in(tool: &str, path: Option<&str>) -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    which::which_in(tool, path, cwd).ok()
}

async fn source_activation_script(
    script: &Path,
    ambient: &BTreeMap<String, String>,
    timeout: Duration,
    token: &CancellationToken,
) -> Result<BTreeMap<String, String>, ToolchainError> {
    if !script.is_file() {
        tracing::warn!("Toolchain activation script {} not found", script.display());
        return Ok(BTreeMap::new());
    }

    tracing::info!("Sourcing toolchain environment from {}", script.display());

    let child = tokio::process::Command::new("bash")
        .arg("-c")
        .arg(r#". "$1" >/dev/null 2>&1; env -0"#)
        .arg("bash")
        .arg(script)
        .env_clear()
        .envs(ambient)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = tokio::select! {
        result = tokio::time::timeout(timeout, child) => result,
        () = token.requested() => return Err(ToolchainError::Cancelled),
    };

    match output {
        Ok(Ok(output)) if output.status.success() => {
            let augmentation = diff_environment(ambient, &parse_env_output(&output.stdout));
            tracing::debug!(
                "Activation script added {} variables: {}",
                augmentation.len(),
                augmentation.keys().cloned().collect::<Vec<_>>().join(", ")
            );
            Ok(augmentation)
        }
        Ok(Ok(output)) => {
            tracing::warn!(
                "Activation script {} exited with {}",
                script.display(),
                output.status
            );
            Ok(BTreeMap::new())
        }
        Ok(Err(e)) => {
            tracing::warn!("Failed to source {}: {e}", script.display());
            Ok(BTreeMap::new())
        }
        Err(_) => {
            tracing::warn!(
                "Sourcing {} timed out after {}s",
                script.display(),
                timeout.as_secs()
            );
            Ok(BTreeMap::new())
        }
    }
}
