//! Doctor command logic
//!
//! Checks that the FPGA toolchain and host utilities resolve and that the
//! board is attached, with suggestions for whatever is missing.

use std::path::PathBuf;

use super::cancel::{CancellationToken, Cancelled};
use super::global_config::GlobalConfig;
use crate::infra::device::{check_usb_presence, DeviceStatus};
use crate::infra::toolchain::{ToolchainEnvironment, ToolchainResolver};

/// Host utilities used for device detection and mass-storage delivery
const HOST_UTILITIES: &[&str] = &["lsusb", "lsblk", "blkid", "mount", "sync"];

const TOOLCHAIN_HINT: &str =
    "Install the OSS CAD Suite (https://github.com/YosysHQ/oss-cad-suite-build) \
     or set toolchain.activation_script in config.toml";

/// Result of a single check
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// What was checked
    pub name: String,
    /// Whether the check passed
    pub passed: bool,
    /// Where the tool lives, or other detail on success
    pub detail: Option<String>,
    /// Error message if check failed
    pub error: Option<String>,
    /// Suggestion for fixing the issue
    pub suggestion: Option<String>,
    /// Whether a failure makes the tool unusable
    pub required: bool,
}

impl CheckResult {
    /// Create a passing check result
    pub fn pass(name: &str, detail: Option<String>, required: bool) -> Self {
        Self {
            name: name.to_string(),
            passed: true,
            detail,
            error: None,
            suggestion: None,
            required,
        }
    }

    /// Create a failing check result
    pub fn fail(name: &str, error: &str, suggestion: Option<&str>, required: bool) -> Self {
        Self {
            name: name.to_string(),
            passed: false,
            detail: None,
            error: Some(error.to_string()),
            suggestion: suggestion.map(String::from),
            required,
        }
    }
}

/// Overall doctor report
#[derive(Debug, Default)]
pub struct DoctorReport {
    /// Individual check results
    pub checks: Vec<CheckResult>,
    /// Configuration issues found
    pub config_issues: Vec<String>,
}

impl DoctorReport {
    /// Create a new empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a check result
    pub fn add_check(&mut self, result: CheckResult) {
        self.checks.push(result);
    }

    /// Add a configuration issue
    pub fn add_config_issue(&mut self, issue: String) {
        self.config_issues.push(issue);
    }

    /// Check if all required checks passed
    pub fn all_required_passed(&self) -> bool {
        self.checks
            .iter()
            .filter(|c| c.required)
            .all(|c| c.passed)
    }

    /// Count passed checks
    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }

    /// Count failed checks
    pub fn failed_count(&self) -> usize {
        self.checks.iter().filter(|c| !c.passed).count()
    }

    /// Get all failed required checks
    pub fn failed_required(&self) -> Vec<&CheckResult> {
        self.checks
            .iter()
            .filter(|c| c.required && !c.passed)
            .collect()
    }
}

/// Version line with the git revision the binary was built from
pub fn version_banner() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("VERGEN_GIT_SHA") {
        Some(sha) if !sha.is_empty() => {
            let short = sha.get(..9).unwrap_or(sha);
            format!("icesugar-flash {version} ({short})")
        }
        _ => format!("icesugar-flash {version}"),
    }
}

fn tool_check(name: &str, location: Option<PathBuf>, required: bool) -> CheckResult {
    match location {
        Some(path) => CheckResult::pass(name, Some(path.display().to_string()), required),
        None => CheckResult::fail(
            name,
            &format!("{name} not found in PATH"),
            required.then_some(TOOLCHAIN_HINT),
            required,
        ),
    }
}

/// Run every check
pub async fn run_doctor(
    config: &GlobalConfig,
    token: &CancellationToken,
) -> Result<DoctorReport, Cancelled> {
    let mut report = DoctorReport::new();

    let activation_script = config.activation_script();
    if let Some(script) = &config.toolchain.activation_script {
        if !script.is_file() {
            report.add_config_issue(format!(
                "toolchain.activation_script {} does not exist",
                script.display()
            ));
        }
    }

    let mut resolver = ToolchainResolver::new(activation_script, config.activation_timeout());
    let pipeline = config.pipeline_config();
    let mut required: Vec<&str> = pipeline.tools().to_vec();
    required.push(config.programmer());

    for tool in required {
        let location = resolver.locate(tool, token).await.map_err(|_| Cancelled)?;
        report.add_check(tool_check(tool, location, true));
    }

    let ambient = ToolchainEnvironment::from_ambient();
    for utility in HOST_UTILITIES {
        token.check()?;
        report.add_check(tool_check(utility, ambient.locate(utility), false));
    }

    match config.usb_id() {
        Ok(id) => {
            let presence =
                check_usb_presence(id, ambient.vars(), config.probe_timeout(), token).await?;
            let name = format!("iCESugar-nano ({id})");
            let check = match presence.status {
                DeviceStatus::Connected => CheckResult::pass(
                    &name,
                    presence
                        .serial_port
                        .map(|port| format!("serial {}", port.display())),
                    false,
                ),
                status => CheckResult::fail(
                    &name,
                    &format!("device {status}"),
                    Some("Connect the board with a data-capable USB cable"),
                    false,
                ),
            };
            report.add_check(check);
        }
        Err(e) => report.add_config_issue(e.to_string()),
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_result_pass() {
        let result = CheckResult::pass("yosys", Some("/usr/bin/yosys".to_string()), true);
        assert!(result.passed);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_missing_required_tool_has_hint() {
        let result = tool_check("nextpnr-ice40", None, true);
        assert!(!result.passed);
        assert_eq!(result.error.as_deref(), Some("nextpnr-ice40 not found in PATH"));
        assert!(result.suggestion.is_some());

        let optional = tool_check("blkid", None, false);
        assert!(optional.suggestion.is_none());
    }

    #[test]
    fn test_doctor_report_counts() {
        let mut report = DoctorReport::new();
        report.add_check(CheckResult::pass("yosys", None, true));
        report.add_check(CheckResult::fail("icepack", "missing", None, true));
        report.add_check(CheckResult::fail("lsblk", "missing", None, false));

        assert_eq!(report.passed_count(), 1);
        assert_eq!(report.failed_count(), 2);
        assert!(!report.all_required_passed());
        assert_eq!(report.failed_required().len(), 1);
    }

    #[test]
    fn test_version_banner_names_crate() {
        assert!(version_banner().starts_with("icesugar-flash "));
    }
}
