//! CLI command for `icesugar-flash doctor`
//!
//! Checks toolchain, host utilities and board, with suggestions.

use anyhow::Result;

use crate::cli::output::{print_detail, print_info, print_success, print_warning, status};
use crate::cli::Session;
use crate::core::doctor::{run_doctor, version_banner};
use crate::error::FlashError;

/// Execute the doctor command
pub async fn execute(session: &Session) -> Result<()> {
    print_info(&version_banner());
    print_info("Checking toolchain and device...");
    println!();

    let report = run_doctor(&session.config, &session.token)
        .await
        .map_err(FlashError::from)?;

    for check in &report.checks {
        let detail = check
            .detail
            .as_ref()
            .map(|d| format!(" ({d})"))
            .unwrap_or_default();
        let required = if check.required { "" } else { " [optional]" };

        if check.passed {
            println!("  {} {}{detail}{required}", status::SUCCESS, check.name);
        } else {
            println!("  {} {}{required}", status::ERROR, check.name);
            if let Some(error) = &check.error {
                print_detail(&format!("Error: {error}"));
            }
            if let Some(suggestion) = &check.suggestion {
                print_detail(&format!("Suggestion: {suggestion}"));
            }
        }
    }

    if !report.config_issues.is_empty() {
        println!();
        print_warning("Configuration issues:");
        for issue in &report.config_issues {
            print_detail(&format!("• {issue}"));
        }
    }

    println!();
    let passed = report.passed_count();
    let total = report.checks.len();
    if !report.all_required_passed() {
        println!("{} {passed}/{total} checks passed", status::ERROR);
        let missing: Vec<&str> = report
            .failed_required()
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        return Err(anyhow::anyhow!(
            "Missing required tools: {}",
            missing.join(", ")
        ));
    }

    if report.failed_count() == 0 {
        print_success(&format!("All checks passed ({passed}/{total})"));
    } else {
        print_warning(&format!("{passed}/{total} checks passed (optional checks failed)"));
    }
    Ok(())
}
