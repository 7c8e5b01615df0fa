//! CLI command for `fieldkit doctor`
//!
//! Checks the flash environment and reports issues with suggestions.

use anyhow::Result;

use super::CommandContext;
use crate::cli::output::{
    is_json, is_quiet, print_detail, print_info, print_success, print_warning, status,
};
use crate::core::doctor::{gather_facts, run_doctor};

const BUILD: &str = match option_env!("VERGEN_GIT_SHA") {
    Some(sha) => sha,
    None => "unknown",
};

/// Execute the doctor command
pub fn execute() -> Result<()> {
    let ctx = CommandContext::load()?;
    let facts = gather_facts(ctx.config.qmk_binary(), &ctx.cwd);
    let report = run_doctor(&facts);
    let failed_required = report.failed_required();

    if is_json() {
        let overall = if report.failed_count() == 0 {
            "success"
        } else if failed_required.is_empty() {
            "warning"
        } else {
            "error"
        };
        let json_result = serde_json::json!({
            "status": overall,
            "version": env!("CARGO_PKG_VERSION"),
            "build": BUILD,
            "checks": report.checks,
            "passed_count": report.passed_count(),
            "total_count": report.checks.len()
        });
        println!("{}", serde_json::to_string_pretty(&json_result)?);

        if !failed_required.is_empty() {
            return Err(anyhow::anyhow!("Environment is not ready for flashing"));
        }
        return Ok(());
    }

    if is_quiet() {
        if !failed_required.is_empty() {
            for check in failed_required {
                eprintln!("{} Missing required: {}", status::ERROR, check.name);
            }
            return Err(anyhow::anyhow!("Environment is not ready for flashing"));
        }
        return Ok(());
    }

    print_info(&format!(
        "fieldkit {} ({BUILD}): validating flash environment...",
        env!("CARGO_PKG_VERSION")
    ));
    println!();

    for check in &report.checks {
        let detail = check
            .detail
            .as_ref()
            .map(|d| format!(" ({d})"))
            .unwrap_or_default();
        let optional = if check.required { "" } else { " [optional]" };

        if check.passed {
            println!("  {} {}{detail}{optional}", status::SUCCESS, check.name);
        } else {
            println!("  {} {}{optional}", status::ERROR, check.name);
            if let Some(error) = &check.error {
                print_detail(&format!("Error: {error}"));
            }
            if let Some(suggestion) = &check.suggestion {
                print_detail(&format!("Suggestion: {suggestion}"));
            }
        }
    }

    println!();
    let passed = report.passed_count();
    let total = report.checks.len();

    if report.failed_count() == 0 {
        print_success(&format!("Environment is ready for flashing ({passed}/{total})"));
    } else if failed_required.is_empty() {
        print_warning(&format!("{passed}/{total} checks passed (optional tools missing)"));
        print_detail("Environment is ready for flashing.");
    } else {
        println!("{} {passed}/{total} checks passed", status::ERROR);
        return Err(anyhow::anyhow!("Environment is not ready for flashing"));
    }

    Ok(())
}
