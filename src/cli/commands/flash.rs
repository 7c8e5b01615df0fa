//! CLI command for `fieldkit flash`

use std::path::Path;

use anyhow::{bail, Context, Result};

use super::CommandContext;
use crate::cli::output::{
    is_json, is_quiet, print_detail, print_info, print_side_indicator, print_success,
    print_warning, BootloaderSpinner,
};
use crate::core::bootloader::{BootloaderSequencer, WaitPolicy};
use crate::core::doctor::{check_command_available, check_picotool};
use crate::core::features::FeatureDescriptor;
use crate::core::flash::{flash_keyboard, FlashContext, FlashOrchestrator, FlashRequest};
use crate::core::side::{RequestedSide, SideArbiter};
use crate::error::FlashError;
use crate::infra::process::{Echo, SystemRunner};
use crate::infra::{detect, interrupt, qmk};

/// Lines of build output shown when a command fails
const FAILURE_TAIL_LINES: usize = 20;

/// Execute the flash command
pub fn execute(side: Option<RequestedSide>, keyboard: Option<&str>, force: bool) -> Result<()> {
    let ctx = CommandContext::load()?;
    let qmk_binary = ctx.config.qmk_binary().to_string();

    if check_command_available(&qmk_binary).is_none() {
        bail!("qmk command not found. Please install QMK CLI. Run 'fieldkit doctor' for details.");
    }

    let features = ctx.features(keyboard)?;
    let picotool = which::which("picotool").ok();
    for warning in preflight_warnings(std::env::consts::OS, &features, picotool.as_deref()) {
        print_warning(&warning);
    }

    let requested = match side {
        Some(side) => side,
        None if features.side_lock_enabled => RequestedSide::Auto,
        None => bail!("No side specified. Use 'left' or 'right'"),
    };

    print_info(&format!("Flashing {}", features.keyboard));
    if features.side_lock_enabled && !force {
        print_info("Side lock enabled, checking keyboard side...");
    }

    let transport = ctx.transport();
    let arbiter = SideArbiter::new(&transport, ctx.config.request_timeout());

    let cancel = interrupt::install_handler().context("Failed to install Ctrl-C handler")?;
    let probe = match detect::rp2040_probe() {
        Ok(probe) => Some(probe),
        Err(e) => {
            tracing::warn!("{}", e);
            None
        }
    };
    let sequencer = BootloaderSequencer::new(&transport, ctx.config.request_timeout(), probe)
        .with_policy(WaitPolicy {
            timeout: ctx.config.bootloader_wait(),
            poll_interval: ctx.config.poll_interval(),
        })
        .with_cancel_flag(cancel)
        .with_observer(BootloaderSpinner::new());

    let flash_ctx = FlashContext {
        keymap: qmk::current_keymap(&qmk_binary),
        qmk_root: qmk::find_uf2_root(&ctx.cwd),
        qmk_binary,
    };
    let runner = SystemRunner::new().with_echo(echo_target());
    let mut orchestrator = FlashOrchestrator::new(runner, sequencer, flash_ctx);

    let request = FlashRequest {
        side: requested,
        force,
    };
    let result = flash_keyboard(&features, request, &arbiter, &mut orchestrator, |assignment| {
        if let Some(reported) = assignment.reported {
            print_success(&format!("Keyboard side matches: {reported}"));
        }
        print_side_indicator(assignment.resolved);
    });

    let (assignment, report) = match result {
        Ok(done) => done,
        Err(FlashError::ExternalCommand {
            command,
            exit_code,
            output,
        }) => {
            show_output_tail(&output);
            bail!("Command '{command}' failed with exit code {exit_code}");
        }
        Err(e) => return Err(e.into()),
    };

    if is_json() {
        let body = serde_json::json!({
            "status": "success",
            "keyboard": features.keyboard,
            "assignment": assignment,
            "report": report,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    for warning in &report.warnings {
        print_warning(warning);
    }
    print_success(&format!(
        "Flashed the {} side of {}",
        report.side, features.keyboard
    ));
    for command in &report.commands {
        print_detail(command);
    }

    Ok(())
}

/// Non-fatal environment problems, shown before anything runs
fn preflight_warnings(
    host_os: &str,
    features: &FeatureDescriptor,
    picotool: Option<&Path>,
) -> Vec<String> {
    check_picotool(host_os, Some(features), picotool)
        .filter(|check| !check.passed)
        .map(|check| match (check.error, check.suggestion) {
            (Some(error), Some(suggestion)) => format!("{error}. {suggestion}"),
            (error, _) => error.unwrap_or_else(|| format!("{} check failed", check.name)),
        })
        .into_iter()
        .collect()
}

/// QMK output streams live unless `--quiet`; `--json` keeps stdout for the report
fn echo_target() -> Echo {
    if is_quiet() {
        Echo::Silent
    } else if is_json() {
        Echo::Stderr
    } else {
        Echo::Terminal
    }
}

/// Only quiet runs need the tail; otherwise the output was already shown
fn show_output_tail(output: &str) {
    if echo_target() != Echo::Silent {
        return;
    }
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(FAILURE_TAIL_LINES);
    for line in &lines[start..] {
        eprintln!("  {line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::features::KeyboardJson;
    use std::path::PathBuf;

    fn features(json: &str) -> FeatureDescriptor {
        let json = KeyboardJson::from_json(json).unwrap();
        let path = PathBuf::from("keyboards/sweep");
        FeatureDescriptor::from_config("sweep", path, &json, Default::default())
    }

    #[test]
    fn test_missing_picotool_warns_on_macos_rp2040() {
        let rp2040 = features(r#"{"bootloader": "rp2040"}"#);
        let warnings = preflight_warnings("macos", &rp2040, None);
        assert_eq!(
            warnings,
            vec!["picotool not found in PATH. Install with 'brew install picotool'".to_string()]
        );
    }

    #[test]
    fn test_no_picotool_warning_elsewhere() {
        let rp2040 = features(r#"{"bootloader": "rp2040"}"#);
        assert!(preflight_warnings("linux", &rp2040, None).is_empty());
        let caterina = features(r#"{"bootloader": "caterina"}"#);
        assert!(preflight_warnings("macos", &caterina, None).is_empty());
        let found = PathBuf::from("/opt/homebrew/bin/picotool");
        assert!(preflight_warnings("macos", &rp2040, Some(&found)).is_empty());
    }
}
