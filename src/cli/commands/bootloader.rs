//! CLI command for `fieldkit bootloader`

use anyhow::{Context, Result};

use super::CommandContext;
use crate::cli::output::{is_json, print_info, print_success, print_warning, BootloaderSpinner};
use crate::core::bootloader::{BootloaderSequencer, SequenceOutcome, WaitPolicy};
use crate::core::features::McuFamily;
use crate::infra::{detect, interrupt};

/// Execute the bootloader command
pub fn execute(keyboard: Option<&str>) -> Result<()> {
    let ctx = CommandContext::load()?;
    let features = ctx.features(keyboard)?;

    if features.mcu_family == McuFamily::Unknown {
        print_warning("Unknown MCU family, cannot enter bootloader automatically");
        print_info("Please enter bootloader mode manually");
        return Ok(());
    }

    print_info(&format!("Entering bootloader mode for {}...", features.mcu_family));

    let transport = ctx.transport();
    let cancel = interrupt::install_handler().context("Failed to install Ctrl-C handler")?;
    let probe = detect::rp2040_probe().map_err(|e| tracing::warn!("{}", e)).ok();
    let mut sequencer = BootloaderSequencer::new(&transport, ctx.config.request_timeout(), probe)
        .with_policy(WaitPolicy {
            timeout: ctx.config.bootloader_wait(),
            poll_interval: ctx.config.poll_interval(),
        })
        .with_cancel_flag(cancel)
        .with_observer(BootloaderSpinner::new());

    let outcome = sequencer.run(features.mcu_family)?;

    if is_json() {
        let body = serde_json::json!({
            "status": "success",
            "mcu_family": features.mcu_family,
            "outcome": outcome,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    match outcome {
        SequenceOutcome::Ready {
            manual_action_required: false,
        } => print_success("Bootloader mode entered successfully"),
        SequenceOutcome::Ready {
            manual_action_required: true,
        } => {
            print_warning(
                "Put the keyboard into bootloader mode manually (press its reset button)",
            );
        }
        SequenceOutcome::TimedOut { waited } => {
            print_warning(&format!(
                "Bootloader device not detected after {}s",
                waited.as_secs()
            ));
        }
    }

    Ok(())
}
