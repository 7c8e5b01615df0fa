//! CLI command for `fieldkit info`

use anyhow::Result;

use super::CommandContext;
use crate::cli::output::{is_json, is_quiet, is_verbose};
use crate::core::features::FeatureDescriptor;

fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

/// Human-readable summary lines
pub fn summary_lines(features: &FeatureDescriptor) -> Vec<String> {
    let mut lines = vec![
        format!("Keyboard: {}", features.keyboard),
        format!("Path: {}", features.keyboard_path.display()),
        format!("Bootloader: {}", features.bootloader),
        format!("MCU Family: {}", features.mcu_family),
        format!("Split Keyboard: {}", yes_no(features.split_enabled)),
    ];
    if let Some(protocol) = &features.transport_protocol {
        lines.push(format!("Transport: {protocol}"));
    }
    lines.push(format!("Auto Bootloader: {}", yes_no(features.auto_bootloader)));
    lines.push(format!("Side Lock: {}", yes_no(features.side_lock_enabled)));
    lines
}

/// Execute the info command
pub fn execute(keyboard: Option<&str>) -> Result<()> {
    let ctx = CommandContext::load()?;
    let features = ctx.features(keyboard)?;

    if is_json() {
        println!("{}", serde_json::to_string_pretty(&features)?);
        return Ok(());
    }
    if is_quiet() {
        return Ok(());
    }

    for line in summary_lines(&features) {
        println!("{line}");
    }

    if is_verbose() && !features.rules.is_empty() {
        println!();
        println!("rules.mk:");
        for (key, value) in &features.rules {
            println!("  {key} = {value}");
        }
    }

    Ok(())
}
