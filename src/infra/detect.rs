//! Bootloader presence detection
//!
//! An rp2040 in its bootloader enumerates as a USB mass-storage device
//! named `RPI-RP2`.

use std::path::Path;
use std::process::Command;

use crate::config::defaults::RP2040_VOLUME;
use crate::error::SequencerError;

/// Presence check for the rp2040 bootloader on this host
pub fn rp2040_probe() -> Result<Box<dyn FnMut() -> bool>, SequencerError> {
    rp2040_probe_for(std::env::consts::OS)
}

fn rp2040_probe_for(os: &str) -> Result<Box<dyn FnMut() -> bool>, SequencerError> {
    match os {
        "macos" => Ok(Box::new(|| Path::new(RP2040_VOLUME).exists())),
        "linux" => Ok(Box::new(lsusb_shows_rp2040)),
        other => Err(SequencerError::UnsupportedPlatform {
            platform: other.to_string(),
        }),
    }
}

fn lsusb_shows_rp2040() -> bool {
    match Command::new("lsusb").output() {
        Ok(output) => lsusb_lists_rp2040(&String::from_utf8_lossy(&output.stdout)),
        Err(e) => {
            tracing::debug!("lsusb failed: {}", e);
            false
        }
    }
}

/// Whether `lsusb` output lists the rp2040 boot device
pub fn lsusb_lists_rp2040(output: &str) -> bool {
    output.contains("Raspberry Pi") && output.contains("RP2 Boot")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lsusb_lists_rp2040() {
        let listing = "Bus 001 Device 007: ID 2e8a:0003 Raspberry Pi RP2 Boot\n";
        assert!(lsusb_lists_rp2040(listing));
        assert!(!lsusb_lists_rp2040("Bus 001 Device 002: ID feed:0000 Field Kit Sweep\n"));
    }

    #[test]
    fn test_probe_unsupported_platform() {
        let err = rp2040_probe_for("windows").err().unwrap();
        assert_eq!(
            err,
            SequencerError::UnsupportedPlatform {
                platform: "windows".to_string()
            }
        );
        assert!(rp2040_probe_for("linux").is_ok());
        assert!(rp2040_probe_for("macos").is_ok());
    }
}
