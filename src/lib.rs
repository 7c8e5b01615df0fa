//! fieldkit - split keyboard flashing for QMK
//!
//! Builds and flashes one half of a QMK split keyboard, puts the board into
//! its bootloader over raw HID and refuses to flash a half whose firmware is
//! locked to the other side.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Protocol, side arbitration, bootloader and flash logic
//! - [`infra`] - HID, QMK tree, process and host probes
//! - [`config`] - Configuration constants
//! - [`error`] - Error types

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;

#[cfg(test)]
pub mod test_utils;
