//! Infrastructure layer
//!
//! Handles all I/O: HID devices, the QMK tree and CLI, external processes
//! and host probes.

pub mod detect;
pub mod dirs;
pub mod hid;
pub mod interrupt;
pub mod process;
pub mod qmk;
