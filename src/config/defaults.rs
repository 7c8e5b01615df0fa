//! Default configuration values

use std::time::Duration;

/// Default USB vendor ID of a Field Kit keyboard
pub const DEFAULT_VENDOR_ID: u16 = 0xFEED;

/// Default USB product ID of a Field Kit keyboard
pub const DEFAULT_PRODUCT_ID: u16 = 0x0000;

/// Usage page of the QMK raw HID interface
pub const RAW_HID_USAGE_PAGE: u16 = 0xFF60;

/// Interface number the raw HID endpoint usually sits on
pub const RAW_HID_INTERFACE: i32 = 1;

/// Overall deadline for one request/response exchange
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to wait for an rp2040 to show up in its bootloader
pub const BOOTLOADER_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between bootloader presence checks
pub const BOOTLOADER_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Mount point of the rp2040 mass-storage bootloader on macOS
pub const RP2040_VOLUME: &str = "/Volumes/RPI-RP2";

/// Default `qmk` executable
pub const DEFAULT_QMK_BINARY: &str = "qmk";

/// Keymap used when `qmk config user.keymap` is unset
pub const DEFAULT_KEYMAP: &str = "default";

/// Minimum proptest iterations
pub const MIN_PROPTEST_ITERATIONS: u32 = 100;
