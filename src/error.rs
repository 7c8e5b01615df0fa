//! Error types for fieldkit
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use thiserror::Error;

use crate::core::side::{RequestedSide, Side};

/// Device transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No matching HID device is attached
    #[error("Keyboard not found (VID: {vendor_id:#06x}, PID: {product_id:#06x})")]
    NotFound { vendor_id: u16, product_id: u16 },

    /// The device exists but could not be opened
    #[error("Failed to connect to keyboard: {message}")]
    Connect { message: String },

    /// No frame arrived before the request deadline
    #[error("Timed out after {timeout_ms}ms waiting for a response to {command}")]
    Timeout { command: String, timeout_ms: u128 },

    /// The device answered with something we cannot interpret
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// The device answered with an ERROR status
    #[error("Keyboard rejected {command}: {message}")]
    Rejected { command: String, message: String },

    /// The device went away mid-transaction
    #[error("Keyboard disconnected: {message}")]
    Disconnected { message: String },

    /// Any other read/write failure on an open handle
    #[error("HID I/O error: {message}")]
    Io { message: String },
}

impl TransportError {
    /// Whether this error means the device dropped off the bus
    pub fn is_disconnect(&self) -> bool {
        matches!(self, TransportError::Disconnected { .. })
    }

    /// Whether this error means no session could be established at all
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            TransportError::NotFound { .. } | TransportError::Connect { .. }
        )
    }
}

/// Side resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SideError {
    /// Side lock needs the device but it could not be reached
    #[error(
        "Side lock requires a HID connection to query the keyboard side ({reason}).\n\
         Either flash with an explicit side and --force for initial setup, \
         or remove SIDE_LOCK_ENABLE from rules.mk"
    )]
    NoDeviceConnection { reason: String },

    /// The device did not report a usable side
    #[error("{}", unknown_side_message(.value.as_deref()))]
    UnknownSide { value: Option<String> },

    /// The device is locked to the other side
    #[error(
        "SIDE LOCK: you requested '{requested}' but the keyboard is configured as '{reported}'.\n\
         To flash the {requested} side anyway, re-run with --force: fieldkit flash {requested} --force\n\
         To flash the configured side: fieldkit flash {reported}"
    )]
    SideMismatch { requested: Side, reported: Side },

    /// `auto` can only be resolved by asking a side-locked device
    #[error("Cannot resolve side '{requested}' without querying a side-locked keyboard. Specify 'left' or 'right'")]
    AutoWithoutLock { requested: RequestedSide },

    /// Unexpected transport failure while querying the side
    #[error("Error querying keyboard side: {0}")]
    Transport(#[from] TransportError),
}

fn unknown_side_message(value: Option<&str>) -> String {
    match value {
        Some(value) => format!("Keyboard reported invalid side: '{value}'"),
        None => "Keyboard did not report its side. This may be an unflashed keyboard or \
                 firmware without side support; flash with an explicit side and --force"
            .to_string(),
    }
}

/// Bootloader sequencing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SequencerError {
    /// No automated bootloader detection for this host
    #[error("Bootloader detection is not implemented for {platform}")]
    UnsupportedPlatform { platform: String },

    /// The user interrupted the wait
    #[error("Operation cancelled by user")]
    Interrupted,
}

/// Feature detection errors
#[derive(Error, Debug)]
pub enum FeatureError {
    /// `qmk config user.keyboard` gave nothing usable
    #[error("Could not determine current keyboard from qmk config. Use --keyboard or 'qmk config user.keyboard=<name>'")]
    KeyboardNotSelected,

    /// Failed to read a keyboard config file
    #[error("Failed to read '{path}': {error}")]
    Read { path: PathBuf, error: String },

    /// keyboard.json is not valid JSON
    #[error("Failed to parse '{path}': {error}")]
    Parse { path: PathBuf, error: String },
}

/// Flash sequencing errors
#[derive(Error, Debug)]
pub enum FlashError {
    /// Side arbitration aborted the flash
    #[error(transparent)]
    Side(#[from] SideError),

    /// Missing or inconsistent feature data
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// A build or deploy step exited non-zero
    #[error("Command '{command}' failed with exit code {exit_code}")]
    ExternalCommand {
        command: String,
        exit_code: i32,
        output: String,
    },

    /// A build or deploy step could not be started
    #[error("Failed to run '{command}': {error}")]
    Spawn { command: String, error: String },

    /// Bootloader sequencing aborted the flash
    #[error(transparent)]
    Sequencer(#[from] SequencerError),
}
