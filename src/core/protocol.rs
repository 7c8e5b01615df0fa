//! Field Kit wire protocol
//!
//! Every exchange with the keyboard is a fixed 32-byte raw HID block.
//!
//! Request layout:
//!
//! ```text
//! [0x82, 0x9E] ++ ASCII command ++ [0x03] ++ zero padding
//! ```
//!
//! Response layout:
//!
//! ```text
//! [status] ++ UTF-8 message ++ zero padding
//! ```
//!
//! Messages are `|`-delimited `KEY=VALUE` fields. Payloads that do not fit
//! in the block are truncated, never rejected.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use crate::error::TransportError;

/// Size of one raw HID block
pub const BLOCK_SIZE: usize = 32;

/// Leading bytes that route a report to the Field Kit handler in firmware
pub const PROTOCOL_ID: [u8; 2] = [0x82, 0x9E];

/// End-of-text marker closing a command
pub const TERMINATOR: u8 = 0x03;

/// Longest command that still fits together with its terminator
pub const MAX_COMMAND_LEN: usize = BLOCK_SIZE - PROTOCOL_ID.len() - 1;

/// Longest message a response block can carry
pub const MAX_MESSAGE_LEN: usize = BLOCK_SIZE - 1;

/// Interval of the individual reads making up one response wait
pub const SUB_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Response status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Command failed or was not recognised
    Error = 0,
    /// Command succeeded
    Ok = 1,
    /// Device is about to reboot into its bootloader
    BootloaderTriggered = 2,
    /// Response carries information fields
    Info = 3,
}

impl StatusCode {
    /// Decode a status byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(StatusCode::Error),
            1 => Some(StatusCode::Ok),
            2 => Some(StatusCode::BootloaderTriggered),
            3 => Some(StatusCode::Info),
            _ => None,
        }
    }

    /// Encode as a status byte
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Error => "ERROR",
            StatusCode::Ok => "OK",
            StatusCode::BootloaderTriggered => "BOOTLOADER_TRIGGERED",
            StatusCode::Info => "INFO",
        };
        f.write_str(name)
    }
}

/// Commands understood by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Liveness probe
    Status,
    /// Reboot into the bootloader
    Bootloader,
    /// Firmware build information
    FirmwareInfo,
    /// Persisted side identity
    SideInfo,
}

impl Command {
    /// The ASCII command word sent on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Status => "STATUS",
            Command::Bootloader => "BOOTLOADER",
            Command::FirmwareInfo => "FIRMWARE_INFO",
            Command::SideInfo => "SIDE_INFO",
        }
    }

    /// Whether the device legitimately vanishes while handling this command
    pub fn expects_disconnect(self) -> bool {
        matches!(self, Command::Bootloader)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded response block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status byte
    pub status: StatusCode,
    /// Zero-trimmed message text
    pub message: String,
}

impl Response {
    /// Create a response
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Whether the status signals success
    pub fn success(&self) -> bool {
        matches!(
            self.status,
            StatusCode::Ok | StatusCode::BootloaderTriggered | StatusCode::Info
        )
    }

    /// Parse the message as `KEY=VALUE` fields
    pub fn fields(&self) -> InfoFields {
        InfoFields::parse(&self.message)
    }
}

/// `KEY=VALUE` fields of an information response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InfoFields(BTreeMap<String, String>);

impl InfoFields {
    /// Parse a `|`-delimited message; segments without `=` are ignored
    pub fn parse(message: &str) -> Self {
        let fields = message
            .split('|')
            .filter_map(|part| part.split_once('='))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Self(fields)
    }

    /// Look up a field
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Iterate fields in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no fields were present
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Build a request block for `command`
///
/// Commands longer than [`MAX_COMMAND_LEN`] lose their tail and, past that,
/// their terminator.
pub fn encode_request(command: &str) -> [u8; BLOCK_SIZE] {
    let mut frame = [0u8; BLOCK_SIZE];
    let payload = PROTOCOL_ID
        .iter()
        .copied()
        .chain(command.bytes())
        .chain(std::iter::once(TERMINATOR));

    for (slot, byte) in frame.iter_mut().zip(payload) {
        *slot = byte;
    }

    if command.len() > MAX_COMMAND_LEN {
        tracing::debug!(
            "Command '{}' is {} bytes, truncated to fit a {}-byte block",
            command,
            command.len(),
            BLOCK_SIZE
        );
    }

    frame
}

/// Build a response block, as the firmware does
///
/// The message is cut at the last character boundary that fits.
pub fn encode_response(status: StatusCode, message: &str) -> [u8; BLOCK_SIZE] {
    let mut frame = [0u8; BLOCK_SIZE];
    frame[0] = status.as_byte();

    let text = truncate_to_boundary(message, MAX_MESSAGE_LEN);
    frame[1..=text.len()].copy_from_slice(text.as_bytes());
    frame
}

/// Decode a response block
///
/// Bytes beyond [`BLOCK_SIZE`] are ignored.
pub fn decode_response(frame: &[u8]) -> Result<Response, TransportError> {
    let frame = &frame[..frame.len().min(BLOCK_SIZE)];

    let (&status_byte, body) = frame.split_first().ok_or_else(|| TransportError::Protocol {
        message: "empty response frame".to_string(),
    })?;

    let status = StatusCode::from_byte(status_byte).ok_or_else(|| TransportError::Protocol {
        message: format!("unknown status code {status_byte:#04x}"),
    })?;

    let end = body.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    let message = String::from_utf8_lossy(&body[..end]).into_owned();

    Ok(Response { status, message })
}

fn truncate_to_boundary(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut end = max_len;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// An open, exclusively owned connection to the keyboard
///
/// Dropping the session closes the underlying handle.
pub trait DeviceSession {
    /// Send one request block
    fn write_frame(&mut self, frame: &[u8; BLOCK_SIZE]) -> Result<(), TransportError>;

    /// Read one block, or `None` if nothing arrived within `timeout`
    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;
}

/// Something that can open device sessions
pub trait Transport {
    /// Session type produced by [`Transport::open`]
    type Session: DeviceSession;

    /// Locate the keyboard and open a fresh session
    fn open(&self) -> Result<Self::Session, TransportError>;
}

/// Result of a single request/response exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The device answered
    Reply(Response),
    /// The device dropped off the bus on a command that reboots it
    ExpectedDisconnect,
}

impl Outcome {
    /// Collapse into a response, treating a reboot disconnect as triggered
    pub fn into_response(self) -> Response {
        match self {
            Outcome::Reply(response) => response,
            Outcome::ExpectedDisconnect => Response::new(
                StatusCode::BootloaderTriggered,
                "Device entering bootloader",
            ),
        }
    }
}

/// Send `command` and wait up to `timeout` for the response block
///
/// The first non-empty block wins. Disconnects are only reinterpreted for
/// commands that [expect one](Command::expects_disconnect).
pub fn exchange<S>(
    session: &mut S,
    command: Command,
    timeout: Duration,
) -> Result<Outcome, TransportError>
where
    S: DeviceSession + ?Sized,
{
    let tolerate = |err: TransportError| {
        if command.expects_disconnect() && err.is_disconnect() {
            tracing::debug!("{} caused a disconnect, treating as triggered: {}", command, err);
            Ok(Outcome::ExpectedDisconnect)
        } else {
            Err(err)
        }
    };

    let frame = encode_request(command.as_str());
    tracing::debug!("-> {}", command);
    if let Err(err) = session.write_frame(&frame) {
        return tolerate(err);
    }

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(TransportError::Timeout {
                command: command.to_string(),
                timeout_ms: timeout.as_millis(),
            });
        }

        match session.read_frame(remaining.min(SUB_READ_TIMEOUT)) {
            Ok(Some(block)) if !block.is_empty() => {
                let response = decode_response(&block)?;
                tracing::debug!("<- {} {}", response.status, response.message);
                return Ok(Outcome::Reply(response));
            }
            Ok(_) => {}
            Err(err) => return tolerate(err),
        }
    }
}
