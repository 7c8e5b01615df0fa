//! Typed request helpers on top of a device session

use std::time::Duration;

use super::protocol::{exchange, Command, DeviceSession, InfoFields, Response};
use crate::error::TransportError;

/// A short-lived client owning one device session
///
/// The session is closed when the client is dropped.
pub struct DeviceClient<S: DeviceSession> {
    session: S,
    timeout: Duration,
}

impl<S: DeviceSession> DeviceClient<S> {
    /// Wrap an open session
    pub fn new(session: S, timeout: Duration) -> Self {
        Self { session, timeout }
    }

    /// Send `STATUS` and report whether the firmware answered positively
    pub fn ping(&mut self) -> Result<bool, TransportError> {
        let response = self.request(Command::Status)?;
        Ok(response.success())
    }

    /// Query `FIRMWARE_INFO`
    pub fn firmware_info(&mut self) -> Result<InfoFields, TransportError> {
        self.info(Command::FirmwareInfo)
    }

    /// Query `SIDE_INFO`
    pub fn side_info(&mut self) -> Result<InfoFields, TransportError> {
        self.info(Command::SideInfo)
    }

    /// Send `BOOTLOADER`
    ///
    /// A disconnect while the device reboots comes back as a
    /// `BOOTLOADER_TRIGGERED` response.
    pub fn trigger_bootloader(&mut self) -> Result<Response, TransportError> {
        self.request(Command::Bootloader)
    }

    fn request(&mut self, command: Command) -> Result<Response, TransportError> {
        exchange(&mut self.session, command, self.timeout).map(|outcome| outcome.into_response())
    }

    fn info(&mut self, command: Command) -> Result<InfoFields, TransportError> {
        let response = self.request(command)?;
        if !response.success() {
            return Err(TransportError::Rejected {
                command: command.to_string(),
                message: response.message,
            });
        }
        Ok(response.fields())
    }
}
