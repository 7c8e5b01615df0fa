//! hidapi-backed keyboard transport
//!
//! QMK exposes raw HID on its own interface (usage page `0xFF60`, usually
//! interface 1). Writes carry a leading report ID byte that the device
//! never sees, so a 32-byte block goes out as 33 bytes.

use std::ffi::CString;
use std::time::Duration;

use hidapi::{DeviceInfo, HidApi, HidDevice, HidError};
use serde::Serialize;

use crate::config::defaults::{RAW_HID_INTERFACE, RAW_HID_USAGE_PAGE};
use crate::core::protocol::{DeviceSession, Transport, BLOCK_SIZE};
use crate::error::TransportError;

/// Summary of an enumerated HID interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HidDeviceSummary {
    /// Platform device path
    pub path: String,
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
    /// HID usage page
    pub usage_page: u16,
    /// USB interface number, -1 if unknown
    pub interface_number: i32,
    /// Product string, if the device reports one
    pub product: Option<String>,
}

impl From<&DeviceInfo> for HidDeviceSummary {
    fn from(info: &DeviceInfo) -> Self {
        Self {
            path: info.path().to_string_lossy().into_owned(),
            vendor_id: info.vendor_id(),
            product_id: info.product_id(),
            usage_page: info.usage_page(),
            interface_number: info.interface_number(),
            product: info.product_string().map(str::to_string),
        }
    }
}

/// Pick the raw HID interface among the interfaces matching VID/PID
///
/// Prefers `usage_page`, then interface 1, then the first candidate.
pub fn select_interface(
    candidates: &[HidDeviceSummary],
    usage_page: u16,
) -> Option<&HidDeviceSummary> {
    candidates
        .iter()
        .find(|d| d.usage_page == usage_page)
        .or_else(|| candidates.iter().find(|d| d.interface_number == RAW_HID_INTERFACE))
        .or_else(|| candidates.first())
}

fn init_api() -> Result<HidApi, TransportError> {
    HidApi::new().map_err(|e| TransportError::Connect {
        message: format!("failed to initialise HID API: {e}"),
    })
}

/// Transport opening hidapi sessions to a keyboard with a fixed VID/PID
///
/// Every lookup enumerates afresh, so a keyboard that rebooted between two
/// sessions is found again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HidTransport {
    vendor_id: u16,
    product_id: u16,
    usage_page: u16,
}

impl HidTransport {
    /// Transport for `vendor_id`/`product_id`
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            usage_page: RAW_HID_USAGE_PAGE,
        }
    }

    /// Prefer a different usage page when selecting the interface
    #[must_use]
    pub fn with_usage_page(mut self, usage_page: u16) -> Self {
        self.usage_page = usage_page;
        self
    }

    fn candidates_in(&self, api: &HidApi) -> Vec<HidDeviceSummary> {
        api.device_list()
            .filter(|d| d.vendor_id() == self.vendor_id && d.product_id() == self.product_id)
            .map(HidDeviceSummary::from)
            .collect()
    }

    fn select_in(&self, api: &HidApi) -> Result<HidDeviceSummary, TransportError> {
        let candidates = self.candidates_in(api);
        select_interface(&candidates, self.usage_page)
            .cloned()
            .ok_or(TransportError::NotFound {
                vendor_id: self.vendor_id,
                product_id: self.product_id,
            })
    }

    /// Interfaces matching our VID/PID
    pub fn candidates(&self) -> Result<Vec<HidDeviceSummary>, TransportError> {
        Ok(self.candidates_in(&init_api()?))
    }

    /// The interface [`Transport::open`] would use
    pub fn find_device(&self) -> Result<HidDeviceSummary, TransportError> {
        self.select_in(&init_api()?)
    }
}

impl Transport for HidTransport {
    type Session = HidSession;

    fn open(&self) -> Result<HidSession, TransportError> {
        let api = init_api()?;
        let summary = self.select_in(&api)?;
        tracing::debug!(
            "Opening HID device {} (usage page {:#06x}, interface {})",
            summary.path,
            summary.usage_page,
            summary.interface_number
        );

        let path = CString::new(summary.path.clone()).map_err(|e| TransportError::Connect {
            message: e.to_string(),
        })?;
        let device = api.open_path(&path).map_err(|e| TransportError::Connect {
            message: e.to_string(),
        })?;

        Ok(HidSession {
            device,
            path: summary.path,
        })
    }
}

/// One open hidapi handle, closed on drop
pub struct HidSession {
    device: HidDevice,
    path: String,
}

impl DeviceSession for HidSession {
    fn write_frame(&mut self, frame: &[u8; BLOCK_SIZE]) -> Result<(), TransportError> {
        let mut report = [0u8; BLOCK_SIZE + 1];
        report[1..].copy_from_slice(frame);
        self.device.write(&report).map_err(map_hid_error)?;
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let mut buf = [0u8; BLOCK_SIZE];
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let n = self.device.read_timeout(&mut buf, millis).map_err(map_hid_error)?;
        Ok((n > 0).then(|| buf[..n].to_vec()))
    }
}

impl Drop for HidSession {
    fn drop(&mut self) {
        tracing::debug!("Closing HID device {}", self.path);
    }
}

/// Classify a hidapi error
///
/// hidapi reports a vanished device as a generic error whose message varies
/// by platform, so classification goes by message text.
pub fn map_hid_error(err: HidError) -> TransportError {
    match err {
        HidError::IoError { error } => TransportError::Disconnected {
            message: error.to_string(),
        },
        HidError::HidApiError { message } if looks_like_disconnect(&message) => {
            TransportError::Disconnected { message }
        }
        other => TransportError::Io {
            message: other.to_string(),
        },
    }
}

fn looks_like_disconnect(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    ["disconnect", "device", "no such", "pipe", "success"]
        .iter()
        .any(|needle| message.contains(needle))
}

/// How many HID interfaces the backend can see
pub fn device_count() -> Result<usize, TransportError> {
    Ok(init_api()?.device_list().count())
}
