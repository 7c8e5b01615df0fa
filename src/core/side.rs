//! Side arbitration for split keyboards
//!
//! Decides which physical half is being flashed. When the firmware has side
//! lock enabled, the side persisted on the device always wins over what was
//! requested unless the caller forces it; a disagreement aborts.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::device::DeviceClient;
use super::features::FeatureDescriptor;
use super::protocol::Transport;
use crate::error::{SideError, TransportError};

/// A physical half of the keyboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Left half
    Left,
    /// Right half
    Right,
}

impl Side {
    /// Lowercase name as used by QMK bootloader targets
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    /// Uppercase name as used in compile-time defines
    pub fn define_suffix(self) -> &'static str {
        match self {
            Side::Left => "LEFT",
            Side::Right => "RIGHT",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The side the user asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestedSide {
    /// Left half
    Left,
    /// Right half
    Right,
    /// Whatever the device reports
    Auto,
}

impl RequestedSide {
    /// The concrete side, if one was named
    pub fn side(self) -> Option<Side> {
        match self {
            RequestedSide::Left => Some(Side::Left),
            RequestedSide::Right => Some(Side::Right),
            RequestedSide::Auto => None,
        }
    }
}

impl From<Side> for RequestedSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Left => RequestedSide::Left,
            Side::Right => RequestedSide::Right,
        }
    }
}

impl fmt::Display for RequestedSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestedSide::Left => "left",
            RequestedSide::Right => "right",
            RequestedSide::Auto => "auto",
        };
        f.write_str(name)
    }
}

/// Error parsing a side name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid side '{0}'. Must be 'left', 'right' or 'auto'")]
pub struct ParseSideError(String);

impl FromStr for RequestedSide {
    type Err = ParseSideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(RequestedSide::Left),
            "right" => Ok(RequestedSide::Right),
            "auto" => Ok(RequestedSide::Auto),
            other => Err(ParseSideError(other.to_string())),
        }
    }
}

/// The outcome of side arbitration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SideAssignment {
    /// What the user asked for
    pub requested: RequestedSide,
    /// What the device reported, if it was asked
    pub reported: Option<Side>,
    /// Whether the lock check was bypassed
    pub forced: bool,
    /// The side that will be flashed
    pub resolved: Side,
}

/// Resolves the side to flash, querying the device when side lock demands it
pub struct SideArbiter<'a, T: Transport> {
    transport: &'a T,
    timeout: Duration,
}

impl<'a, T: Transport> SideArbiter<'a, T> {
    /// Create an arbiter talking through `transport`
    pub fn new(transport: &'a T, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    /// Resolve `requested` against the keyboard's features and, if locked,
    /// the side the device reports
    pub fn resolve(
        &self,
        requested: RequestedSide,
        forced: bool,
        features: &FeatureDescriptor,
    ) -> Result<SideAssignment, SideError> {
        if !features.side_lock_enabled || forced {
            if forced && features.side_lock_enabled {
                tracing::warn!(
                    "Force flag set, bypassing side lock and flashing '{}' \
                     regardless of device configuration",
                    requested
                );
            }
            let resolved = requested
                .side()
                .ok_or(SideError::AutoWithoutLock { requested })?;
            return Ok(SideAssignment {
                requested,
                reported: None,
                forced,
                resolved,
            });
        }

        tracing::info!("Side lock is enabled, querying keyboard for its side");
        let reported = self.query_reported_side()?;
        tracing::info!("Keyboard reports side: {}", reported);

        match requested.side() {
            Some(side) if side != reported => Err(SideError::SideMismatch {
                requested: side,
                reported,
            }),
            _ => Ok(SideAssignment {
                requested,
                reported: Some(reported),
                forced,
                resolved: reported,
            }),
        }
    }

    fn query_reported_side(&self) -> Result<Side, SideError> {
        let session = self.transport.open().map_err(|err| {
            if err.is_connection_failure() {
                SideError::NoDeviceConnection {
                    reason: err.to_string(),
                }
            } else {
                SideError::Transport(err)
            }
        })?;

        // The client is a temporary: the session is closed by the end of this
        // statement, before the reply is inspected.
        let fields = DeviceClient::new(session, self.timeout).side_info();

        let fields = match fields {
            Ok(fields) => fields,
            Err(TransportError::Rejected { .. }) => {
                return Err(SideError::UnknownSide { value: None });
            }
            Err(err) => return Err(SideError::Transport(err)),
        };

        match fields.get("SIDE") {
            Some("left") => Ok(Side::Left),
            Some("right") => Ok(Side::Right),
            other => Err(SideError::UnknownSide {
                value: other.map(ToString::to_string),
            }),
        }
    }
}
