//! Session error taxonomy.

use plejd_wire::WireError;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by mesh session operations and BLE transports
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Operation requires an authenticated link and there is none
    #[error("not connected to the mesh")]
    NotConnected,

    /// Scan finished without seeing any mesh device
    #[error("no mesh devices found")]
    NoDevices,

    /// A transport call exceeded its deadline
    #[error("transport operation timed out after {0:?}")]
    Timeout(Duration),

    /// Radio or link error other than a timeout
    #[error("transport failure: {0}")]
    Transport(String),

    /// Command id not recognized, or unexpected command id in a response
    #[error("unsupported command 0x{0:04x}")]
    UnsupportedCommand(u16),

    /// Characteristic is not one of the mesh channels
    #[error("unsupported channel {0}")]
    UnsupportedChannel(Uuid),

    /// Malformed frame or payload
    #[error(transparent)]
    Wire(#[from] WireError),
}

impl SessionError {
    /// Build a transport failure from any displayable error
    pub fn transport(err: impl ToString) -> Self {
        SessionError::Transport(err.to_string())
    }

    /// Whether the error is a deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, SessionError::Timeout(_))
    }
}
