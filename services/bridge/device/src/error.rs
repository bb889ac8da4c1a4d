//! Device error taxonomy.

use plejd_session::SessionError;
use plejd_wire::WireError;
use thiserror::Error;

/// Errors raised by device actions and site metadata loading
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The session rejected or failed the command
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The device category has no such action
    #[error("device {device} does not support {action}")]
    Unsupported {
        /// Device name
        device: String,
        /// Requested action
        action: &'static str,
    },

    /// The site snapshot could not be parsed
    #[error("invalid site snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),

    /// The site snapshot could not be read
    #[error("failed to read site snapshot: {0}")]
    Io(#[from] std::io::Error),

    /// The site key is malformed
    #[error(transparent)]
    Wire(#[from] WireError),
}
