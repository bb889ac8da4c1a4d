//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Command payload is not a valid hex string
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Frame is too short to contain the fields being read
    #[error("truncated frame: need {needed} bytes, got {len}")]
    TruncatedFrame {
        /// Length of the frame that was received
        len: usize,
        /// Minimum length required
        needed: usize,
    },

    /// Shared key is not 16 bytes of hex
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Link address is not a 6-byte MAC address
    #[error("invalid link address: {0}")]
    InvalidAddress(String),
}
