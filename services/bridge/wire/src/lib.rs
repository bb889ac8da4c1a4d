//! Wire protocol framing and the keystream cipher for the Plejd mesh.
//!
//! This crate provides the byte-level pieces of the mesh protocol: the
//! 5-byte command header, command and notification frames, and the cipher
//! that protects every frame on the data channels. Nothing here does I/O.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u8 address           | target (cmd) / sender (ntf)|
//! +----------------------+----------------------------+
//! | u16 BE response type | 0x0110 none, 0x0102 answer |
//! +----------------------+----------------------------+
//! | u16 BE command id    | see `Command`              |
//! +----------------------+----------------------------+
//! | params               | variable (0..N)            |
//! +----------------------+----------------------------+
//! ```
//!
//! The whole frame is XORed with the link keystream before it is written and
//! after it is read.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cipher;
pub mod error;
pub mod frame;
pub mod header;

// Re-export main types
pub use cipher::{
    keystream, transform, transform_in_place, LinkAddress, SharedKey, ADDRESS_SIZE, KEY_SIZE,
};
pub use error::WireError;
pub use frame::{
    time_request, time_set, time_update_payload, CommandFrame, NotificationFrame, TIME_OFFSET,
};
pub use header::{Command, ResponseType, HEADER_SIZE};
