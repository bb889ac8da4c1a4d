//! BLE transport backends.
//!
//! - [`mem`]: scripted in-memory transport for development and tests
//! - `native`: btleplug radio backend (feature `native`)

pub mod mem;

#[cfg(feature = "native")]
pub mod native;
