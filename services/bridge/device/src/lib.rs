//! Plejd device categories, response decoding and device commands.
//!
//! Site metadata ([`SiteSnapshot`]) names every device with its mesh address
//! and category. Actionable categories map to a [`DeviceKind`] that decodes
//! notifications into [`DeviceState`], and a [`MeshDevice`] binds a device to
//! a [`plejd_session::MeshSession`] for on/off and brightness commands.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod category;
pub mod decoder;
pub mod device;
pub mod error;
pub mod info;

// Re-export main types
pub use category::DeviceCategory;
pub use decoder::{DeviceKind, DeviceState};
pub use device::{brightness_payload, DeviceEvent, MeshDevice};
pub use error::DeviceError;
pub use info::{ButtonInfo, DeviceInfo, SiteSnapshot};
