//! BLE link, authentication, keepalive and notification dispatch for the
//! Plejd mesh.
//!
//! This crate owns the single BLE connection into a Plejd mesh and exposes
//! it as a [`MeshSession`]: commands go out encrypted on the data channel,
//! state changes from every device come back on the last-data channel and
//! are routed to per-address callbacks.
//!
//! ## Features
//!
//! - **Transport abstraction**: [`BleTransport`] with an in-memory backend
//!   and a btleplug backend (feature `native`)
//! - **Handshake**: challenge-response proof of the site key
//! - **Heartbeat**: ping echo with bounded retries and exponential backoff
//! - **Subscriptions**: one callback per mesh address, last write wins
//! - **Time sync**: periodic correction of the mesh clock
//!
//! ## Example
//!
//! ```rust,no_run
//! use plejd_session::backend::mem::MemoryTransport;
//! use plejd_session::{MeshSession, SessionConfig};
//! use plejd_wire::{Command, ResponseType, SharedKey};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(MemoryTransport::new());
//! let key = SharedKey::from_hex("00112233-4455-6677-8899-aabbccddeeff")?;
//! let session = MeshSession::new(transport, key, SessionConfig::default());
//!
//! if session.connect(true).await {
//!     session
//!         .subscribe(11, Arc::new(|frame| println!("device 11: {:02x?}", frame.as_ref())))
//!         .await?;
//!     session
//!         .send_command(11, Command::StateChange, "01", ResponseType::NoResponse)
//!         .await?;
//! }
//! session.disconnect().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod handshake;
pub mod keepalive;
pub mod registry;
pub mod session;
pub mod time_sync;
pub mod transport;

// Re-export main types
pub use error::SessionError;
pub use handshake::{challenge_response, CHALLENGE_SIZE};
pub use keepalive::{backoff, is_pong, RetryPolicy};
pub use registry::{NotificationCallback, SubscriptionRegistry};
pub use session::{ConnectionState, MeshSession, SessionConfig, SessionEvent};
pub use time_sync::{reference_time, sync_mesh_time, ClockSource, SyncOutcome, TimeSyncConfig};
pub use transport::{
    select_strongest, BleTransport, Channel, DiscoveredPeer, NotificationStream, PeerId,
    MESH_SERVICE,
};
