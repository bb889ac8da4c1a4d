//! BLE transport abstraction for mesh sessions.
//!
//! The session never talks to a radio directly. It drives a [`BleTransport`],
//! which provides scanning, a single link, and read/write/notify on the four
//! mesh channels. Backends live in [`crate::backend`].

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use plejd_wire::LinkAddress;
use std::fmt;
use std::pin::Pin;
use std::time::Duration;
use tracing::trace;
use uuid::Uuid;

use crate::SessionError;

/// Service advertised by every mesh device
pub const MESH_SERVICE: Uuid = Uuid::from_u128(0x31ba0001_6085_4726_be45_040c957391b5);

/// Mesh GATT channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Encrypted command writes and one-shot reads
    Data,
    /// Encrypted notifications from every device in the mesh
    LastData,
    /// Challenge-response authentication
    Auth,
    /// One-byte liveness echo
    Ping,
}

impl Channel {
    /// All mesh channels
    pub const ALL: [Channel; 4] = [Channel::Data, Channel::LastData, Channel::Auth, Channel::Ping];

    /// Characteristic UUID of the channel
    pub const fn uuid(self) -> Uuid {
        match self {
            Channel::Data => Uuid::from_u128(0x31ba0004_6085_4726_be45_040c957391b5),
            Channel::LastData => Uuid::from_u128(0x31ba0005_6085_4726_be45_040c957391b5),
            Channel::Auth => Uuid::from_u128(0x31ba0009_6085_4726_be45_040c957391b5),
            Channel::Ping => Uuid::from_u128(0x31ba000a_6085_4726_be45_040c957391b5),
        }
    }

    /// Map a characteristic UUID back to its channel
    pub fn from_uuid(uuid: Uuid) -> Result<Self, SessionError> {
        Channel::ALL
            .into_iter()
            .find(|channel| channel.uuid() == uuid)
            .ok_or(SessionError::UnsupportedChannel(uuid))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::Data => "data",
            Channel::LastData => "last-data",
            Channel::Auth => "auth",
            Channel::Ping => "ping",
        };
        f.write_str(name)
    }
}

/// Backend-specific peer handle
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerId(pub String);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peer seen during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    /// Handle used to open a link
    pub id: PeerId,
    /// Received signal strength in dBm
    pub rssi: i16,
}

/// Ordered stream of raw (still encrypted) notification payloads
pub type NotificationStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// BLE capability consumed by the session
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Scan for peers advertising `service` for `duration`, in discovery order
    async fn scan(
        &self,
        service: Uuid,
        duration: Duration,
    ) -> Result<Vec<DiscoveredPeer>, SessionError>;

    /// Open the link to `peer`, returning its link address
    async fn connect(&self, peer: &PeerId) -> Result<LinkAddress, SessionError>;

    /// Whether the link is currently up
    async fn is_connected(&self) -> bool;

    /// Close the link
    async fn disconnect(&self) -> Result<(), SessionError>;

    /// Write to a channel
    async fn write(&self, channel: Channel, data: &[u8]) -> Result<(), SessionError>;

    /// Read the current value of a channel
    async fn read(&self, channel: Channel) -> Result<Bytes, SessionError>;

    /// Enable notifications on a channel
    async fn notifications(&self, channel: Channel) -> Result<NotificationStream, SessionError>;
}

/// Pick the peer with the strongest signal; the first seen wins ties
pub fn select_strongest(peers: &[DiscoveredPeer]) -> Option<&DiscoveredPeer> {
    let mut best: Option<&DiscoveredPeer> = None;
    for peer in peers {
        if best.map_or(true, |b| peer.rssi > b.rssi) {
            best = Some(peer);
        }
    }
    best
}

/// Transport calls bounded by a deadline
pub(crate) struct TimedTransport<'a> {
    transport: &'a dyn BleTransport,
    limit: Duration,
}

impl<'a> TimedTransport<'a> {
    pub(crate) fn new(transport: &'a dyn BleTransport, limit: Duration) -> Self {
        Self { transport, limit }
    }

    pub(crate) async fn write(&self, channel: Channel, data: &[u8]) -> Result<(), SessionError> {
        trace!("write {} bytes to {} channel", data.len(), channel);
        tokio::time::timeout(self.limit, self.transport.write(channel, data))
            .await
            .map_err(|_| SessionError::Timeout(self.limit))?
    }

    pub(crate) async fn read(&self, channel: Channel) -> Result<Bytes, SessionError> {
        let data = tokio::time::timeout(self.limit, self.transport.read(channel))
            .await
            .map_err(|_| SessionError::Timeout(self.limit))??;
        trace!("read {} bytes from {} channel", data.len(), channel);
        Ok(data)
    }

    pub(crate) async fn notifications(
        &self,
        channel: Channel,
    ) -> Result<NotificationStream, SessionError> {
        tokio::time::timeout(self.limit, self.transport.notifications(channel))
            .await
            .map_err(|_| SessionError::Timeout(self.limit))?
    }

    pub(crate) async fn connect(&self, peer: &PeerId) -> Result<LinkAddress, SessionError> {
        tokio::time::timeout(self.limit, self.transport.connect(peer))
            .await
            .map_err(|_| SessionError::Timeout(self.limit))?
    }

    pub(crate) async fn disconnect(&self) -> Result<(), SessionError> {
        tokio::time::timeout(self.limit, self.transport.disconnect())
            .await
            .map_err(|_| SessionError::Timeout(self.limit))?
    }

    /// Scans wait for `duration` on their own, so the deadline is on top of it
    pub(crate) async fn scan(
        &self,
        service: Uuid,
        duration: Duration,
    ) -> Result<Vec<DiscoveredPeer>, SessionError> {
        let limit = duration + self.limit;
        tokio::time::timeout(limit, self.transport.scan(service, duration))
            .await
            .map_err(|_| SessionError::Timeout(limit))?
    }
}
