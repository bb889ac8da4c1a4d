//! In-memory BLE transport for development and testing.
//!
//! Peers, channel reads and failures are scripted up front; every write is
//! recorded so tests can inspect exactly what went over each channel.

use crate::transport::{BleTransport, Channel, DiscoveredPeer, NotificationStream, PeerId};
use crate::SessionError;
use async_trait::async_trait;
use bytes::Bytes;
use plejd_wire::LinkAddress;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;
use uuid::Uuid;

/// How the ping channel answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingMode {
    /// Answer with the last written byte plus one
    Echo,
    /// Answer with a fixed value
    Fixed(Bytes),
}

#[derive(Default)]
struct MemState {
    peers: Vec<(DiscoveredPeer, LinkAddress)>,
    link: Option<LinkAddress>,
    writes: Vec<(Channel, Bytes)>,
    reads: HashMap<Channel, VecDeque<Bytes>>,
    failures: HashMap<Channel, String>,
    stalled: Vec<Channel>,
    challenge: Bytes,
    ping: Option<PingMode>,
    last_ping: Option<u8>,
    subscribers: HashMap<Channel, Vec<mpsc::UnboundedSender<Bytes>>>,
    link_setup: Duration,
    scans: u32,
    connects: u32,
    calls: usize,
}

/// Scriptable in-memory transport
#[derive(Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemState>>,
}

impl MemoryTransport {
    /// Create a transport with no peers, an echoing ping channel and a zero challenge
    pub fn new() -> Self {
        let state = MemState {
            challenge: Bytes::from_static(&[0u8; 16]),
            ping: Some(PingMode::Echo),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a peer that shows up in scans
    pub fn with_peer(self, id: &str, rssi: i16, address: LinkAddress) -> Self {
        self.add_peer(id, rssi, address);
        self
    }

    /// Set the challenge returned by the auth channel
    pub fn with_challenge(self, challenge: Bytes) -> Self {
        self.lock().challenge = challenge;
        self
    }

    /// Add a peer that shows up in scans
    pub fn add_peer(&self, id: &str, rssi: i16, address: LinkAddress) {
        let peer = DiscoveredPeer {
            id: PeerId(id.to_string()),
            rssi,
        };
        self.lock().peers.push((peer, address));
    }

    /// Remove every peer so scans come back empty
    pub fn clear_peers(&self) {
        self.lock().peers.clear();
    }

    /// Queue a value for the next read of `channel`
    pub fn push_read(&self, channel: Channel, data: Bytes) {
        self.lock().reads.entry(channel).or_default().push_back(data);
    }

    /// Make every read and write on `channel` fail
    pub fn fail_channel(&self, channel: Channel, reason: &str) {
        self.lock().failures.insert(channel, reason.to_string());
    }

    /// Undo [`MemoryTransport::fail_channel`]
    pub fn heal_channel(&self, channel: Channel) {
        self.lock().failures.remove(&channel);
    }

    /// Time `connect` takes before the link comes up
    pub fn set_link_setup(&self, delay: Duration) {
        self.lock().link_setup = delay;
    }

    /// Make every read and write on `channel` hang forever
    pub fn stall_channel(&self, channel: Channel) {
        self.lock().stalled.push(channel);
    }

    /// Change how the ping channel answers; `None` answers with nothing
    pub fn set_ping_mode(&self, mode: Option<PingMode>) {
        self.lock().ping = mode;
    }

    /// Drop the link as if the peer went out of range
    pub fn drop_link(&self) {
        let mut state = self.lock();
        state.link = None;
        state.subscribers.clear();
    }

    /// Deliver a notification to every subscriber of `channel`
    pub fn notify(&self, channel: Channel, data: Bytes) -> usize {
        let mut state = self.lock();
        let Some(subscribers) = state.subscribers.get_mut(&channel) else {
            return 0;
        };
        subscribers.retain(|tx| tx.send(data.clone()).is_ok());
        subscribers.len()
    }

    /// Writes to one channel, in order
    pub fn writes_to(&self, channel: Channel) -> Vec<Bytes> {
        self.lock()
            .writes
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, data)| data.clone())
            .collect()
    }

    /// Number of scans performed
    pub fn scan_count(&self) -> u32 {
        self.lock().scans
    }

    /// Number of link attempts
    pub fn connect_count(&self) -> u32 {
        self.lock().connects
    }

    /// Number of reads, writes and subscriptions attempted on any channel
    pub fn channel_calls(&self) -> usize {
        self.lock().calls
    }

    async fn check(&self, channel: Channel) -> Result<(), SessionError> {
        let stalled = {
            let mut state = self.lock();
            state.calls += 1;
            if state.link.is_none() {
                return Err(SessionError::transport("link is down"));
            }
            if let Some(reason) = state.failures.get(&channel) {
                return Err(SessionError::Transport(reason.clone()));
            }
            state.stalled.contains(&channel)
        };
        if stalled {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BleTransport for MemoryTransport {
    async fn scan(
        &self,
        service: Uuid,
        duration: Duration,
    ) -> Result<Vec<DiscoveredPeer>, SessionError> {
        debug!("Memory scan for {} ({:?})", service, duration);
        tokio::time::sleep(duration).await;
        let mut state = self.lock();
        state.scans += 1;
        Ok(state.peers.iter().map(|(peer, _)| peer.clone()).collect())
    }

    async fn connect(&self, peer: &PeerId) -> Result<LinkAddress, SessionError> {
        let setup = {
            let mut state = self.lock();
            state.connects += 1;
            state.link_setup
        };
        if !setup.is_zero() {
            tokio::time::sleep(setup).await;
        }

        let mut state = self.lock();
        let address = state
            .peers
            .iter()
            .find(|(p, _)| &p.id == peer)
            .map(|(_, address)| *address)
            .ok_or_else(|| SessionError::Transport(format!("peer {} not found", peer)))?;
        state.link = Some(address);
        Ok(address)
    }

    async fn is_connected(&self) -> bool {
        self.lock().link.is_some()
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        self.drop_link();
        Ok(())
    }

    async fn write(&self, channel: Channel, data: &[u8]) -> Result<(), SessionError> {
        self.check(channel).await?;
        let mut state = self.lock();
        state.writes.push((channel, Bytes::copy_from_slice(data)));
        if channel == Channel::Ping {
            state.last_ping = data.first().copied();
        }
        Ok(())
    }

    async fn read(&self, channel: Channel) -> Result<Bytes, SessionError> {
        self.check(channel).await?;
        let mut state = self.lock();
        if let Some(data) = state.reads.get_mut(&channel).and_then(|q| q.pop_front()) {
            return Ok(data);
        }
        let data = match channel {
            Channel::Auth => state.challenge.clone(),
            Channel::Ping => match (&state.ping, state.last_ping) {
                (Some(PingMode::Echo), Some(sent)) => Bytes::from(vec![sent.wrapping_add(1)]),
                (Some(PingMode::Fixed(value)), _) => value.clone(),
                _ => Bytes::new(),
            },
            Channel::Data | Channel::LastData => Bytes::new(),
        };
        Ok(data)
    }

    async fn notifications(&self, channel: Channel) -> Result<NotificationStream, SessionError> {
        self.check(channel).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.entry(channel).or_default().push(tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}
