//! Mesh transport session.
//!
//! A [`MeshSession`] owns the single link into the mesh. It scans for the
//! strongest device, authenticates, and then exposes command writes,
//! request-response reads and per-device notification subscriptions. The
//! background tasks it spawns (heartbeat, notification dispatch, time sync)
//! share one cancellation token, fired by [`MeshSession::disconnect`].

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use plejd_wire::{
    cipher, time_request, time_set, Command, CommandFrame, LinkAddress, NotificationFrame,
    ResponseType, SharedKey, WireError,
};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::handshake;
use crate::keepalive::{self, backoff, is_pong};
use crate::registry::{NotificationCallback, SubscriptionRegistry};
use crate::time_sync::{self, TimeSyncConfig};
use crate::transport::{
    select_strongest, BleTransport, Channel, NotificationStream, TimedTransport, MESH_SERVICE,
};
use crate::SessionError;

/// Configuration for a mesh session
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// How long each scan listens for advertisements
    pub scan_time: Duration,
    /// Consecutive heartbeat failures before a heartbeat timeout
    pub max_retries: u32,
    /// Wait between heartbeat cycles
    pub retry_interval: Duration,
    /// Upper bound on the heartbeat wait after failures
    pub max_backoff: Duration,
    /// Deadline for each transport call
    pub operation_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            scan_time: Duration::from_secs(10),
            max_retries: 10,
            retry_interval: Duration::from_secs(10),
            max_backoff: Duration::from_secs(60),
            operation_timeout: Duration::from_secs(5),
        }
    }
}

/// Lifecycle of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No link
    Disconnected,
    /// Looking for mesh devices
    Scanning,
    /// Link open, not yet authenticated
    LinkEstablished,
    /// Ready for commands
    Authenticated,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Scanning => "scanning",
            ConnectionState::LinkEstablished => "link-established",
            ConnectionState::Authenticated => "authenticated",
        };
        f.write_str(name)
    }
}

/// Events emitted by sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Link authenticated
    Connected {
        /// Address of the device carrying the link
        address: LinkAddress,
    },
    /// A connect attempt failed
    ConnectFailed {
        /// Why the attempt failed
        reason: String,
    },
    /// A heartbeat ping went unanswered
    PingFailed,
    /// The heartbeat gave up on the current link
    HeartbeatTimeout {
        /// Consecutive failures that triggered the timeout
        failures: u32,
    },
    /// Link closed on request
    Disconnected,
    /// Mesh clock was corrected
    TimeUpdated {
        /// Device used to set the clock
        device: u8,
        /// Difference that triggered the update, in seconds
        drift_secs: u64,
    },
}

struct Link {
    state: ConnectionState,
    address: Option<LinkAddress>,
}

struct Tasks {
    cancel: CancellationToken,
    keepalive: Option<JoinHandle<()>>,
    time_sync: Option<JoinHandle<()>>,
}

pub(crate) struct Inner {
    transport: Arc<dyn BleTransport>,
    key: SharedKey,
    config: SessionConfig,
    link: RwLock<Link>,
    /// Serializes multi-step exchanges on the link
    io: tokio::sync::Mutex<()>,
    connecting: tokio::sync::Mutex<()>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Tasks>,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl Inner {
    pub(crate) fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn timed(&self) -> TimedTransport<'_> {
        TimedTransport::new(self.transport.as_ref(), self.config.operation_timeout)
    }

    fn link(&self) -> std::sync::RwLockReadGuard<'_, Link> {
        self.link.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_link(&self, state: ConnectionState, address: Option<LinkAddress>) {
        let mut link = self.link.write().unwrap_or_else(|e| e.into_inner());
        link.state = state;
        link.address = address;
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cancel_token(&self) -> CancellationToken {
        self.tasks().cancel.clone()
    }

    /// Replace a fired cancellation token so a new connect can spawn tasks
    fn rearm(&self) {
        let mut tasks = self.tasks();
        if tasks.cancel.is_cancelled() {
            tasks.cancel = CancellationToken::new();
            for handle in [tasks.keepalive.take(), tasks.time_sync.take()]
                .into_iter()
                .flatten()
            {
                handle.abort();
            }
        }
    }

    fn state(&self) -> ConnectionState {
        self.link().state
    }

    /// Link address if the session is authenticated
    fn authenticated_link(&self) -> Result<LinkAddress, SessionError> {
        let link = self.link();
        match (link.state, link.address) {
            (ConnectionState::Authenticated, Some(address)) => Ok(address),
            _ => Err(SessionError::NotConnected),
        }
    }

    /// Whether the session is authenticated and the transport still has the link
    pub(crate) async fn link_alive(&self) -> bool {
        if self.state() != ConnectionState::Authenticated {
            return false;
        }
        if self.transport.is_connected().await {
            return true;
        }
        warn!("Mesh link lost");
        self.set_link(ConnectionState::Disconnected, None);
        false
    }

    /// Scan, link and authenticate. Never fails; returns whether the session
    /// ended up authenticated.
    pub(crate) async fn establish(&self) -> bool {
        let _connecting = self.connecting.lock().await;
        if self.link_alive().await {
            return true;
        }
        let token = self.cancel_token();

        let address = match self.try_establish().await {
            Ok(address) => address,
            Err(e) => {
                warn!("Failed to connect to mesh: {}", e);
                self.drop_link().await;
                self.emit(SessionEvent::ConnectFailed {
                    reason: e.to_string(),
                });
                return false;
            }
        };

        let cancelled = {
            let mut link = self.link.write().unwrap_or_else(|e| e.into_inner());
            if token.is_cancelled() {
                true
            } else {
                link.state = ConnectionState::Authenticated;
                link.address = Some(address);
                false
            }
        };
        if cancelled {
            debug!("Session cancelled while connecting, dropping link");
            self.drop_link().await;
            return false;
        }
        info!("Authenticated with mesh via {}", address);
        self.emit(SessionEvent::Connected { address });

        if !self.registry.is_empty() {
            if let Err(e) = self.install_dispatcher(address, true).await {
                warn!("Failed to restore notification handler: {}", e);
            }
        }
        true
    }

    async fn try_establish(&self) -> Result<LinkAddress, SessionError> {
        let _io = self.io.lock().await;
        let io = self.timed();

        self.set_link(ConnectionState::Scanning, None);
        debug!("Scanning for mesh devices for {:?}", self.config.scan_time);
        let peers = io.scan(MESH_SERVICE, self.config.scan_time).await?;
        let peer = select_strongest(&peers).ok_or(SessionError::NoDevices)?;
        debug!(
            "Found {} mesh devices, linking to {} ({} dBm)",
            peers.len(),
            peer.id,
            peer.rssi
        );

        let address = io.connect(&peer.id).await?;
        self.set_link(ConnectionState::LinkEstablished, Some(address));
        handshake::authenticate(&io, &self.key).await?;
        Ok(address)
    }

    /// Close the link and forget its address, keeping background tasks alive
    pub(crate) async fn drop_link(&self) {
        self.set_link(ConnectionState::Disconnected, None);
        if let Err(e) = self.timed().disconnect().await {
            debug!("Ignoring disconnect failure: {}", e);
        }
    }

    pub(crate) async fn ping(&self) -> bool {
        if self.authenticated_link().is_err() {
            return false;
        }
        let sent: u8 = rand::random();

        let _io = self.io.lock().await;
        let io = self.timed();
        if let Err(e) = io.write(Channel::Ping, &[sent]).await {
            debug!("Ping write failed: {}", e);
            return false;
        }
        match io.read(Channel::Ping).await {
            Ok(reply) => {
                let ok = is_pong(sent, &reply);
                if !ok {
                    debug!("Ping mismatch: sent {:#04x}, got {:02x?}", sent, reply.as_ref());
                }
                ok
            }
            Err(e) => {
                debug!("Ping read failed: {}", e);
                false
            }
        }
    }

    fn seal(&self, address: &LinkAddress, frame: &CommandFrame) -> Vec<u8> {
        cipher::transform(&self.key, address, &frame.encode())
    }

    async fn write_frame(&self, frame: &CommandFrame) -> Result<(), SessionError> {
        let address = self.authenticated_link()?;
        let sealed = self.seal(&address, frame);
        let _io = self.io.lock().await;
        self.timed().write(Channel::Data, &sealed).await
    }

    /// Open the last-data stream and spawn the dispatcher, replacing a
    /// running one only when `replace` is set
    async fn install_dispatcher(
        &self,
        address: LinkAddress,
        replace: bool,
    ) -> Result<(), SessionError> {
        let mut dispatcher = self.dispatcher.lock().await;
        if let Some(handle) = dispatcher.as_ref() {
            if !replace && !handle.is_finished() {
                return Ok(());
            }
        }
        if let Some(handle) = dispatcher.take() {
            handle.abort();
        }

        let stream = self.timed().notifications(Channel::LastData).await?;
        let handle = tokio::spawn(dispatch_notifications(
            stream,
            self.key.clone(),
            address,
            Arc::clone(&self.registry),
            self.cancel_token(),
        ));
        *dispatcher = Some(handle);
        debug!("Notification handler installed for link {}", address);
        Ok(())
    }
}

async fn dispatch_notifications(
    mut stream: NotificationStream,
    key: SharedKey,
    address: LinkAddress,
    registry: Arc<SubscriptionRegistry>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = stream.next() => match next {
                Some(sealed) => {
                    let frame = Bytes::from(cipher::transform(&key, &address, &sealed));
                    registry.dispatch(frame);
                }
                None => {
                    debug!("Notification stream for {} ended", address);
                    break;
                }
            }
        }
    }
}

/// Handle to the mesh session; clones share the same link
#[derive(Clone)]
pub struct MeshSession {
    inner: Arc<Inner>,
}

impl MeshSession {
    /// Create a disconnected session
    pub fn new(transport: Arc<dyn BleTransport>, key: SharedKey, config: SessionConfig) -> Self {
        Self::build(transport, key, config, None)
    }

    /// Create a disconnected session reporting lifecycle events to `events`
    pub fn with_events(
        transport: Arc<dyn BleTransport>,
        key: SharedKey,
        config: SessionConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self::build(transport, key, config, Some(events))
    }

    fn build(
        transport: Arc<dyn BleTransport>,
        key: SharedKey,
        config: SessionConfig,
        events: Option<mpsc::UnboundedSender<SessionEvent>>,
    ) -> Self {
        let inner = Inner {
            transport,
            key,
            config,
            link: RwLock::new(Link {
                state: ConnectionState::Disconnected,
                address: None,
            }),
            io: tokio::sync::Mutex::new(()),
            connecting: tokio::sync::Mutex::new(()),
            registry: Arc::new(SubscriptionRegistry::new()),
            dispatcher: tokio::sync::Mutex::new(None),
            tasks: Mutex::new(Tasks {
                cancel: CancellationToken::new(),
                keepalive: None,
                time_sync: None,
            }),
            events,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn from_inner(inner: Arc<Inner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Inner {
        &self.inner
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Current link state
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Whether commands can be sent
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Authenticated
    }

    /// Address of the device carrying the link, once authenticated
    pub fn link_address(&self) -> Option<LinkAddress> {
        self.inner.authenticated_link().ok()
    }

    /// Connect to the mesh.
    ///
    /// Returns true right away when the link is up. Otherwise scans,
    /// links to the strongest device and authenticates; any failure yields
    /// false. With `keep_alive`, a successful connect starts the heartbeat
    /// (at most one per session).
    pub async fn connect(&self, keep_alive: bool) -> bool {
        if self.inner.link_alive().await {
            return true;
        }
        self.inner.rearm();
        let connected = self.inner.establish().await;
        if connected && keep_alive {
            self.spawn_keepalive();
        }
        connected
    }

    /// Retry [`MeshSession::connect`] until it succeeds, waiting 1s, 2s, 4s,
    /// ... (capped at `max_delay`) between attempts. Returns false only when
    /// the session is disconnected while waiting.
    pub async fn connect_with_backoff(&self, keep_alive: bool, max_delay: Duration) -> bool {
        let mut attempt = 0u32;
        loop {
            if self.connect(keep_alive).await {
                return true;
            }
            let delay = backoff(Duration::from_secs(1), attempt, max_delay);
            attempt = attempt.saturating_add(1);
            warn!(
                "Mesh connect attempt {} failed, retrying in {:?}",
                attempt, delay
            );

            let cancel = self.inner.cancel_token();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn spawn_keepalive(&self) {
        let mut tasks = self.inner.tasks();
        if tasks.keepalive.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let handle = tokio::spawn(keepalive::heartbeat(
            Arc::downgrade(&self.inner),
            tasks.cancel.clone(),
        ));
        tasks.keepalive = Some(handle);
    }

    /// Check the link with a one-byte echo. Never fails; false on any error
    /// or mismatch.
    pub async fn ping(&self) -> bool {
        self.inner.ping().await
    }

    /// Encrypt and write a command to `address`.
    ///
    /// `hex_data` holds the hex-encoded parameters (`""` for none).
    /// Fails with [`SessionError::NotConnected`] or
    /// [`SessionError::UnsupportedCommand`] before touching the transport.
    pub async fn send_command(
        &self,
        address: u8,
        command: impl Into<u16>,
        hex_data: &str,
        response_type: ResponseType,
    ) -> Result<(), SessionError> {
        let command = command.into();
        self.inner.authenticated_link()?;
        let known = Command::try_from(command).map_err(SessionError::UnsupportedCommand)?;

        let frame = CommandFrame::from_hex(address, known, response_type, hex_data)?;
        debug!(
            "Sending {} to device {} ({})",
            known,
            address,
            if hex_data.is_empty() { "-" } else { hex_data }
        );
        self.inner.write_frame(&frame).await
    }

    /// Route notifications from `address` to `callback`, replacing any
    /// earlier callback for the same address
    pub async fn subscribe(
        &self,
        address: u8,
        callback: NotificationCallback,
    ) -> Result<(), SessionError> {
        let link = self.inner.authenticated_link()?;
        self.inner.registry.register(address, callback);
        self.inner.install_dispatcher(link, false).await
    }

    /// Read and decrypt the data channel
    pub async fn get_last_data(&self) -> Result<Bytes, SessionError> {
        let address = self.inner.authenticated_link()?;
        let _io = self.inner.io.lock().await;
        let sealed = self.inner.timed().read(Channel::Data).await?;
        Ok(Bytes::from(cipher::transform(&self.inner.key, &address, &sealed)))
    }

    /// Ask `device` for the mesh clock
    pub async fn get_mesh_time(&self, device: u8) -> Result<DateTime<Utc>, SessionError> {
        let address = self.inner.authenticated_link()?;
        let request = self.inner.seal(&address, &time_request(device));

        let reply = {
            let _io = self.inner.io.lock().await;
            let io = self.inner.timed();
            io.write(Channel::Data, &request).await?;
            io.read(Channel::Data).await?
        };
        let reply = Bytes::from(cipher::transform(&self.inner.key, &address, &reply));

        let frame = match NotificationFrame::decode(reply) {
            Ok(frame) if frame.is_time_update() => frame,
            Ok(frame) => return Err(SessionError::UnsupportedCommand(frame.command)),
            Err(e) => {
                debug!("Unreadable mesh time reply from device {}: {}", device, e);
                return Err(SessionError::UnsupportedCommand(0));
            }
        };
        let secs = frame.mesh_time()?;
        Utc.timestamp_opt(i64::from(secs), 0)
            .single()
            .ok_or_else(|| WireError::InvalidPayload(format!("mesh time {}", secs)).into())
    }

    /// Set the mesh clock through `device`
    pub async fn set_mesh_time(&self, device: u8, time: DateTime<Utc>) -> Result<(), SessionError> {
        let secs = u32::try_from(time.timestamp()).map_err(|_| {
            WireError::InvalidPayload(format!("{} does not fit the mesh clock", time))
        })?;
        self.inner.write_frame(&time_set(device, secs)).await?;
        debug!("Set mesh time to {}", time);
        Ok(())
    }

    /// Start the periodic time sync over `devices`, replacing a running one
    pub fn start_time_sync(&self, devices: Vec<u8>, config: TimeSyncConfig) {
        let mut tasks = self.inner.tasks();
        if let Some(handle) = tasks.time_sync.take() {
            handle.abort();
        }
        let handle = tokio::spawn(time_sync::run(
            Arc::downgrade(&self.inner),
            devices,
            config,
            tasks.cancel.clone(),
        ));
        tasks.time_sync = Some(handle);
    }

    /// Stop background tasks and close the link
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        self.inner.cancel_token().cancel();
        if let Some(handle) = self.inner.dispatcher.lock().await.take() {
            handle.abort();
        }
        self.inner.set_link(ConnectionState::Disconnected, None);

        let result = self.inner.timed().disconnect().await;
        info!("Disconnected from mesh");
        self.inner.emit(SessionEvent::Disconnected);
        result
    }
}

impl fmt::Debug for MeshSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MeshSession")
            .field("state", &self.state())
            .field("link", &self.link_address())
            .field("subscriptions", &self.inner.registry.len())
            .finish()
    }
}
