//! btleplug radio backend.

use async_trait::async_trait;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use bytes::Bytes;
use futures::StreamExt;
use plejd_wire::LinkAddress;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::transport::{BleTransport, Channel, DiscoveredPeer, NotificationStream, PeerId};
use crate::SessionError;

struct Link {
    peripheral: Peripheral,
    channels: HashMap<Channel, Characteristic>,
}

impl Link {
    fn characteristic(&self, channel: Channel) -> Result<&Characteristic, SessionError> {
        self.channels.get(&channel).ok_or_else(|| {
            SessionError::Transport(format!("{} channel not found on peripheral", channel))
        })
    }
}

/// Transport backed by the host's Bluetooth adapter
pub struct NativeTransport {
    adapter: Adapter,
    link: Mutex<Option<Link>>,
}

impl NativeTransport {
    /// Open the adapter whose info string contains `adapter_name`, or the
    /// first adapter when no name is given
    pub async fn new(adapter_name: Option<&str>) -> Result<Self, SessionError> {
        let manager = Manager::new()
            .await
            .map_err(|err| SessionError::Transport(format!("create BLE manager: {err}")))?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|err| SessionError::Transport(format!("enumerate BLE adapters: {err}")))?;

        let mut selected = None;
        for adapter in adapters {
            let info = adapter
                .adapter_info()
                .await
                .map_err(|err| SessionError::Transport(format!("read adapter info: {err}")))?;
            let matches = adapter_name.map_or(true, |name| {
                info.to_ascii_lowercase().contains(&name.to_ascii_lowercase())
            });
            if matches {
                info!("Using BLE adapter {}", info);
                selected = Some(adapter);
                break;
            }
        }

        let adapter = selected.ok_or_else(|| match adapter_name {
            Some(name) => SessionError::Transport(format!("BLE adapter '{}' not found", name)),
            None => SessionError::transport("no BLE adapters available on host"),
        })?;

        Ok(Self {
            adapter,
            link: Mutex::new(None),
        })
    }

    async fn find_peripheral(&self, peer: &PeerId) -> Result<Peripheral, SessionError> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|err| SessionError::Transport(format!("list peripherals: {err}")))?;
        peripherals
            .into_iter()
            .find(|p| p.id().to_string() == peer.0)
            .ok_or_else(|| SessionError::Transport(format!("peripheral {} not found", peer)))
    }
}

#[async_trait]
impl BleTransport for NativeTransport {
    async fn scan(
        &self,
        service: Uuid,
        duration: Duration,
    ) -> Result<Vec<DiscoveredPeer>, SessionError> {
        self.adapter
            .start_scan(ScanFilter {
                services: vec![service],
            })
            .await
            .map_err(|err| SessionError::Transport(format!("start BLE scan: {err}")))?;
        tokio::time::sleep(duration).await;
        if let Err(err) = self.adapter.stop_scan().await {
            warn!("Failed to stop BLE scan: {}", err);
        }

        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|err| SessionError::Transport(format!("list peripherals: {err}")))?;

        let mut found = Vec::new();
        for peripheral in peripherals {
            let properties = match peripheral.properties().await {
                Ok(Some(properties)) => properties,
                Ok(None) => continue,
                Err(err) => {
                    debug!("Skipping peripheral {}: {}", peripheral.id(), err);
                    continue;
                }
            };
            if !properties.services.contains(&service) {
                continue;
            }
            let Some(rssi) = properties.rssi else {
                continue;
            };
            found.push(DiscoveredPeer {
                id: PeerId(peripheral.id().to_string()),
                rssi,
            });
        }
        debug!("Scan found {} mesh peripherals", found.len());
        Ok(found)
    }

    async fn connect(&self, peer: &PeerId) -> Result<LinkAddress, SessionError> {
        let peripheral = self.find_peripheral(peer).await?;
        peripheral
            .connect()
            .await
            .map_err(|err| SessionError::Transport(format!("connect peripheral: {err}")))?;
        peripheral
            .discover_services()
            .await
            .map_err(|err| SessionError::Transport(format!("discover GATT services: {err}")))?;

        let mut channels = HashMap::new();
        for characteristic in peripheral.characteristics() {
            if let Ok(channel) = Channel::from_uuid(characteristic.uuid) {
                channels.insert(channel, characteristic);
            }
        }
        if let Some(missing) = Channel::ALL.into_iter().find(|c| !channels.contains_key(c)) {
            let _ = peripheral.disconnect().await;
            return Err(SessionError::Transport(format!(
                "{} channel not found on peripheral",
                missing
            )));
        }

        let address = LinkAddress::new(peripheral.address().into_inner());
        *self.link.lock().await = Some(Link {
            peripheral,
            channels,
        });
        Ok(address)
    }

    async fn is_connected(&self) -> bool {
        let link = self.link.lock().await;
        match link.as_ref() {
            Some(link) => link.peripheral.is_connected().await.unwrap_or(false),
            None => false,
        }
    }

    async fn disconnect(&self) -> Result<(), SessionError> {
        let Some(link) = self.link.lock().await.take() else {
            return Ok(());
        };
        link.peripheral
            .disconnect()
            .await
            .map_err(|err| SessionError::Transport(format!("disconnect peripheral: {err}")))
    }

    async fn write(&self, channel: Channel, data: &[u8]) -> Result<(), SessionError> {
        let link = self.link.lock().await;
        let link = link.as_ref().ok_or(SessionError::NotConnected)?;
        link.peripheral
            .write(link.characteristic(channel)?, data, WriteType::WithResponse)
            .await
            .map_err(|err| SessionError::Transport(format!("write {} channel: {err}", channel)))
    }

    async fn read(&self, channel: Channel) -> Result<Bytes, SessionError> {
        let link = self.link.lock().await;
        let link = link.as_ref().ok_or(SessionError::NotConnected)?;
        link.peripheral
            .read(link.characteristic(channel)?)
            .await
            .map(Bytes::from)
            .map_err(|err| SessionError::Transport(format!("read {} channel: {err}", channel)))
    }

    async fn notifications(&self, channel: Channel) -> Result<NotificationStream, SessionError> {
        let link = self.link.lock().await;
        let link = link.as_ref().ok_or(SessionError::NotConnected)?;
        let characteristic = link.characteristic(channel)?;

        let stream = link.peripheral.notifications().await.map_err(|err| {
            SessionError::Transport(format!("open notification stream: {err}"))
        })?;
        link.peripheral.subscribe(characteristic).await.map_err(|err| {
            SessionError::Transport(format!("subscribe to {} channel: {err}", channel))
        })?;

        let uuid = characteristic.uuid;
        let filtered = stream.filter_map(move |notification| async move {
            (notification.uuid == uuid).then(|| Bytes::from(notification.value))
        });
        Ok(Box::pin(filtered))
    }
}
