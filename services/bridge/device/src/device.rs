//! Device handles bound to a mesh session.

use bytes::Bytes;
use plejd_session::MeshSession;
use plejd_wire::{Command, ResponseType};
use std::sync::Arc;
use tracing::{debug, info};

use crate::decoder::{DeviceKind, DeviceState};
use crate::info::{DeviceInfo, SiteSnapshot};
use crate::DeviceError;

const ON: &str = "01";
const OFF: &str = "00";

/// Decoded notification from one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    /// Mesh address of the device
    pub address: u8,
    /// Decoded state
    pub state: DeviceState,
    /// Full decrypted frame
    pub raw: Bytes,
}

/// Parameters of a dim2 command for `brightness`
pub fn brightness_payload(brightness: u8) -> String {
    let level = u16::from(brightness) << 8 | u16::from(brightness);
    format!("{}{:04X}", ON, level)
}

/// An actionable device and the session that reaches it
#[derive(Debug, Clone)]
pub struct MeshDevice {
    info: DeviceInfo,
    kind: DeviceKind,
    session: MeshSession,
}

impl MeshDevice {
    /// Bind `info` to `session`; `None` when the category is not actionable
    pub fn new(info: DeviceInfo, session: MeshSession) -> Option<Self> {
        let kind = DeviceKind::from_category(info.category)?;
        Some(Self {
            info,
            kind,
            session,
        })
    }

    /// Every actionable device of `site`
    pub fn from_site(site: &SiteSnapshot, session: &MeshSession) -> Vec<Self> {
        site.devices
            .iter()
            .filter_map(|info| {
                let device = Self::new(info.clone(), session.clone());
                if device.is_none() {
                    debug!(
                        "Skipping {} device {}",
                        info.category, info.name
                    );
                }
                device
            })
            .collect()
    }

    /// Device metadata
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Decoding rules
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Mesh address
    pub fn address(&self) -> u8 {
        self.info.ble_address
    }

    fn require(&self, allowed: bool, action: &'static str) -> Result<(), DeviceError> {
        if allowed {
            Ok(())
        } else {
            Err(DeviceError::Unsupported {
                device: self.info.name.clone(),
                action,
            })
        }
    }

    fn switchable(&self) -> bool {
        matches!(self.kind, DeviceKind::Light | DeviceKind::Switch)
    }

    /// Turn the device on
    pub async fn turn_on(&self) -> Result<(), DeviceError> {
        self.require(self.switchable(), "turn on")?;
        debug!("Turning on device {}", self.info.name);
        self.session
            .send_command(
                self.address(),
                Command::StateChange,
                ON,
                ResponseType::NoResponse,
            )
            .await?;
        Ok(())
    }

    /// Turn the device off
    pub async fn turn_off(&self) -> Result<(), DeviceError> {
        self.require(self.switchable(), "turn off")?;
        debug!("Turning off device {}", self.info.name);
        self.session
            .send_command(
                self.address(),
                Command::StateChange,
                OFF,
                ResponseType::NoResponse,
            )
            .await?;
        Ok(())
    }

    /// Set the brightness of a dimmable light
    pub async fn set_brightness(&self, brightness: u8) -> Result<(), DeviceError> {
        self.require(
            self.kind == DeviceKind::Light && self.info.dimmable,
            "brightness",
        )?;
        debug!(
            "Setting brightness of device {} to {}",
            self.info.name, brightness
        );
        self.session
            .send_command(
                self.address(),
                Command::Dim2Change,
                &brightness_payload(brightness),
                ResponseType::NoResponse,
            )
            .await?;
        Ok(())
    }

    /// Decode a decrypted frame from this device
    pub fn decode(&self, raw: Bytes) -> Option<DeviceEvent> {
        let state = self.kind.decode(raw.clone())?;
        Some(DeviceEvent {
            address: self.address(),
            state,
            raw,
        })
    }

    /// Deliver decoded state changes to `callback`; frames that decode to
    /// nothing are dropped
    pub async fn subscribe<F>(&self, callback: F) -> Result<(), DeviceError>
    where
        F: Fn(DeviceEvent) + Send + Sync + 'static,
    {
        // The registry owns this closure, so it must not hold the session
        let kind = self.kind;
        let address = self.address();
        self.session
            .subscribe(
                address,
                Arc::new(move |raw: Bytes| {
                    if let Some(state) = kind.decode(raw.clone()) {
                        callback(DeviceEvent {
                            address,
                            state,
                            raw,
                        });
                    }
                }),
            )
            .await?;
        info!("Subscribed to {} ({})", self.info.name, self.info.category);
        Ok(())
    }
}
