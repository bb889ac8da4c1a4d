//! Site and device metadata.
//!
//! The site snapshot is the cached JSON blob describing a Plejd site: its
//! crypto key and every device with its mesh address and category.

use plejd_wire::SharedKey;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::category::DeviceCategory;
use crate::DeviceError;

/// A button on a trigger device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonInfo {
    /// Button type, e.g. `DirectionUp`
    #[serde(rename = "type")]
    pub kind: String,
    /// Whether the button rocks both ways
    #[serde(default)]
    pub double_sided: bool,
    /// Input index reported when pressed
    pub input: u8,
}

/// Metadata for one device in the site
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Display name
    pub name: String,
    /// Device id from the site metadata
    pub device_id: String,
    /// Stable identifier for integrations
    pub unique_id: String,
    /// Hardware address of the device
    pub hardware_id: String,
    /// Entity index on the device
    #[serde(default)]
    pub index: u32,
    /// Mesh address used in frame headers
    pub ble_address: u8,
    /// Device category
    pub category: DeviceCategory,
    /// Hardware model
    pub model: String,
    /// Firmware version, if known
    #[serde(default)]
    pub firmware_version: Option<String>,
    /// Whether a light accepts brightness commands
    #[serde(default, alias = "brightness")]
    pub dimmable: bool,
    /// Buttons of a trigger device
    #[serde(default)]
    pub buttons: Vec<ButtonInfo>,
}

/// Everything needed to talk to one site
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteSnapshot {
    /// Site name
    pub name: String,
    /// Site id
    pub site_id: String,
    /// Mesh key, hex with optional dashes
    pub crypto_key: String,
    /// Devices in the site
    #[serde(default)]
    pub devices: Vec<DeviceInfo>,
}

impl SiteSnapshot {
    /// Parse a snapshot from JSON
    pub fn from_json(json: &str) -> Result<Self, DeviceError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a snapshot file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DeviceError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let site = Self::from_json(&json)?;
        debug!(
            "Loaded site {} with {} devices from {}",
            site.name,
            site.devices.len(),
            path.display()
        );
        Ok(site)
    }

    /// Parsed mesh key
    pub fn shared_key(&self) -> Result<SharedKey, DeviceError> {
        Ok(SharedKey::from_hex(&self.crypto_key)?)
    }

    /// Devices the bridge can drive or decode
    pub fn actionable_devices(&self) -> impl Iterator<Item = &DeviceInfo> {
        self.devices.iter().filter(|d| d.category.is_actionable())
    }

    /// Distinct mesh addresses, in site order
    pub fn mesh_addresses(&self) -> Vec<u8> {
        let mut addresses = Vec::new();
        for device in &self.devices {
            if !addresses.contains(&device.ble_address) {
                addresses.push(device.ble_address);
            }
        }
        addresses
    }
}

impl std::fmt::Debug for SiteSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteSnapshot")
            .field("name", &self.name)
            .field("site_id", &self.site_id)
            .field("crypto_key", &"<redacted>")
            .field("devices", &self.devices.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = r#"{
        "name": "Home",
        "site_id": "site-1",
        "crypto_key": "00112233-4455-6677-8899-aabbccddeeff",
        "devices": [
            {
                "name": "Kitchen",
                "device_id": "dev-1",
                "unique_id": "dev-1-0",
                "hardware_id": "AABBCCDDEEFF",
                "index": 0,
                "ble_address": 11,
                "category": "light",
                "model": "DIM-01",
                "firmware_version": "1.2.3",
                "brightness": true
            },
            {
                "name": "Hall remote",
                "device_id": "dev-2",
                "unique_id": "dev-2-0",
                "hardware_id": "112233445566",
                "ble_address": 12,
                "category": "device_automation",
                "model": "WPH-01",
                "buttons": [
                    {"type": "DirectionUp", "double_sided": true, "input": 0},
                    {"type": "DirectionDown", "input": 1}
                ]
            },
            {
                "name": "Motion",
                "device_id": "dev-3",
                "unique_id": "dev-3-0",
                "hardware_id": "665544332211",
                "ble_address": 11,
                "category": "sensor",
                "model": "WMS-01"
            }
        ]
    }"#;

    #[test]
    fn test_parse_site() {
        let site = SiteSnapshot::from_json(SITE).unwrap();
        assert_eq!(site.devices.len(), 3);

        let light = &site.devices[0];
        assert_eq!(light.category, DeviceCategory::Light);
        assert!(light.dimmable);
        assert_eq!(light.firmware_version.as_deref(), Some("1.2.3"));

        let remote = &site.devices[1];
        assert_eq!(remote.buttons.len(), 2);
        assert!(remote.buttons[0].double_sided);
        assert!(!remote.buttons[1].double_sided);
        assert!(!remote.dimmable);

        assert!(site.shared_key().is_ok());
    }

    #[test]
    fn test_actionable_and_addresses() {
        let site = SiteSnapshot::from_json(SITE).unwrap();
        let names: Vec<_> = site.actionable_devices().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["Kitchen", "Hall remote"]);
        assert_eq!(site.mesh_addresses(), vec![11, 12]);
    }

    #[test]
    fn test_bad_snapshot() {
        assert!(matches!(
            SiteSnapshot::from_json("{\"name\": 1}"),
            Err(DeviceError::Snapshot(_))
        ));
    }

    #[test]
    fn test_debug_hides_key() {
        let site = SiteSnapshot::from_json(SITE).unwrap();
        assert!(!format!("{:?}", site).contains("aabbccddeeff"));
    }
}
