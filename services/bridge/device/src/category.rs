//! Device categories from site metadata.

use plejd_wire::Command;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a device as reported by the site metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceCategory {
    /// Dimmable or on/off light
    Light,
    /// Relay
    Switch,
    /// Sensor, not actionable
    Sensor,
    /// Buttons and remotes that trigger automations
    #[serde(alias = "device_trigger")]
    DeviceAutomation,
    /// Anything else
    #[serde(other)]
    Unknown,
}

impl DeviceCategory {
    /// Whether the bridge can drive or decode this category
    pub fn is_actionable(self) -> bool {
        matches!(
            self,
            DeviceCategory::Light | DeviceCategory::Switch | DeviceCategory::DeviceAutomation
        )
    }

    /// Metadata name of the category
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceCategory::Light => "light",
            DeviceCategory::Switch => "switch",
            DeviceCategory::Sensor => "sensor",
            DeviceCategory::DeviceAutomation => "device_automation",
            DeviceCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DeviceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Commands a light reports
pub const LIGHT_COMMANDS: &[Command] = &[
    Command::StateChange,
    Command::DimChange,
    Command::Dim2Change,
];

/// Commands a switch reports
pub const SWITCH_COMMANDS: &[Command] = &[Command::StateChange];

/// Commands a trigger reports
pub const TRIGGER_COMMANDS: &[Command] = &[
    Command::RemoteClick,
    Command::StateChange,
    Command::DimChange,
    Command::Dim2Change,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_categories() {
        let parse = |s: &str| serde_json::from_str::<DeviceCategory>(s).unwrap();
        assert_eq!(parse("\"light\""), DeviceCategory::Light);
        assert_eq!(parse("\"switch\""), DeviceCategory::Switch);
        assert_eq!(parse("\"sensor\""), DeviceCategory::Sensor);
        assert_eq!(parse("\"device_automation\""), DeviceCategory::DeviceAutomation);
        assert_eq!(parse("\"device_trigger\""), DeviceCategory::DeviceAutomation);
        assert_eq!(parse("\"thermostat\""), DeviceCategory::Unknown);
    }

    #[test]
    fn test_actionable() {
        assert!(DeviceCategory::Light.is_actionable());
        assert!(DeviceCategory::Switch.is_actionable());
        assert!(DeviceCategory::DeviceAutomation.is_actionable());
        assert!(!DeviceCategory::Sensor.is_actionable());
        assert!(!DeviceCategory::Unknown.is_actionable());
    }
}
