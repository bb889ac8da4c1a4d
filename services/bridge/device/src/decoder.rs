//! Device response decoding.
//!
//! Notifications carry the full decrypted frame. Offsets below are into that
//! raw frame: the header occupies bytes 0..5 and parameters start at 5.
//!
//! | Kind    | Commands                              | Fields                          |
//! |---------|---------------------------------------|---------------------------------|
//! | Light   | state, dim, dim2                      | on = raw[5] != 0, level = raw[7]|
//! | Switch  | state                                 | on = raw[5] != 0                |
//! | Trigger | remote-click, state, dim, dim2        | input = raw[6], needs 8 bytes   |
//!
//! Time updates and commands outside a kind's set decode to `None`.

use bytes::Bytes;
use plejd_wire::{Command, NotificationFrame, HEADER_SIZE};
use tracing::debug;

use crate::category::{DeviceCategory, LIGHT_COMMANDS, SWITCH_COMMANDS, TRIGGER_COMMANDS};

const STATE_OFFSET: usize = HEADER_SIZE;
const INPUT_OFFSET: usize = HEADER_SIZE + 1;
const BRIGHTNESS_OFFSET: usize = HEADER_SIZE + 2;
const TRIGGER_MIN_LEN: usize = 8;

/// Decoding rules, chosen from the device category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// On/off plus brightness
    Light,
    /// On/off only
    Switch,
    /// Button input index
    Trigger,
}

/// State reported by one notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Light state
    Light {
        /// Whether the light is on
        on: bool,
        /// Brightness 0-255
        brightness: u8,
    },
    /// Switch state
    Switch {
        /// Whether the relay is closed
        on: bool,
    },
    /// Button press
    Trigger {
        /// Index of the pressed input
        input: u8,
    },
}

impl DeviceKind {
    /// Decoding rules for `category`, `None` when it is not actionable
    pub fn from_category(category: DeviceCategory) -> Option<Self> {
        match category {
            DeviceCategory::Light => Some(DeviceKind::Light),
            DeviceCategory::Switch => Some(DeviceKind::Switch),
            DeviceCategory::DeviceAutomation => Some(DeviceKind::Trigger),
            DeviceCategory::Sensor | DeviceCategory::Unknown => None,
        }
    }

    /// Commands this kind reacts to
    pub fn supported_commands(self) -> &'static [Command] {
        match self {
            DeviceKind::Light => LIGHT_COMMANDS,
            DeviceKind::Switch => SWITCH_COMMANDS,
            DeviceKind::Trigger => TRIGGER_COMMANDS,
        }
    }

    /// Whether `command` is one this kind reacts to
    pub fn supports(self, command: u16) -> bool {
        self.supported_commands().iter().any(|c| c.id() == command)
    }

    /// Decode a full decrypted frame
    pub fn decode(self, raw: Bytes) -> Option<DeviceState> {
        match NotificationFrame::decode(raw) {
            Ok(frame) => self.decode_frame(&frame),
            Err(e) => {
                debug!("Ignoring malformed notification: {}", e);
                None
            }
        }
    }

    /// Decode an already parsed frame
    pub fn decode_frame(self, frame: &NotificationFrame) -> Option<DeviceState> {
        if frame.is_time_update() {
            debug!("Ignoring time update in {:?}", self);
            return None;
        }
        if !self.supports(frame.command) {
            debug!(
                "Command {:#06x} not supported for {:?}",
                frame.command, self
            );
            return None;
        }

        let raw = &frame.raw;
        match self {
            DeviceKind::Light => Some(DeviceState::Light {
                on: raw.get(STATE_OFFSET).is_some_and(|b| *b != 0),
                brightness: raw.get(BRIGHTNESS_OFFSET).copied().unwrap_or(0),
            }),
            DeviceKind::Switch => Some(DeviceState::Switch {
                on: raw.get(STATE_OFFSET).is_some_and(|b| *b != 0),
            }),
            DeviceKind::Trigger => {
                if raw.len() < TRIGGER_MIN_LEN {
                    debug!("Trigger frame too short ({} bytes)", raw.len());
                    return None;
                }
                Some(DeviceState::Trigger {
                    input: raw[INPUT_OFFSET],
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(bytes: &'static [u8]) -> Bytes {
        Bytes::from_static(bytes)
    }

    #[test]
    fn test_light_state_and_brightness() {
        let state = DeviceKind::Light.decode(frame(&[0x0B, 0x01, 0x10, 0x00, 0x97, 0x01, 0x00, 0x80]));
        assert_eq!(
            state,
            Some(DeviceState::Light {
                on: true,
                brightness: 0x80
            })
        );
    }

    #[test]
    fn test_light_short_frames_default() {
        assert_eq!(
            DeviceKind::Light.decode(frame(&[0x0B, 0, 0, 0x00, 0xC8])),
            Some(DeviceState::Light {
                on: false,
                brightness: 0
            })
        );
        assert_eq!(
            DeviceKind::Light.decode(frame(&[0x0B, 0, 0, 0x00, 0x98, 0x01])),
            Some(DeviceState::Light {
                on: true,
                brightness: 0
            })
        );
    }

    #[test]
    fn test_light_ignores_remote_click() {
        assert_eq!(
            DeviceKind::Light.decode(frame(&[0x0B, 0, 0, 0x00, 0x16, 0x01, 0x02, 0x03])),
            None
        );
    }

    #[test]
    fn test_switch_state() {
        assert_eq!(
            DeviceKind::Switch.decode(frame(&[0x03, 0, 0, 0x00, 0x97, 0x00])),
            Some(DeviceState::Switch { on: false })
        );
        assert_eq!(
            DeviceKind::Switch.decode(frame(&[0x03, 0, 0, 0x00, 0x97, 0x01])),
            Some(DeviceState::Switch { on: true })
        );
        assert_eq!(
            DeviceKind::Switch.decode(frame(&[0x03, 0, 0, 0x00, 0x97])),
            Some(DeviceState::Switch { on: false })
        );
        assert_eq!(
            DeviceKind::Switch.decode(frame(&[0x03, 0, 0, 0x00, 0xC8, 0x01])),
            None
        );
    }

    #[test]
    fn test_trigger_input() {
        assert_eq!(
            DeviceKind::Trigger.decode(frame(&[0x07, 0, 0, 0x00, 0x16, 0x00, 0x02, 0x00])),
            Some(DeviceState::Trigger { input: 2 })
        );
    }

    #[test]
    fn test_trigger_short_frame() {
        for len in 0..TRIGGER_MIN_LEN {
            let raw = [0x07u8, 0, 0, 0x00, 0x16, 0x00, 0x02, 0x00];
            assert_eq!(
                DeviceKind::Trigger.decode(Bytes::copy_from_slice(&raw[..len])),
                None
            );
        }
    }

    #[test]
    fn test_time_update_is_ignored_everywhere() {
        let raw = frame(&[0x01, 0x02, 0x00, 0x00, 0x1B, 0x78, 0x56, 0x34, 0x12, 0x00]);
        for kind in [DeviceKind::Light, DeviceKind::Switch, DeviceKind::Trigger] {
            assert_eq!(kind.decode(raw.clone()), None);
        }
    }

    #[test]
    fn test_from_category() {
        assert_eq!(
            DeviceKind::from_category(DeviceCategory::Light),
            Some(DeviceKind::Light)
        );
        assert_eq!(
            DeviceKind::from_category(DeviceCategory::DeviceAutomation),
            Some(DeviceKind::Trigger)
        );
        assert_eq!(DeviceKind::from_category(DeviceCategory::Sensor), None);
        assert_eq!(DeviceKind::from_category(DeviceCategory::Unknown), None);
    }
}
