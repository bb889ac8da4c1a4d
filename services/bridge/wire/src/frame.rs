//! Command and notification frames.
//!
//! Outgoing commands are built as [`CommandFrame`]s and encoded to plaintext
//! bytes; the caller encrypts them for the link. Incoming frames are decrypted
//! by the caller and decoded into [`NotificationFrame`]s.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

use crate::header::{Command, ResponseType, HEADER_SIZE};
use crate::WireError;

/// Offset of the timestamp in a time-update response
pub const TIME_OFFSET: usize = HEADER_SIZE;

/// Outgoing command frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// Mesh address of the target device
    pub address: u8,
    /// Response-type flag
    pub response_type: u16,
    /// Command id
    pub command: u16,
    /// Command parameters
    pub payload: Bytes,
}

impl CommandFrame {
    /// Create a frame from raw payload bytes
    pub fn new(
        address: u8,
        command: impl Into<u16>,
        response_type: impl Into<u16>,
        payload: Bytes,
    ) -> Self {
        Self {
            address,
            response_type: response_type.into(),
            command: command.into(),
            payload,
        }
    }

    /// Create a frame from a hex-encoded payload (`""` for no parameters)
    pub fn from_hex(
        address: u8,
        command: impl Into<u16>,
        response_type: impl Into<u16>,
        hex_payload: &str,
    ) -> Result<Self, WireError> {
        let payload = hex::decode(hex_payload)
            .map_err(|e| WireError::InvalidPayload(format!("{:?}: {}", hex_payload, e)))?;
        Ok(Self::new(address, command, response_type, Bytes::from(payload)))
    }

    /// Encode to plaintext wire bytes
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u8(self.address);
        buf.put_u16(self.response_type);
        buf.put_u16(self.command);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// Decrypted frame received from the mesh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFrame {
    /// Mesh address of the sending device
    pub sender: u8,
    /// Command id
    pub command: u16,
    /// Parameters following the header (raw bytes 5..)
    pub params: Bytes,
    /// The full decrypted frame
    pub raw: Bytes,
}

impl NotificationFrame {
    /// Decode a decrypted frame
    pub fn decode(raw: Bytes) -> Result<Self, WireError> {
        if raw.len() < HEADER_SIZE {
            return Err(WireError::TruncatedFrame {
                len: raw.len(),
                needed: HEADER_SIZE,
            });
        }

        let mut header = &raw[..HEADER_SIZE];
        let sender = header.get_u8();
        let _response_type = header.get_u16();
        let command = header.get_u16();
        let params = raw.slice(HEADER_SIZE..);
        trace!(
            "Decoded frame from {} command {:#06x} ({} param bytes)",
            sender,
            command,
            params.len()
        );

        Ok(Self {
            sender,
            command,
            params,
            raw,
        })
    }

    /// Recognized command, if any
    pub fn known_command(&self) -> Option<Command> {
        Command::try_from(self.command).ok()
    }

    /// Whether this frame carries a mesh clock value
    pub fn is_time_update(&self) -> bool {
        self.command == Command::TimeUpdate.id()
    }

    /// Parameter byte at `index`, counted from the end of the header
    pub fn param(&self, index: usize) -> Option<u8> {
        self.params.get(index).copied()
    }

    /// Unix timestamp carried by a time-update response
    pub fn mesh_time(&self) -> Result<u32, WireError> {
        if self.params.len() < 4 {
            return Err(WireError::TruncatedFrame {
                len: self.raw.len(),
                needed: TIME_OFFSET + 4,
            });
        }
        let mut params = &self.params[..4];
        Ok(params.get_u32_le())
    }
}

/// Parameters for a time-update command: LE u32 timestamp and a zero byte
pub fn time_update_payload(unix_secs: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(5);
    buf.put_u32_le(unix_secs);
    buf.put_u8(0);
    buf.freeze()
}

/// Time-update request asking `address` to report the mesh clock
pub fn time_request(address: u8) -> CommandFrame {
    CommandFrame::new(
        address,
        Command::TimeUpdate,
        ResponseType::RequestResponse,
        Bytes::new(),
    )
}

/// Time-update command setting the mesh clock
pub fn time_set(address: u8, unix_secs: u32) -> CommandFrame {
    CommandFrame::new(
        address,
        Command::TimeUpdate,
        ResponseType::NoResponse,
        time_update_payload(unix_secs),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let frame = CommandFrame::from_hex(
            0x0B,
            Command::StateChange,
            ResponseType::NoResponse,
            "01",
        )
        .unwrap();
        assert_eq!(
            frame.encode().as_ref(),
            &[0x0B, 0x01, 0x10, 0x00, 0x97, 0x01]
        );
    }

    #[test]
    fn test_encode_empty_payload() {
        let frame = time_request(3);
        assert_eq!(frame.encode().as_ref(), &[0x03, 0x01, 0x02, 0x00, 0x1B]);
    }

    #[test]
    fn test_invalid_hex_payload() {
        let odd = CommandFrame::from_hex(1, Command::StateChange, ResponseType::NoResponse, "0");
        assert!(matches!(odd, Err(WireError::InvalidPayload(_))));

        let bad = CommandFrame::from_hex(1, Command::StateChange, ResponseType::NoResponse, "zz");
        assert!(matches!(bad, Err(WireError::InvalidPayload(_))));
    }

    #[test]
    fn test_header_offsets_agree() {
        // Sender and command sit at the same offsets as target and command
        // in an encoded command frame.
        for address in [0u8, 1, 0x7F, 0xFF] {
            for command in [0x0000u16, 0x0016, 0x0097, 0x1234, 0xFFFF] {
                let encoded =
                    CommandFrame::new(address, command, 0x0102u16, Bytes::from_static(&[9, 8]))
                        .encode();
                let decoded = NotificationFrame::decode(encoded).unwrap();
                assert_eq!(decoded.sender, address);
                assert_eq!(decoded.command, command);
                assert_eq!(decoded.params.as_ref(), &[9, 8]);
            }
        }
    }

    #[test]
    fn test_decode_truncated() {
        for len in 0..HEADER_SIZE {
            let err = NotificationFrame::decode(Bytes::from(vec![0u8; len])).unwrap_err();
            assert_eq!(
                err,
                WireError::TruncatedFrame {
                    len,
                    needed: HEADER_SIZE
                }
            );
        }
    }

    #[test]
    fn test_decode_header_only() {
        let frame = NotificationFrame::decode(Bytes::from_static(&[7, 0, 0, 0x00, 0x97])).unwrap();
        assert_eq!(frame.sender, 7);
        assert_eq!(frame.known_command(), Some(Command::StateChange));
        assert!(frame.params.is_empty());
        assert_eq!(frame.param(0), None);
    }

    #[test]
    fn test_mesh_time() {
        let raw = Bytes::from_static(&[
            0x01, 0x02, 0x00, 0x00, 0x1B, 0x78, 0x56, 0x34, 0x12, 0x00, 0x00,
        ]);
        let frame = NotificationFrame::decode(raw).unwrap();
        assert!(frame.is_time_update());
        assert_eq!(frame.mesh_time().unwrap(), 0x12345678);
    }

    #[test]
    fn test_mesh_time_truncated() {
        let frame =
            NotificationFrame::decode(Bytes::from_static(&[1, 2, 0, 0, 0x1B, 0x01])).unwrap();
        assert!(matches!(
            frame.mesh_time(),
            Err(WireError::TruncatedFrame { .. })
        ));
    }

    #[test]
    fn test_time_set_payload() {
        let frame = time_set(2, 0x6500_0000);
        assert_eq!(
            frame.encode().as_ref(),
            &[0x02, 0x01, 0x10, 0x00, 0x1B, 0x00, 0x00, 0x00, 0x65, 0x00]
        );
    }
}
