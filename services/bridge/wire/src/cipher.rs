//! Mesh keystream cipher.
//!
//! Every frame on the data and last-data channels is XORed with a 16-byte
//! keystream. The keystream is one AES-128 block encryption (no chaining, no
//! padding) of the link address, reversed and repeated to fill the block.
//! The construction is what the hardware speaks, so it is reproduced as is.
//!
//! Encryption and decryption are the same operation.

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use std::fmt;
use std::str::FromStr;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::WireError;

/// Shared key length in bytes
pub const KEY_SIZE: usize = 16;

/// Link address length in bytes
pub const ADDRESS_SIZE: usize = 6;

/// Secret shared by every device in a site.
///
/// The `Debug` output never contains the key material.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; KEY_SIZE]);

impl SharedKey {
    /// Wrap raw key bytes
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a key in the site format, hex with optional dashes
    /// (`aabbccdd-eeff-0011-2233-445566778899`)
    pub fn from_hex(s: &str) -> Result<Self, WireError> {
        let compact: String = s.chars().filter(|c| *c != '-').collect();
        let bytes =
            hex::decode(&compact).map_err(|e| WireError::InvalidKey(format!("not hex: {}", e)))?;
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|v: Vec<u8>| {
            WireError::InvalidKey(format!("expected {} bytes, got {}", KEY_SIZE, v.len()))
        })?;
        Ok(Self(bytes))
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(<redacted>)")
    }
}

/// BLE address of the device the link is connected to, in display order
/// (`AA:BB:CC:DD:EE:FF` is `[0xAA, .., 0xFF]`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkAddress([u8; ADDRESS_SIZE]);

impl LinkAddress {
    /// Wrap raw address bytes
    pub fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw address bytes, display order
    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    /// Address bytes in the order the cipher consumes them
    pub fn reversed(&self) -> [u8; ADDRESS_SIZE] {
        let mut out = self.0;
        out.reverse();
        out
    }
}

impl FromStr for LinkAddress {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| *c != ':' && *c != '-').collect();
        let bytes = hex::decode(&compact).map_err(|_| WireError::InvalidAddress(s.to_string()))?;
        let bytes: [u8; ADDRESS_SIZE] = bytes
            .try_into()
            .map_err(|_| WireError::InvalidAddress(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

impl fmt::Debug for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkAddress({})", self)
    }
}

/// Derive the 16-byte keystream for a link
pub fn keystream(key: &SharedKey, address: &LinkAddress) -> [u8; KEY_SIZE] {
    let rev = address.reversed();

    let mut block = [0u8; KEY_SIZE];
    block[..6].copy_from_slice(&rev);
    block[6..12].copy_from_slice(&rev);
    block[12..].copy_from_slice(&rev[..4]);

    let cipher = Aes128::new(key.as_bytes().into());
    cipher.encrypt_block((&mut block).into());
    block
}

/// Encrypt or decrypt `data` for the given link.
///
/// Output length always equals input length.
pub fn transform(key: &SharedKey, address: &LinkAddress, data: &[u8]) -> Vec<u8> {
    let mut out = data.to_vec();
    transform_in_place(key, address, &mut out);
    out
}

/// In-place variant of [`transform`]
pub fn transform_in_place(key: &SharedKey, address: &LinkAddress, data: &mut [u8]) {
    if data.is_empty() {
        return;
    }
    let stream = keystream(key, address);
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= stream[i % KEY_SIZE];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> SharedKey {
        SharedKey::from_hex("00112233-4455-6677-8899-aabbccddeeff").unwrap()
    }

    fn test_addr() -> LinkAddress {
        "AA:BB:CC:DD:EE:FF".parse().unwrap()
    }

    #[test]
    fn test_transform_is_involution() {
        let key = test_key();
        let addr = test_addr();

        for len in [0usize, 1, 5, 15, 16, 17, 31, 64, 200] {
            let data: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
            let encrypted = transform(&key, &addr, &data);
            assert_eq!(encrypted.len(), data.len());
            assert_eq!(transform(&key, &addr, &encrypted), data);
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(transform(&test_key(), &test_addr(), &[]).is_empty());
    }

    #[test]
    fn test_keystream_known_answer() {
        assert_eq!(
            hex::encode(keystream(&test_key(), &test_addr())),
            "2b64e92080beb7ee0ece46c5a0283f74"
        );
    }

    #[test]
    fn test_transform_known_answer() {
        let plain = [0x0B, 0x01, 0x10, 0x00, 0x97, 0x01];
        assert_eq!(
            transform(&test_key(), &test_addr(), &plain),
            vec![0x20, 0x65, 0xF9, 0x20, 0x17, 0xBF]
        );
    }

    #[test]
    fn test_keystream_repeats_every_block() {
        let key = test_key();
        let addr = test_addr();

        let zeros = vec![0u8; 48];
        let out = transform(&key, &addr, &zeros);
        let stream = keystream(&key, &addr);
        assert_eq!(&out[..16], &stream);
        assert_eq!(&out[16..32], &stream);
        assert_eq!(&out[32..], &stream);
    }

    #[test]
    fn test_keystream_depends_on_address() {
        let key = test_key();
        let other: LinkAddress = "AA:BB:CC:DD:EE:00".parse().unwrap();
        assert_ne!(keystream(&key, &test_addr()), keystream(&key, &other));
    }

    #[test]
    fn test_key_parsing() {
        assert!(SharedKey::from_hex("00112233445566778899aabbccddeeff").is_ok());
        assert!(matches!(
            SharedKey::from_hex("deadbeef"),
            Err(WireError::InvalidKey(_))
        ));
        assert!(matches!(
            SharedKey::from_hex("zz112233445566778899aabbccddeeff"),
            Err(WireError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let printed = format!("{:?}", test_key());
        assert!(!printed.contains("0011"));
        assert!(printed.contains("redacted"));
    }

    #[test]
    fn test_address_parse_and_display() {
        let addr = test_addr();
        assert_eq!(addr.as_bytes(), &[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        assert_eq!(addr.reversed(), [0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(addr.to_string(), "AA:BB:CC:DD:EE:FF");
        assert!("AA:BB".parse::<LinkAddress>().is_err());
    }
}
