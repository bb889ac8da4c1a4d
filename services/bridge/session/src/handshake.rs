//! Challenge-response authentication for mesh links.
//!
//! Immediately after the link comes up the session proves it holds the site
//! key: it pokes the auth channel, reads a 16-byte challenge, and writes back
//! a response derived from the key and the challenge. The peer never answers
//! with an accept or reject, so a bad key only shows up later as failing
//! pings and commands.

use plejd_wire::{SharedKey, KEY_SIZE};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::transport::{Channel, TimedTransport};
use crate::SessionError;

/// Challenge length in bytes
pub const CHALLENGE_SIZE: usize = 16;

/// Compute the response to a challenge.
///
/// Key and challenge are read as big-endian 128-bit integers (shorter
/// challenges are left-padded with zeros, longer ones keep their low 16
/// bytes), XORed, and hashed with SHA-256. The two halves of the digest XORed
/// together form the response.
pub fn challenge_response(key: &SharedKey, challenge: &[u8]) -> [u8; CHALLENGE_SIZE] {
    let mut padded = [0u8; CHALLENGE_SIZE];
    let tail = &challenge[challenge.len().saturating_sub(CHALLENGE_SIZE)..];
    padded[CHALLENGE_SIZE - tail.len()..].copy_from_slice(tail);

    let mixed = u128::from_be_bytes(*key.as_bytes()) ^ u128::from_be_bytes(padded);
    let digest = Sha256::digest(mixed.to_be_bytes());

    let mut response = [0u8; CHALLENGE_SIZE];
    for (i, byte) in response.iter_mut().enumerate() {
        *byte = digest[i] ^ digest[i + KEY_SIZE];
    }
    response
}

/// Run the handshake over the auth channel
pub(crate) async fn authenticate(
    io: &TimedTransport<'_>,
    key: &SharedKey,
) -> Result<(), SessionError> {
    io.write(Channel::Auth, &[0x00]).await?;
    debug!("Requested auth challenge");

    let challenge = io.read(Channel::Auth).await?;
    let response = challenge_response(key, &challenge);
    io.write(Channel::Auth, &response).await?;
    debug!("Auth response written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mem::MemoryTransport;
    use crate::transport::{BleTransport, PeerId};
    use bytes::Bytes;
    use std::time::Duration;

    async fn linked(transport: MemoryTransport) -> MemoryTransport {
        let transport = transport.with_peer("peer", -40, "AA:BB:CC:DD:EE:FF".parse().unwrap());
        transport.connect(&PeerId("peer".into())).await.unwrap();
        transport
    }

    fn key() -> SharedKey {
        SharedKey::from_hex("0123456789abcdef0123456789abcdef").unwrap()
    }

    #[test]
    fn test_response_matches_manual_derivation() {
        let challenge: [u8; 16] = *b"0123456789ABCDEF";

        let mut xored = [0u8; 16];
        for i in 0..16 {
            xored[i] = key().as_bytes()[i] ^ challenge[i];
        }
        let digest = Sha256::digest(xored);
        let mut expected = [0u8; 16];
        for i in 0..16 {
            expected[i] = digest[i] ^ digest[i + 16];
        }

        assert_eq!(challenge_response(&key(), &challenge), expected);
    }

    #[test]
    fn test_known_answer() {
        let key = SharedKey::from_hex("00112233445566778899aabbccddeeff").unwrap();
        let challenge: Vec<u8> = (0u8..16).collect();
        assert_eq!(
            hex::encode(challenge_response(&key, &challenge)),
            "0b31c067a9e97b426979227c7227ce7a"
        );
    }

    #[test]
    fn test_short_challenge_is_left_padded() {
        let short = [0xAB, 0xCD];
        let mut padded = [0u8; 16];
        padded[14] = 0xAB;
        padded[15] = 0xCD;
        assert_eq!(
            challenge_response(&key(), &short),
            challenge_response(&key(), &padded)
        );
    }

    #[test]
    fn test_long_challenge_keeps_low_bytes() {
        let mut long = vec![0xFFu8; 4];
        long.extend_from_slice(&[7u8; 16]);
        assert_eq!(
            challenge_response(&key(), &long),
            challenge_response(&key(), &[7u8; 16])
        );
    }

    #[test]
    fn test_response_depends_on_key() {
        let other = SharedKey::from_hex("ffffffffffffffffffffffffffffffff").unwrap();
        let challenge = [1u8; 16];
        assert_ne!(
            challenge_response(&key(), &challenge),
            challenge_response(&other, &challenge)
        );
    }

    #[tokio::test]
    async fn test_authenticate_writes_poke_then_response() {
        let challenge = Bytes::from_static(&[9u8; 16]);
        let transport = linked(MemoryTransport::new().with_challenge(challenge.clone())).await;
        let io = TimedTransport::new(&transport, Duration::from_secs(1));

        authenticate(&io, &key()).await.unwrap();

        let writes = transport.writes_to(Channel::Auth);
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].as_ref(), &[0x00]);
        assert_eq!(
            writes[1].as_ref(),
            &challenge_response(&key(), &challenge)[..]
        );
    }

    #[tokio::test]
    async fn test_authenticate_propagates_transport_failure() {
        let transport = linked(MemoryTransport::new()).await;
        transport.fail_channel(Channel::Auth, "gatt write rejected");
        let io = TimedTransport::new(&transport, Duration::from_secs(1));

        let err = authenticate(&io, &key()).await.unwrap_err();
        assert_eq!(err, SessionError::transport("gatt write rejected"));
    }
}
