//! Single-frame datagram sealing.
//!
//! A datagram is `[salt][ciphertext][tag]` (or `[IV][ciphertext]` for stream
//! methods). Every datagram carries a fresh salt, so each one is keyed on its
//! own and the AEAD nonce is always zero. There is no length field and no
//! chunk state.

use bytes::{BufMut, Bytes, BytesMut};

use crate::core::CryptoError;
use crate::crypto::{random_bytes, CipherCodec, CipherSuite, Direction};

/// Seals and opens whole datagrams.
#[derive(Debug, Clone)]
pub struct DatagramCodec {
    suite: CipherSuite,
}

impl DatagramCodec {
    /// Create a codec for `suite`.
    pub fn new(suite: CipherSuite) -> Self {
        Self { suite }
    }

    /// The suite in use.
    pub fn suite(&self) -> &CipherSuite {
        &self.suite
    }

    /// Smallest datagram that can be opened.
    pub fn overhead(&self) -> usize {
        self.suite.salt_len() + self.suite.tag_len()
    }

    /// Encrypt one datagram under a fresh salt.
    pub fn seal(&self, payload: &[u8]) -> Result<Bytes, CryptoError> {
        let salt = random_bytes(self.suite.salt_len());
        let mut codec = CipherCodec::init(&self.suite, Direction::Encrypt, &salt)?;
        let body = codec.process_chunk(payload)?;

        let mut out = BytesMut::with_capacity(salt.len() + body.len());
        out.put_slice(&salt);
        out.put_slice(&body);
        Ok(out.freeze())
    }

    /// Decrypt one datagram. Callers drop the packet on error.
    pub fn open(&self, packet: &[u8]) -> Result<Bytes, CryptoError> {
        let min = self.overhead();
        if packet.len() < min {
            return Err(CryptoError::PacketTooShort {
                len: packet.len(),
                min,
            });
        }

        let (salt, body) = packet.split_at(self.suite.salt_len());
        let mut codec = CipherCodec::init(&self.suite, Direction::Decrypt, salt)?;
        Ok(Bytes::from(codec.process_chunk(body)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CipherKind;

    #[test]
    fn test_every_suite_round_trips() {
        for kind in CipherKind::ALL {
            let codec = DatagramCodec::new(CipherSuite::new(*kind, "udp"));
            let packet = codec.seal(b"datagram body").unwrap();
            assert_eq!(packet.len(), 13 + codec.overhead(), "{kind}");
            assert_eq!(&codec.open(&packet).unwrap()[..], b"datagram body", "{kind}");
        }
    }

    #[test]
    fn test_fresh_salt_per_datagram() {
        let codec = DatagramCodec::new(CipherSuite::new(CipherKind::Aes128Gcm, "udp"));
        let a = codec.seal(b"same").unwrap();
        let b = codec.seal(b"same").unwrap();
        assert_ne!(a[..16], b[..16]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_packet() {
        let codec = DatagramCodec::new(CipherSuite::new(CipherKind::Aes256Gcm, "udp"));
        assert_eq!(
            codec.open(&[0u8; 40]),
            Err(CryptoError::PacketTooShort { len: 40, min: 48 })
        );
    }

    #[test]
    fn test_tampered_datagram_rejected() {
        let codec = DatagramCodec::new(CipherSuite::new(CipherKind::ChaCha20Poly1305, "udp"));
        let mut packet = codec.seal(b"payload").unwrap().to_vec();
        packet[40] ^= 0x01;
        assert_eq!(codec.open(&packet), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_empty_payload() {
        let codec = DatagramCodec::new(CipherSuite::new(CipherKind::Aes128Gcm, "udp"));
        let packet = codec.seal(b"").unwrap();
        assert_eq!(packet.len(), 32);
        assert!(codec.open(&packet).unwrap().is_empty());
    }
}
