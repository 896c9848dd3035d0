//! The cipher codec: one direction of one session.

use super::aead::AeadTransform;
use super::keys::derive_subkey;
use super::nonce::Direction;
use super::stream::StreamTransform;
use super::suite::CipherSuite;
use crate::core::CryptoError;

/// The two capability sets a codec can carry.
#[derive(Debug)]
pub enum Transform {
    /// Continuous keystream.
    Stream(StreamTransform),
    /// Tagged chunks.
    Aead(AeadTransform),
}

/// A keyed transform for one direction of a session.
///
/// Stream methods transform bytes of any size. AEAD methods treat each call
/// as one authenticated unit: encrypting appends a tag, decrypting expects
/// exactly one sealed unit.
#[derive(Debug)]
pub struct CipherCodec {
    transform: Transform,
    direction: Direction,
}

impl CipherCodec {
    /// Key a codec from the suite and the session salt (or IV).
    pub fn init(suite: &CipherSuite, direction: Direction, salt: &[u8]) -> Result<Self, CryptoError> {
        let kind = suite.kind();
        if salt.len() != kind.salt_len() {
            return Err(CryptoError::InvalidSaltLength {
                expected: kind.salt_len(),
                actual: salt.len(),
            });
        }

        let transform = if kind.is_aead() {
            let subkey = derive_subkey(suite.master_key(), salt)?;
            Transform::Aead(AeadTransform::new(kind, subkey.as_bytes())?)
        } else {
            Transform::Stream(StreamTransform::new(kind, suite.master_key(), salt, direction)?)
        };

        Ok(Self { transform, direction })
    }

    /// Encrypt or decrypt one chunk, depending on the codec's direction.
    pub fn process_chunk(&mut self, chunk: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match (&mut self.transform, self.direction) {
            (Transform::Stream(s), _) => s.process(chunk),
            (Transform::Aead(a), Direction::Encrypt) => a.seal(chunk),
            (Transform::Aead(a), Direction::Decrypt) => a.open(chunk),
        }
    }

    /// The direction this codec runs in.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Bytes added per call (the tag).
    pub fn overhead(&self) -> usize {
        match &self.transform {
            Transform::Stream(_) => 0,
            Transform::Aead(a) => a.tag_len(),
        }
    }

    /// True for AEAD codecs.
    pub fn is_aead(&self) -> bool {
        matches!(self.transform, Transform::Aead(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::random_bytes;
    use crate::crypto::suite::CipherKind;
    use proptest::prelude::*;

    fn codecs(kind: CipherKind) -> (CipherCodec, CipherCodec) {
        let suite = CipherSuite::new(kind, "correct horse battery staple");
        let salt = random_bytes(suite.salt_len());
        (
            CipherCodec::init(&suite, Direction::Encrypt, &salt).unwrap(),
            CipherCodec::init(&suite, Direction::Decrypt, &salt).unwrap(),
        )
    }

    #[test]
    fn test_every_suite_round_trips() {
        for kind in CipherKind::ALL {
            let (mut enc, mut dec) = codecs(*kind);
            for msg in [&b"first"[..], b"", &[0xFFu8; 300][..]] {
                let ct = enc.process_chunk(msg).unwrap();
                assert_eq!(ct.len(), msg.len() + enc.overhead(), "{kind}");
                assert_eq!(dec.process_chunk(&ct).unwrap(), msg, "{kind}");
            }
        }
    }

    #[test]
    fn test_salt_length_checked() {
        let suite = CipherSuite::new(CipherKind::Aes256Gcm, "pw");
        let err = CipherCodec::init(&suite, Direction::Encrypt, &[0u8; 16]).unwrap_err();
        assert_eq!(err, CryptoError::InvalidSaltLength { expected: 32, actual: 16 });
    }

    #[test]
    fn test_different_salt_does_not_decrypt() {
        let suite = CipherSuite::new(CipherKind::Aes128Gcm, "pw");
        let mut enc = CipherCodec::init(&suite, Direction::Encrypt, &[1u8; 16]).unwrap();
        let mut dec = CipherCodec::init(&suite, Direction::Decrypt, &[2u8; 16]).unwrap();
        let ct = enc.process_chunk(b"secret").unwrap();
        assert_eq!(dec.process_chunk(&ct), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_different_password_does_not_decrypt() {
        let salt = [9u8; 32];
        let a = CipherSuite::new(CipherKind::ChaCha20Poly1305, "alpha");
        let b = CipherSuite::new(CipherKind::ChaCha20Poly1305, "beta");
        let mut enc = CipherCodec::init(&a, Direction::Encrypt, &salt).unwrap();
        let mut dec = CipherCodec::init(&b, Direction::Decrypt, &salt).unwrap();
        let ct = enc.process_chunk(b"secret").unwrap();
        assert!(dec.process_chunk(&ct).is_err());
    }

    #[test]
    fn test_one_megabyte_round_trip() {
        let data: Vec<u8> = (0..1024 * 1024u32).map(|i| (i ^ (i >> 8)) as u8).collect();
        for kind in CipherKind::ALL {
            let (mut enc, mut dec) = codecs(*kind);
            let ct = enc.process_chunk(&data).unwrap();
            assert_eq!(ct.len(), data.len() + enc.overhead(), "{kind}");
            assert_eq!(dec.process_chunk(&ct).unwrap(), data, "{kind}");
        }
    }

    #[test]
    fn test_each_chunk_uses_next_nonce() {
        use crate::crypto::keys::derive_subkey;
        use aes_gcm::aead::generic_array::GenericArray;
        use aes_gcm::aead::{Aead, KeyInit};
        use aes_gcm::Aes256Gcm;

        let suite = CipherSuite::new(CipherKind::Aes256Gcm, "nonce-check");
        let salt = random_bytes(suite.salt_len());
        let subkey = derive_subkey(suite.master_key(), &salt).unwrap();
        let cipher = Aes256Gcm::new_from_slice(subkey.as_bytes()).unwrap();
        let nonce_for = |counter: u64| {
            let mut nonce = [0u8; 12];
            nonce[..8].copy_from_slice(&counter.to_le_bytes());
            nonce
        };

        let mut enc = CipherCodec::init(&suite, Direction::Encrypt, &salt).unwrap();
        let mut seen = std::collections::HashSet::new();
        for counter in 0..300u64 {
            let ct = enc.process_chunk(b"same plaintext every time").unwrap();
            assert!(seen.insert(ct.clone()), "ciphertext repeated at chunk {counter}");

            let opened = cipher
                .decrypt(GenericArray::from_slice(&nonce_for(counter)), &ct[..])
                .unwrap();
            assert_eq!(opened, b"same plaintext every time");
            assert!(cipher
                .decrypt(GenericArray::from_slice(&nonce_for(counter + 1)), &ct[..])
                .is_err());
        }
    }

    fn arb_kind() -> impl Strategy<Value = CipherKind> {
        proptest::sample::select(CipherKind::ALL.to_vec())
    }

    fn arb_aead_kind() -> impl Strategy<Value = CipherKind> {
        proptest::sample::select(
            CipherKind::ALL
                .iter()
                .copied()
                .filter(|k| k.is_aead())
                .collect::<Vec<_>>(),
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_round_trip(kind in arb_kind(), data in prop::collection::vec(any::<u8>(), 0..4096)) {
            let (mut enc, mut dec) = codecs(kind);
            let ct = enc.process_chunk(&data).unwrap();
            prop_assert_eq!(dec.process_chunk(&ct).unwrap(), data);
        }

        #[test]
        fn prop_tamper_fails_closed(
            kind in arb_aead_kind(),
            data in prop::collection::vec(any::<u8>(), 1..512),
            bit in any::<usize>(),
        ) {
            let (mut enc, mut dec) = codecs(kind);
            let mut ct = enc.process_chunk(&data).unwrap();
            let bit = bit % (ct.len() * 8);
            ct[bit / 8] ^= 1 << (bit % 8);
            prop_assert_eq!(dec.process_chunk(&ct), Err(CryptoError::DecryptionFailed));
        }
    }
}
