//! AEAD transforms (AES-GCM, ChaCha20-Poly1305, XChaCha20-Poly1305).
//!
//! Each transform owns one subkey and one nonce counter. Every seal or open
//! consumes exactly one nonce, including opens that fail authentication, so
//! both peers stay in step until the failure closes the session.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};

use super::nonce::NonceCounter;
use super::suite::CipherKind;
use crate::core::CryptoError;

enum AeadInner {
    Aes128Gcm(Box<Aes128Gcm>),
    Aes256Gcm(Box<Aes256Gcm>),
    ChaCha20Poly1305(Box<ChaCha20Poly1305>),
    XChaCha20Poly1305(Box<XChaCha20Poly1305>),
}

/// An AEAD cipher plus its per-direction nonce counter.
pub struct AeadTransform {
    inner: AeadInner,
    nonce: NonceCounter,
    tag_len: usize,
}

impl AeadTransform {
    /// Create a transform keyed with a session subkey.
    pub fn new(kind: CipherKind, subkey: &[u8]) -> Result<Self, CryptoError> {
        let inner = match kind {
            CipherKind::Aes128Gcm => AeadInner::Aes128Gcm(Box::new(
                Aes128Gcm::new_from_slice(subkey).map_err(|_| CryptoError::InvalidKeyLength)?,
            )),
            CipherKind::Aes256Gcm => AeadInner::Aes256Gcm(Box::new(
                Aes256Gcm::new_from_slice(subkey).map_err(|_| CryptoError::InvalidKeyLength)?,
            )),
            CipherKind::ChaCha20Poly1305 => AeadInner::ChaCha20Poly1305(Box::new(
                ChaCha20Poly1305::new_from_slice(subkey)
                    .map_err(|_| CryptoError::InvalidKeyLength)?,
            )),
            CipherKind::XChaCha20Poly1305 => AeadInner::XChaCha20Poly1305(Box::new(
                XChaCha20Poly1305::new_from_slice(subkey)
                    .map_err(|_| CryptoError::InvalidKeyLength)?,
            )),
            other => return Err(CryptoError::UnsupportedCipher(other.name().to_string())),
        };

        Ok(Self {
            inner,
            nonce: NonceCounter::new(kind.nonce_len()),
            tag_len: kind.tag_len(),
        })
    }

    /// Tag length appended by [`AeadTransform::seal`].
    pub fn tag_len(&self) -> usize {
        self.tag_len
    }

    /// Encrypt and append the tag.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = self.nonce.advance()?;
        let n = nonce.as_slice();
        let sealed = match &self.inner {
            AeadInner::Aes128Gcm(c) => c.encrypt(GenericArray::from_slice(n), plaintext),
            AeadInner::Aes256Gcm(c) => c.encrypt(GenericArray::from_slice(n), plaintext),
            AeadInner::ChaCha20Poly1305(c) => c.encrypt(GenericArray::from_slice(n), plaintext),
            AeadInner::XChaCha20Poly1305(c) => c.encrypt(GenericArray::from_slice(n), plaintext),
        };
        sealed.map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Verify the tag and decrypt. Never returns unauthenticated bytes.
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if ciphertext.len() < self.tag_len {
            return Err(CryptoError::PacketTooShort {
                len: ciphertext.len(),
                min: self.tag_len,
            });
        }

        let nonce = self.nonce.advance()?;
        let n = nonce.as_slice();
        let opened = match &self.inner {
            AeadInner::Aes128Gcm(c) => c.decrypt(GenericArray::from_slice(n), ciphertext),
            AeadInner::Aes256Gcm(c) => c.decrypt(GenericArray::from_slice(n), ciphertext),
            AeadInner::ChaCha20Poly1305(c) => c.decrypt(GenericArray::from_slice(n), ciphertext),
            AeadInner::XChaCha20Poly1305(c) => {
                c.decrypt(GenericArray::from_slice(n), ciphertext)
            }
        };
        opened.map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for AeadTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AeadTransform")
            .field("nonce", &self.nonce.peek())
            .finish_non_exhaustive()
    }
}
