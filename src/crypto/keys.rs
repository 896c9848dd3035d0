//! Key material and derivation.
//!
//! Master keys come from the password through OpenSSL's `EVP_BytesToKey`
//! (MD5, one round, no salt). AEAD sessions then derive a subkey per salt
//! with HKDF-SHA1.

use hkdf::Hkdf;
use md5::{Digest, Md5};
use rand::{rngs::OsRng, RngCore};
use sha1::Sha1;
use zeroize::Zeroize;

use crate::core::{CryptoError, SUBKEY_INFO};

/// Key bytes, zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretKey {
    bytes: Vec<u8>,
}

impl SecretKey {
    /// Wrap existing key bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Get the raw key bytes.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for the zero-length key of the plain cipher.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretKey([REDACTED; {}])", self.bytes.len())
    }
}

/// Stretch a password into a `key_len` master key.
///
/// `D_1 = MD5(password)`, `D_i = MD5(D_{i-1} || password)`, concatenated and
/// truncated.
pub fn evp_bytes_to_key(password: &[u8], key_len: usize) -> SecretKey {
    let mut key = Vec::with_capacity(key_len + 16);
    let mut prev: Vec<u8> = Vec::new();

    while key.len() < key_len {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(password);
        prev = hasher.finalize().to_vec();
        key.extend_from_slice(&prev);
    }

    prev.zeroize();
    key.truncate(key_len);
    SecretKey::from_bytes(key)
}

/// Derive the per-session AEAD subkey: `HKDF-SHA1(salt, master, "ss-subkey")`.
pub fn derive_subkey(master: &SecretKey, salt: &[u8]) -> Result<SecretKey, CryptoError> {
    let hk = Hkdf::<Sha1>::new(Some(salt), master.as_bytes());
    let mut okm = vec![0u8; master.len()];
    hk.expand(SUBKEY_INFO, &mut okm)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    Ok(SecretKey::from_bytes(okm))
}

/// RC4-MD5 session key: `MD5(master || iv)`.
pub fn rc4_md5_key(master: &SecretKey, iv: &[u8]) -> SecretKey {
    let mut hasher = Md5::new();
    hasher.update(master.as_bytes());
    hasher.update(iv);
    SecretKey::from_bytes(hasher.finalize().to_vec())
}

/// Fill a fresh buffer from the OS random source.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evp_bytes_to_key_known_answer() {
        // First block is plain MD5 of the password.
        let key = evp_bytes_to_key(b"password", 16);
        assert_eq!(hex::encode(key.as_bytes()), "5f4dcc3b5aa765d61d8327deb882cf99");
    }

    #[test]
    fn test_evp_bytes_to_key_extends_blocks() {
        let short = evp_bytes_to_key(b"password", 16);
        let long = evp_bytes_to_key(b"password", 32);
        assert_eq!(long.len(), 32);
        assert_eq!(&long.as_bytes()[..16], short.as_bytes());

        let mut hasher = Md5::new();
        hasher.update(short.as_bytes());
        hasher.update(b"password");
        assert_eq!(&long.as_bytes()[16..], hasher.finalize().as_slice());
    }

    #[test]
    fn test_evp_bytes_to_key_truncates() {
        let key = evp_bytes_to_key(b"password", 24);
        assert_eq!(key.len(), 24);
        assert_eq!(&key.as_bytes()[..16], evp_bytes_to_key(b"password", 16).as_bytes());
    }

    #[test]
    fn test_subkey_depends_on_salt() {
        let master = evp_bytes_to_key(b"secret", 32);
        let a = derive_subkey(&master, &[1u8; 32]).unwrap();
        let b = derive_subkey(&master, &[2u8; 32]).unwrap();
        let a2 = derive_subkey(&master, &[1u8; 32]).unwrap();

        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert_eq!(a, a2);
        assert_ne!(a.as_bytes(), master.as_bytes());
    }

    #[test]
    fn test_rc4_md5_key() {
        let master = evp_bytes_to_key(b"secret", 16);
        let key = rc4_md5_key(&master, &[7u8; 16]);
        assert_eq!(key.len(), 16);
        assert_ne!(key, rc4_md5_key(&master, &[8u8; 16]));
    }

    #[test]
    fn test_random_bytes() {
        let a = random_bytes(32);
        let b = random_bytes(32);
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(random_bytes(0).is_empty());
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = SecretKey::from_bytes(vec![0xAA; 4]);
        assert_eq!(format!("{key:?}"), "SecretKey([REDACTED; 4])");
    }
}
