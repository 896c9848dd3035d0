//! Cipher methods and suites.
//!
//! A [`CipherSuite`] pairs a [`CipherKind`] with the master key derived from
//! the password. Suites are cheap to clone and shared by every codec of a
//! connection.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::keys::{evp_bytes_to_key, SecretKey};
use crate::core::{CryptoError, AEAD_NONCE_SIZE, AEAD_TAG_SIZE, XAEAD_NONCE_SIZE};

/// Supported cipher methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherKind {
    /// No encryption; bytes pass through unchanged.
    Plain,
    /// `aes-128-gcm`
    Aes128Gcm,
    /// `aes-256-gcm`
    Aes256Gcm,
    /// `chacha20-ietf-poly1305`
    ChaCha20Poly1305,
    /// `xchacha20-ietf-poly1305`
    XChaCha20Poly1305,
    /// `aes-128-cfb`
    Aes128Cfb,
    /// `aes-192-cfb`
    Aes192Cfb,
    /// `aes-256-cfb`
    Aes256Cfb,
    /// `aes-128-ofb`
    Aes128Ofb,
    /// `aes-192-ofb`
    Aes192Ofb,
    /// `aes-256-ofb`
    Aes256Ofb,
    /// `bf-cfb`
    BlowfishCfb,
    /// `rc4-md5`
    Rc4Md5,
    /// `chacha20` (8-byte IV)
    ChaCha20,
    /// `chacha20-ietf` (12-byte IV)
    ChaCha20Ietf,
}

impl CipherKind {
    /// Every supported method.
    pub const ALL: &'static [CipherKind] = &[
        CipherKind::Plain,
        CipherKind::Aes128Gcm,
        CipherKind::Aes256Gcm,
        CipherKind::ChaCha20Poly1305,
        CipherKind::XChaCha20Poly1305,
        CipherKind::Aes128Cfb,
        CipherKind::Aes192Cfb,
        CipherKind::Aes256Cfb,
        CipherKind::Aes128Ofb,
        CipherKind::Aes192Ofb,
        CipherKind::Aes256Ofb,
        CipherKind::BlowfishCfb,
        CipherKind::Rc4Md5,
        CipherKind::ChaCha20,
        CipherKind::ChaCha20Ietf,
    ];

    /// Method name as used in configuration.
    pub fn name(self) -> &'static str {
        match self {
            CipherKind::Plain => "plain",
            CipherKind::Aes128Gcm => "aes-128-gcm",
            CipherKind::Aes256Gcm => "aes-256-gcm",
            CipherKind::ChaCha20Poly1305 => "chacha20-ietf-poly1305",
            CipherKind::XChaCha20Poly1305 => "xchacha20-ietf-poly1305",
            CipherKind::Aes128Cfb => "aes-128-cfb",
            CipherKind::Aes192Cfb => "aes-192-cfb",
            CipherKind::Aes256Cfb => "aes-256-cfb",
            CipherKind::Aes128Ofb => "aes-128-ofb",
            CipherKind::Aes192Ofb => "aes-192-ofb",
            CipherKind::Aes256Ofb => "aes-256-ofb",
            CipherKind::BlowfishCfb => "bf-cfb",
            CipherKind::Rc4Md5 => "rc4-md5",
            CipherKind::ChaCha20 => "chacha20",
            CipherKind::ChaCha20Ietf => "chacha20-ietf",
        }
    }

    /// Master key length.
    pub fn key_len(self) -> usize {
        match self {
            CipherKind::Plain => 0,
            CipherKind::Aes128Gcm
            | CipherKind::Aes128Cfb
            | CipherKind::Aes128Ofb
            | CipherKind::BlowfishCfb
            | CipherKind::Rc4Md5 => 16,
            CipherKind::Aes192Cfb | CipherKind::Aes192Ofb => 24,
            CipherKind::Aes256Gcm
            | CipherKind::ChaCha20Poly1305
            | CipherKind::XChaCha20Poly1305
            | CipherKind::Aes256Cfb
            | CipherKind::Aes256Ofb
            | CipherKind::ChaCha20
            | CipherKind::ChaCha20Ietf => 32,
        }
    }

    /// Salt length for AEAD methods, IV length for stream methods.
    pub fn salt_len(self) -> usize {
        match self {
            CipherKind::Plain => 0,
            CipherKind::Aes128Gcm => 16,
            CipherKind::Aes256Gcm | CipherKind::ChaCha20Poly1305 | CipherKind::XChaCha20Poly1305 => {
                32
            }
            CipherKind::Aes128Cfb
            | CipherKind::Aes192Cfb
            | CipherKind::Aes256Cfb
            | CipherKind::Aes128Ofb
            | CipherKind::Aes192Ofb
            | CipherKind::Aes256Ofb
            | CipherKind::Rc4Md5 => 16,
            CipherKind::BlowfishCfb | CipherKind::ChaCha20 => 8,
            CipherKind::ChaCha20Ietf => 12,
        }
    }

    /// Authentication tag length; zero for stream methods.
    pub fn tag_len(self) -> usize {
        if self.is_aead() { AEAD_TAG_SIZE } else { 0 }
    }

    /// AEAD nonce width; zero for stream methods.
    pub fn nonce_len(self) -> usize {
        match self {
            CipherKind::XChaCha20Poly1305 => XAEAD_NONCE_SIZE,
            k if k.is_aead() => AEAD_NONCE_SIZE,
            _ => 0,
        }
    }

    /// True for authenticated methods.
    pub fn is_aead(self) -> bool {
        matches!(
            self,
            CipherKind::Aes128Gcm
                | CipherKind::Aes256Gcm
                | CipherKind::ChaCha20Poly1305
                | CipherKind::XChaCha20Poly1305
        )
    }
}

impl fmt::Display for CipherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherKind {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let method = s.trim().to_ascii_lowercase();
        match method.as_str() {
            "" | "none" | "plain" => Ok(CipherKind::Plain),
            "chacha20-poly1305" => Ok(CipherKind::ChaCha20Poly1305),
            "xchacha20-poly1305" => Ok(CipherKind::XChaCha20Poly1305),
            other => CipherKind::ALL
                .iter()
                .copied()
                .find(|kind| kind.name() == other)
                .ok_or_else(|| CryptoError::UnsupportedCipher(s.to_string())),
        }
    }
}

/// A cipher method bound to its master key.
#[derive(Clone)]
pub struct CipherSuite {
    kind: CipherKind,
    master: Arc<SecretKey>,
}

impl CipherSuite {
    /// Build a suite from a method and password.
    pub fn new(kind: CipherKind, password: &str) -> Self {
        Self {
            kind,
            master: Arc::new(evp_bytes_to_key(password.as_bytes(), kind.key_len())),
        }
    }

    /// Parse the method name and derive the master key.
    pub fn parse(method: &str, password: &str) -> Result<Self, CryptoError> {
        Ok(Self::new(method.parse()?, password))
    }

    /// Suite that leaves bytes untouched.
    pub fn plain() -> Self {
        Self::new(CipherKind::Plain, "")
    }

    /// The cipher method.
    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    /// The master key.
    pub fn master_key(&self) -> &SecretKey {
        &self.master
    }

    /// Salt or IV length.
    pub fn salt_len(&self) -> usize {
        self.kind.salt_len()
    }

    /// Tag length.
    pub fn tag_len(&self) -> usize {
        self.kind.tag_len()
    }

    /// True for authenticated methods.
    pub fn is_aead(&self) -> bool {
        self.kind.is_aead()
    }
}

impl Default for CipherSuite {
    fn default() -> Self {
        Self::plain()
    }
}

impl fmt::Debug for CipherSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherSuite")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
