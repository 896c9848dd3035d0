//! Error types shared across layers.

use thiserror::Error;

/// Errors in the crypto layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Cipher method name is not recognized.
    #[error("unsupported cipher: {0}")]
    UnsupportedCipher(String),

    /// Key material has the wrong size for the cipher.
    #[error("invalid key length")]
    InvalidKeyLength,

    /// Salt or IV has the wrong size for the cipher.
    #[error("invalid salt length: expected {expected}, got {actual}")]
    InvalidSaltLength {
        /// Size the cipher requires.
        expected: usize,
        /// Size that was supplied.
        actual: usize,
    },

    /// Input is shorter than the cipher overhead.
    #[error("packet too short: {len} bytes, need at least {min}")]
    PacketTooShort {
        /// Received length.
        len: usize,
        /// Minimum length.
        min: usize,
    },

    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (invalid tag or corrupted).
    #[error("AEAD decryption failed (invalid tag or corrupted)")]
    DecryptionFailed,

    /// Keystream ran past the cipher's limit.
    #[error("keystream exhausted")]
    KeystreamExhausted,

    /// Nonce counter exhausted - session must terminate.
    #[error("nonce counter exhausted - session must terminate")]
    NonceExhausted,

    /// Key derivation failed.
    #[error("key derivation failed")]
    KeyDerivationFailed,
}

/// Top-level errors.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Transport error.
    #[cfg(feature = "transport")]
    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    /// Reliable UDP error.
    #[cfg(feature = "udp")]
    #[error("udp error: {0}")]
    Udp(#[from] crate::udp::UdpError),

    /// Pool error.
    #[cfg(feature = "pool")]
    #[error("pool error: {0}")]
    Pool(#[from] crate::pool::PoolError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias over [`TunnelError`].
pub type Result<T> = std::result::Result<T, TunnelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_error_display() {
        let err = CryptoError::PacketTooShort { len: 3, min: 48 };
        assert_eq!(err.to_string(), "packet too short: 3 bytes, need at least 48");
    }

    #[test]
    fn test_tunnel_error_from_crypto() {
        let err: TunnelError = CryptoError::DecryptionFailed.into();
        assert!(matches!(err, TunnelError::Crypto(CryptoError::DecryptionFailed)));
    }
}
