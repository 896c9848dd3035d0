//! AEAD nonce counters.
//!
//! Shadowsocks AEAD nonces are little-endian counters as wide as the
//! cipher's nonce, starting at zero. Each direction of a session owns its own
//! counter and advances it once per seal or open.

use crate::core::{CryptoError, XAEAD_NONCE_SIZE};

/// Direction a codec transforms in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Plaintext in, ciphertext out.
    Encrypt,
    /// Ciphertext in, plaintext out.
    Decrypt,
}

/// A single nonce value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Nonce {
    bytes: [u8; XAEAD_NONCE_SIZE],
    len: usize,
}

impl Nonce {
    /// The nonce bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

/// Little-endian nonce counter.
#[derive(Debug, Clone)]
pub struct NonceCounter {
    next: [u8; XAEAD_NONCE_SIZE],
    len: usize,
    exhausted: bool,
}

impl NonceCounter {
    /// Create a zeroed counter `len` bytes wide (clamped to 24).
    pub fn new(len: usize) -> Self {
        Self {
            next: [0u8; XAEAD_NONCE_SIZE],
            len: len.min(XAEAD_NONCE_SIZE),
            exhausted: false,
        }
    }

    /// Counter width in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-width counter.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Peek at the value the next call to [`NonceCounter::advance`] returns.
    pub fn peek(&self) -> Nonce {
        Nonce {
            bytes: self.next,
            len: self.len,
        }
    }

    /// Take the current nonce and advance.
    ///
    /// Once every value has been handed out the counter refuses to wrap.
    pub fn advance(&mut self) -> Result<Nonce, CryptoError> {
        if self.exhausted {
            return Err(CryptoError::NonceExhausted);
        }

        let current = self.peek();
        if !increment_le(&mut self.next[..self.len]) {
            self.exhausted = true;
        }
        Ok(current)
    }
}

/// Add one with carry; returns false on wrap-around.
fn increment_le(bytes: &mut [u8]) -> bool {
    for byte in bytes.iter_mut() {
        let (value, overflow) = byte.overflowing_add(1);
        *byte = value;
        if !overflow {
            return true;
        }
    }
    false
}
