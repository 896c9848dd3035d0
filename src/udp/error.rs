//! Reliable UDP errors.

use std::io;

use thiserror::Error;

use crate::core::CryptoError;

/// Errors from the reliable UDP channel.
#[derive(Debug, Error)]
pub enum UdpError {
    /// No ack arrived before the resend budget ran out.
    #[error("message {id} not acknowledged after {resends} resends")]
    AckTimeout {
        /// Message id.
        id: u64,
        /// Resends performed.
        resends: u32,
    },

    /// The channel was closed.
    #[error("channel closed")]
    Closed,

    /// A datagram could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Socket error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Sealing or opening failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl UdpError {
    /// Create a decode error.
    pub fn decode(msg: impl Into<String>) -> Self {
        UdpError::Decode(msg.into())
    }
}
