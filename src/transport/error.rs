//! Transport layer error types.
//!
//! Protocol and crypto failures on a stream are fatal: the byte stream can no
//! longer be trusted, so the socket must close. On datagrams the same failures
//! only drop the offending packet.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::core::CryptoError;

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Malformed frame or packet.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Cipher failure (tag mismatch, bad salt, nonce exhaustion).
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Connect attempt did not finish in time.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Connect attempt was refused or failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] io::Error),

    /// No live socket.
    #[error("not connected")]
    Disconnected,

    /// Connection was closed and will not come back.
    #[error("connection closed")]
    Closed,

    /// Nothing was read within the heartbeat timeout.
    #[error("heartbeat lost after {0:?} of silence")]
    HeartbeatLost(Duration),

    /// I/O error (socket operations).
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Shorthand for a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        TransportError::Protocol(msg.into())
    }

    /// Check if this error means the stream can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TransportError::Protocol(_) | TransportError::Crypto(_) | TransportError::Closed
        )
    }

    /// Check if a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::ConnectTimeout(_)
                | TransportError::ConnectFailed(_)
                | TransportError::Disconnected
                | TransportError::HeartbeatLost(_)
                | TransportError::Io(_)
        )
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
