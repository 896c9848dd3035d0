//! Pool errors.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::transport::TransportError;

/// Errors from the connection pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No connection became available within the borrow timeout.
    #[error("pool exhausted for {key} after waiting {waited:?}")]
    Exhausted {
        /// Key that was borrowed.
        key: SocketAddr,
        /// Time spent waiting.
        waited: Duration,
    },

    /// The pool was closed.
    #[error("pool closed")]
    Closed,

    /// Creating a connection failed.
    #[error("connect failed: {0}")]
    Connect(#[from] TransportError),
}

impl PoolError {
    /// True if a later borrow may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            PoolError::Exhausted { .. } => true,
            PoolError::Closed => false,
            PoolError::Connect(e) => e.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        let key = SocketAddr::from(([127, 0, 0, 1], 80));
        assert!(PoolError::Exhausted { key, waited: Duration::ZERO }.is_retryable());
        assert!(!PoolError::Closed.is_retryable());
        assert!(PoolError::Connect(TransportError::Disconnected).is_retryable());
    }
}
