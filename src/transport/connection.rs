//! Connection state machine, lifecycle events and the connection interface.
//!
//! ```text
//! Disconnected ──connect──► Connecting ──ok──► Connected
//!      ▲                        │                  │
//!      └────────fail────────────┘◄───drop──────────┘
//!
//! any state ──close──► Closing (terminal)
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::error::TransportError;
use super::event::EventHub;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No live socket.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Socket established, data may flow.
    Connected,
    /// Closed for good; no further reconnects.
    Closing,
}

impl ConnectionState {
    /// True for the terminal state.
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Closing
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Closing, _) => false,
            (_, Closing) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Connected) | (Connecting, Disconnected) => true,
            (Connected, Disconnected) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
        };
        f.write_str(s)
    }
}

/// Events raised by a client connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// First successful connect.
    Connected {
        /// Remote endpoint.
        endpoint: SocketAddr,
    },
    /// The socket went away.
    Disconnected {
        /// Remote endpoint.
        endpoint: SocketAddr,
    },
    /// About to retry. Raised inline; handlers may redirect the endpoint.
    Reconnecting {
        /// Endpoint the attempt will target unless redirected.
        endpoint: SocketAddr,
        /// 1-based attempt number since the drop.
        attempt: u32,
        /// Delay that preceded this attempt.
        delay: Duration,
    },
    /// A retry succeeded.
    Reconnected {
        /// Endpoint now connected.
        endpoint: SocketAddr,
    },
    /// Payload handed to the socket.
    Send {
        /// Payload length.
        len: usize,
    },
    /// Payload received.
    Receive(Bytes),
    /// Heartbeat answered.
    Pong {
        /// Measured round trip.
        latency: Duration,
    },
    /// Failure on the connection. Raised inline; unless a handler marks it
    /// handled the connection closes.
    Error(Arc<TransportError>),
}

/// The interface shared by clients and pooled connections.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// True while a socket is live.
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Endpoint this connection targets.
    fn remote_endpoint(&self) -> SocketAddr;

    /// Local address of the live socket.
    fn local_endpoint(&self) -> Option<SocketAddr>;

    /// Lifecycle event subscriptions.
    fn events(&self) -> &EventHub<ConnectionEvent>;

    /// Send one application payload.
    async fn send(&self, payload: Bytes) -> Result<(), TransportError>;

    /// Close the connection.
    async fn close(&self);
}
