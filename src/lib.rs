//! # tunnel-core
//!
//! Encrypted tunneling transport: the pieces a proxy needs between a raw
//! socket and application bytes.
//!
//! - **Cipher codec**: Shadowsocks-compatible AEAD and stream ciphers
//! - **Frame assembly**: length-prefixed AEAD chunks over TCP, single sealed
//!   datagrams over UDP
//! - **Stateful connections**: a client that reconnects with backoff and
//!   keeps itself alive with heartbeats, and a server with a peer table
//! - **Reliable UDP**: per-message acks, resend and duplicate suppression
//! - **Connection pool**: keyed, bounded, validating pool of clients
//!
//! ## Feature Flags
//!
//! - `crypto` (default): cipher codec
//! - `transport` (default): frames, packets, events, framed TCP I/O
//! - `client` (default): [`client::StatefulClient`]
//! - `server` (default): [`server::TcpServer`]
//! - `udp` (default): [`udp::ReliableUdpChannel`]
//! - `pool` (default): [`pool::ConnectionPool`]
//!
//! ## Modules
//!
//! - [`core`]: constants and error types (always included)
//! - [`crypto`]: cipher codec (requires `crypto` feature)
//! - [`transport`]: transport layer (requires `transport` feature)
//! - [`client`], [`server`], [`udp`], [`pool`]: connection APIs
//!
//! ## Example Usage
//!
//! ```rust
//! use tunnel_core::crypto::{CipherCodec, CipherSuite, Direction};
//!
//! let suite = CipherSuite::parse("aes-256-gcm", "secret").unwrap();
//! let salt = vec![7u8; suite.salt_len()];
//!
//! let mut enc = CipherCodec::init(&suite, Direction::Encrypt, &salt).unwrap();
//! let mut dec = CipherCodec::init(&suite, Direction::Decrypt, &salt).unwrap();
//!
//! let sealed = enc.process_chunk(b"hello").unwrap();
//! assert_eq!(dec.process_chunk(&sealed).unwrap(), b"hello");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Crypto layer (feature-gated)
#[cfg(feature = "crypto")]
#[cfg_attr(docsrs, doc(cfg(feature = "crypto")))]
pub mod crypto;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Client API (feature-gated)
#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

// Server API (feature-gated)
#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

// Reliable UDP (feature-gated)
#[cfg(feature = "udp")]
#[cfg_attr(docsrs, doc(cfg(feature = "udp")))]
pub mod udp;

// Connection pool (feature-gated)
#[cfg(feature = "pool")]
#[cfg_attr(docsrs, doc(cfg(feature = "pool")))]
pub mod pool;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::{CryptoError, TunnelError};

    #[cfg(feature = "crypto")]
    pub use crate::crypto::{CipherCodec, CipherKind, CipherSuite, Direction};

    #[cfg(feature = "transport")]
    pub use crate::transport::{
        Connection, ConnectionEvent, ConnectionState, EventArgs, EventHub, SubscriptionId,
        TransportError,
    };

    #[cfg(feature = "client")]
    pub use crate::client::{ClientBuilder, ClientConfig, StatefulClient};

    #[cfg(feature = "server")]
    pub use crate::server::{ServerBuilder, ServerConfig, ServerEvent, TcpServer};

    #[cfg(feature = "udp")]
    pub use crate::udp::{AckMode, ReliableUdpChannel, UdpBuilder, UdpConfig, UdpError, UdpEvent};

    #[cfg(feature = "pool")]
    pub use crate::pool::{ConnectionPool, PoolBuilder, PoolConfig, PoolError, PooledConnection};
}

// Re-export commonly used items at crate root
pub use crate::core::{CryptoError, TunnelError};

#[cfg(feature = "crypto")]
pub use crypto::{CipherKind, CipherSuite};

#[cfg(feature = "transport")]
pub use transport::{Connection, ConnectionState, TransportError};
