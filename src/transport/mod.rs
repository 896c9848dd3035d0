//! Transport layer.
//!
//! Sits between the cipher codec and the connection APIs:
//!
//! - **Frame assembly**: [`FrameEncoder`] / [`FrameDecoder`] for TCP chunking,
//!   [`DatagramCodec`] for single-frame UDP
//! - **Packets**: [`Packet`] (data, ping, pong) inside the decrypted stream
//! - **Framed I/O**: [`framed`] splits a `TcpStream` into packet reader/writer
//! - **Lifecycle**: [`ConnectionState`], [`ConnectionEvent`], [`EventHub`] and
//!   the [`Connection`] trait
//! - **Timing**: [`ReconnectBackoff`] and heartbeat deadlines
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │   Client / Server / Pool / Reliable UDP │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   packets, frames, events, backoff      │
//! ├─────────────────────────────────────────┤
//! │         Cipher Codec                    │
//! ├─────────────────────────────────────────┤
//! │            TCP / UDP                    │
//! └─────────────────────────────────────────┘
//! ```

mod connection;
mod datagram;
mod error;
mod event;
mod frame;
mod packet;
mod stream;
mod timing;

pub use connection::*;
pub use datagram::*;
pub use error::*;
pub use event::*;
pub use frame::*;
pub use packet::*;
pub use stream::*;
pub use timing::{constants as timing_constants, HeartbeatTiming, ReconnectBackoff};
