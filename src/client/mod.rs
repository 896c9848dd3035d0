//! Client side of the tunnel.
//!
//! [`StatefulClient`] wraps one encrypted TCP connection with automatic
//! reconnect, heartbeats and lifecycle events.

#[allow(clippy::module_inception)]
mod client;

pub use client::*;
