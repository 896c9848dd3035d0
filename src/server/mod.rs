//! Server side of the tunnel.
//!
//! [`TcpServer`] accepts encrypted connections, keeps a peer table keyed by
//! remote endpoint and raises [`ServerEvent`]s.

#[allow(clippy::module_inception)]
mod server;

pub use server::*;
