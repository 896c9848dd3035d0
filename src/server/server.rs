//! TCP tunnel server.
//!
//! Accepts encrypted connections, keeps one [`Peer`] per remote endpoint and
//! answers heartbeats. Peers beyond the configured capacity are dropped right
//! after accept.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use crate::core::{CHUNK_SIZE_MASK, DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_SERVER_CAPACITY};
use crate::crypto::CipherSuite;
use crate::transport::{
    framed, EventArgs, EventHub, FramedReader, FramedWriter, Packet, TransportError,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,

    /// Cipher and key; plain by default.
    pub cipher: CipherSuite,

    /// Maximum number of concurrent peers.
    pub capacity: usize,

    /// Read-idle timeout per peer; `None` disables it.
    pub heartbeat_timeout: Option<Duration>,

    /// Largest plaintext chunk per AEAD frame.
    pub max_chunk_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8388)),
            cipher: CipherSuite::plain(),
            capacity: DEFAULT_SERVER_CAPACITY,
            heartbeat_timeout: Some(DEFAULT_HEARTBEAT_TIMEOUT),
            max_chunk_size: CHUNK_SIZE_MASK,
        }
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug)]
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    /// Create a new server builder.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Set the bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the cipher suite.
    pub fn cipher(mut self, suite: CipherSuite) -> Self {
        self.config.cipher = suite;
        self
    }

    /// Set the maximum number of concurrent peers.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Set the heartbeat timeout.
    pub fn heartbeat_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.heartbeat_timeout = timeout;
        self
    }

    /// Set the largest plaintext chunk.
    pub fn max_chunk_size(mut self, size: usize) -> Self {
        self.config.max_chunk_size = size;
        self
    }

    /// Build the server configuration.
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Events raised by the server.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A peer was accepted.
    PeerConnected {
        /// Remote endpoint.
        peer: SocketAddr,
    },

    /// A peer went away and was removed from the table.
    PeerDisconnected {
        /// Remote endpoint.
        peer: SocketAddr,
    },

    /// Payload from a peer.
    Receive {
        /// Remote endpoint.
        peer: SocketAddr,
        /// Decrypted payload.
        payload: Bytes,
    },

    /// A peer's connection failed or went idle.
    ///
    /// Raised inline before the peer is removed, so handlers can still look
    /// it up. Marking a heartbeat loss handled keeps the peer open and
    /// restarts its idle timer; with no handler the peer is closed. Stream
    /// failures (I/O, framing, decryption) always close the peer.
    Error {
        /// Remote endpoint.
        peer: SocketAddr,
        /// What went wrong.
        error: Arc<TransportError>,
    },
}

#[derive(Debug)]
enum PeerCommand {
    Send(Packet),
    Close,
}

/// Handle to one accepted connection.
#[derive(Debug, Clone)]
pub struct Peer {
    remote: SocketAddr,
    local: SocketAddr,
    tx: mpsc::UnboundedSender<PeerCommand>,
}

impl Peer {
    /// Remote endpoint.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Local endpoint of the accepted socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// True until the peer's task has ended.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Queue a payload for this peer.
    pub fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        let packet = Packet::Data(payload);
        packet.validate()?;
        self.tx
            .send(PeerCommand::Send(packet))
            .map_err(|_| TransportError::Disconnected)
    }

    /// Close the connection. The peer is removed once its task exits.
    pub fn close(&self) {
        let _ = self.tx.send(PeerCommand::Close);
    }
}

struct Shared {
    config: ServerConfig,
    peers: DashMap<SocketAddr, Peer>,
    events: EventHub<ServerEvent>,
}

/// A running TCP server.
///
/// # Example
///
/// ```ignore
/// use tunnel_core::server::{ServerBuilder, ServerEvent, TcpServer};
///
/// let server = TcpServer::bind(
///     ServerBuilder::new()
///         .bind_addr("0.0.0.0:8388".parse()?)
///         .cipher(CipherSuite::parse("aes-256-gcm", "secret")?)
///         .build(),
/// )
/// .await?;
///
/// let handle = server.handle();
/// server.events().subscribe(move |args| {
///     if let ServerEvent::Receive { peer, payload } = args.event() {
///         let _ = handle.send(*peer, payload.clone());
///     }
/// });
/// ```
pub struct TcpServer {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for TcpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpServer")
            .field("local_addr", &self.local_addr)
            .field("peers", &self.shared.peers.len())
            .finish()
    }
}

/// Cloneable view of a server's peer table.
#[derive(Clone)]
pub struct ServerHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("peers", &self.shared.peers.len())
            .finish()
    }
}

impl ServerHandle {
    /// Look up a live peer.
    pub fn peer(&self, addr: SocketAddr) -> Result<Peer, TransportError> {
        self.shared.peer(addr)
    }

    /// Send a payload to a peer.
    pub fn send(&self, addr: SocketAddr, payload: Bytes) -> Result<(), TransportError> {
        self.shared.peer(addr)?.send(payload)
    }
}

impl TcpServer {
    /// Bind and start accepting.
    pub async fn bind(config: ServerConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        let (shutdown, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            config,
            peers: DashMap::new(),
            events: EventHub::new(),
        });

        info!(%local_addr, capacity = shared.config.capacity, "server listening");
        tokio::spawn(accept_loop(listener, Arc::clone(&shared), shutdown_rx));

        Ok(Self {
            shared,
            local_addr,
            shutdown,
        })
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Server events.
    pub fn events(&self) -> &EventHub<ServerEvent> {
        &self.shared.events
    }

    /// Remote endpoints of all live peers.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.shared.peers.iter().map(|entry| *entry.key()).collect()
    }

    /// Number of live peers.
    pub fn peer_count(&self) -> usize {
        self.shared.peers.len()
    }

    /// Look up a live peer.
    pub fn peer(&self, addr: SocketAddr) -> Result<Peer, TransportError> {
        self.shared.peer(addr)
    }

    /// Send a payload to a peer.
    pub fn send(&self, addr: SocketAddr, payload: Bytes) -> Result<(), TransportError> {
        self.shared.peer(addr)?.send(payload)
    }

    /// A handle usable from event handlers.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop accepting and close every peer.
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!(local_addr = %self.local_addr, "server shutting down");
        }
    }

    /// The configuration this server was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn peer(&self, addr: SocketAddr) -> Result<Peer, TransportError> {
        self.peers
            .get(&addr)
            .map(|entry| entry.value().clone())
            .ok_or(TransportError::Disconnected)
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    if shared.peers.len() >= shared.config.capacity {
                        warn!(%remote, capacity = shared.config.capacity, "server full, rejecting peer");
                        drop(stream);
                        continue;
                    }
                    accept_peer(&shared, stream, remote, shutdown.clone());
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }

    for entry in shared.peers.iter() {
        entry.value().close();
    }
    debug!("accept loop stopped");
}

fn accept_peer(
    shared: &Arc<Shared>,
    stream: TcpStream,
    remote: SocketAddr,
    shutdown: watch::Receiver<bool>,
) {
    let (reader, writer) = match framed(stream, &shared.config.cipher, shared.config.max_chunk_size) {
        Ok(halves) => halves,
        Err(e) => {
            warn!(%remote, error = %e, "failed to set up peer");
            return;
        }
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let peer = Peer {
        remote,
        local: writer.local_addr(),
        tx,
    };
    shared.peers.insert(remote, peer);
    debug!(%remote, peers = shared.peers.len(), "peer accepted");
    shared
        .events
        .raise_async(ServerEvent::PeerConnected { peer: remote });

    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let outcome = run_peer(&shared, remote, reader, writer, rx, shutdown).await;

        match outcome {
            Ok(()) => debug!(%remote, "peer disconnected"),
            Err(TransportError::HeartbeatLost(idle)) => {
                info!(%remote, ?idle, "peer idle, closed");
            }
            Err(err) => {
                warn!(%remote, error = %err, "peer failed");
                raise_error(&shared, remote, err);
            }
        }
        shared.peers.remove(&remote);
        shared
            .events
            .raise_async(ServerEvent::PeerDisconnected { peer: remote });
    });
}

/// Raise an Error event inline while the peer is still in the table.
/// Returns whether a handler marked it handled.
fn raise_error(shared: &Shared, remote: SocketAddr, error: TransportError) -> bool {
    let mut args = EventArgs::new(ServerEvent::Error {
        peer: remote,
        error: Arc::new(error),
    });
    shared.events.raise(&mut args);
    args.is_handled()
}

async fn run_peer(
    shared: &Shared,
    remote: SocketAddr,
    mut reader: FramedReader,
    mut writer: FramedWriter,
    mut commands: mpsc::UnboundedReceiver<PeerCommand>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), TransportError> {
    let read_idle = shared.config.heartbeat_timeout;
    let mut last_read = Instant::now();

    loop {
        let read_deadline = read_idle
            .and_then(|idle| last_read.checked_add(idle))
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

        tokio::select! {
            _ = shutdown.changed() => {
                let _ = writer.shutdown().await;
                return Ok(());
            }
            command = commands.recv() => match command {
                Some(PeerCommand::Send(packet)) => writer.send(&packet).await?,
                Some(PeerCommand::Close) | None => {
                    let _ = writer.shutdown().await;
                    return Ok(());
                }
            },
            received = reader.recv() => {
                let Some(packet) = received? else {
                    return Ok(());
                };
                last_read = Instant::now();
                match packet {
                    Packet::Data(payload) => {
                        shared.events.raise_async(ServerEvent::Receive { peer: remote, payload });
                    }
                    Packet::Ping(ts) => writer.send(&Packet::Pong(ts)).await?,
                    Packet::Pong(_) => trace!(%remote, "unsolicited pong"),
                }
            }
            _ = sleep_until(read_deadline), if read_idle.is_some() => {
                let idle = read_idle.unwrap_or_default();
                if !raise_error(shared, remote, TransportError::HeartbeatLost(idle)) {
                    return Err(TransportError::HeartbeatLost(idle));
                }
                debug!(%remote, ?idle, "idle peer kept open by handler");
                last_read = Instant::now();
            }
        }
    }
}
