//! Self-healing client connection.
//!
//! A [`StatefulClient`] owns at most one live socket. When the socket drops
//! and auto-reconnect is on, a single background task retries with backoff,
//! raising [`ConnectionEvent::Reconnecting`] before every attempt so a
//! handler can fail over to another endpoint.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, info, trace, warn};

use crate::core::{
    CHUNK_SIZE_MASK, DEFAULT_CONNECT_TIMEOUT, DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_RECONNECT_DELAY,
    DEFAULT_SEND_WAIT, RECONNECT_BACKOFF_MAX, RECONNECT_BACKOFF_MIN,
};
use crate::crypto::CipherSuite;
use crate::transport::{
    framed, unix_millis, Connection, ConnectionEvent, ConnectionState, EventArgs, EventHub,
    FramedReader, FramedWriter, HeartbeatTiming, Packet, ReconnectBackoff, TransportError,
};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server endpoint.
    pub endpoint: SocketAddr,

    /// Cipher and key; plain by default.
    pub cipher: CipherSuite,

    /// Time allowed for one connect attempt.
    pub connect_timeout: Duration,

    /// How long `send` waits for a reconnect before failing.
    pub send_wait_timeout: Duration,

    /// Reconnect automatically after an unexpected drop.
    pub auto_reconnect: bool,

    /// Delay before the first reconnect attempt.
    pub reconnect_delay: Duration,

    /// Backoff floor.
    pub backoff_min: Duration,

    /// Backoff cap.
    pub backoff_max: Duration,

    /// Read-idle timeout; `None` disables heartbeats.
    pub heartbeat_timeout: Option<Duration>,

    /// Largest plaintext chunk per AEAD frame.
    pub max_chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: SocketAddr::from(([127, 0, 0, 1], 8388)),
            cipher: CipherSuite::plain(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            send_wait_timeout: DEFAULT_SEND_WAIT,
            auto_reconnect: true,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            backoff_min: RECONNECT_BACKOFF_MIN,
            backoff_max: RECONNECT_BACKOFF_MAX,
            heartbeat_timeout: Some(DEFAULT_HEARTBEAT_TIMEOUT),
            max_chunk_size: CHUNK_SIZE_MASK,
        }
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    /// Set the server endpoint.
    pub fn endpoint(mut self, addr: SocketAddr) -> Self {
        self.config.endpoint = addr;
        self
    }

    /// Set the cipher suite.
    pub fn cipher(mut self, suite: CipherSuite) -> Self {
        self.config.cipher = suite;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set how long `send` waits for a reconnect.
    pub fn send_wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_wait_timeout = timeout;
        self
    }

    /// Enable or disable auto-reconnect.
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.config.auto_reconnect = enabled;
        self
    }

    /// Set the delay before the first reconnect attempt.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    /// Set the backoff floor and cap.
    pub fn backoff(mut self, min: Duration, max: Duration) -> Self {
        self.config.backoff_min = min;
        self.config.backoff_max = max;
        self
    }

    /// Set the heartbeat timeout (`None` disables heartbeats).
    pub fn heartbeat_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.heartbeat_timeout = timeout;
        self
    }

    /// Set the largest plaintext chunk.
    pub fn max_chunk_size(mut self, size: usize) -> Self {
        self.config.max_chunk_size = size;
        self
    }

    /// Build the client configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The live socket of a client.
struct Link {
    id: u64,
    outbound: mpsc::UnboundedSender<Packet>,
    stop: Option<oneshot::Sender<()>>,
    local: SocketAddr,
}

struct ClientInner {
    config: ClientConfig,
    endpoint: RwLock<SocketAddr>,
    state: watch::Sender<ConnectionState>,
    auto_reconnect: AtomicBool,
    closed: AtomicBool,
    reconnecting: AtomicBool,
    connect_guard: AsyncMutex<()>,
    link: Mutex<Option<Link>>,
    next_link_id: AtomicU64,
    latency: Mutex<Option<Duration>>,
    events: EventHub<ConnectionEvent>,
}

/// A duplex connection that heals itself.
///
/// Dropping the client closes it.
pub struct StatefulClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for StatefulClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatefulClient")
            .field("endpoint", &self.inner.endpoint())
            .field("state", &self.inner.state())
            .finish()
    }
}

impl StatefulClient {
    /// Create a disconnected client.
    pub fn new(config: ClientConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let inner = ClientInner {
            endpoint: RwLock::new(config.endpoint),
            auto_reconnect: AtomicBool::new(config.auto_reconnect),
            config,
            state,
            closed: AtomicBool::new(false),
            reconnecting: AtomicBool::new(false),
            connect_guard: AsyncMutex::new(()),
            link: Mutex::new(None),
            next_link_id: AtomicU64::new(1),
            latency: Mutex::new(None),
            events: EventHub::new(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Connect, waiting up to the connect timeout.
    ///
    /// With auto-reconnect enabled a failed attempt keeps retrying in the
    /// background; the error is still returned to the caller.
    pub async fn connect(&self) -> Result<(), TransportError> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let guard = inner.connect_guard.lock().await;
        if inner.state() == ConnectionState::Connected {
            return Ok(());
        }

        let endpoint = inner.endpoint();
        inner.set_state(ConnectionState::Connecting);
        debug!(%endpoint, "connecting");
        match inner.open_link(endpoint).await {
            Ok(()) => {
                info!(%endpoint, "connected");
                inner.events.raise_async(ConnectionEvent::Connected { endpoint });
                Ok(())
            }
            Err(err) => {
                warn!(%endpoint, error = %err, "connect failed");
                inner.set_state(ConnectionState::Disconnected);
                drop(guard);
                inner.schedule_reconnect();
                Err(err)
            }
        }
    }

    /// Send a payload, waiting briefly for a reconnect if one is possible.
    ///
    /// Payloads larger than [`MAX_PACKET_BODY`](crate::core::MAX_PACKET_BODY)
    /// are refused before anything is written; the link stays up.
    pub async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        let len = payload.len();
        let packet = Packet::Data(payload);
        packet.validate()?;
        self.inner.send_packet(packet).await?;
        self.inner.events.raise_async(ConnectionEvent::Send { len });
        Ok(())
    }

    /// Send a heartbeat now.
    pub async fn ping(&self) -> Result<(), TransportError> {
        self.inner.send_packet(Packet::ping_now()).await
    }

    /// Close for good. Disables auto-reconnect.
    pub fn close(&self) {
        if self.inner.shutdown() {
            info!(endpoint = %self.inner.endpoint(), "client closed");
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Watch state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Wait until connected, closed, or `limit` elapses.
    pub async fn wait_connected(&self, limit: Duration) -> Result<(), TransportError> {
        self.inner.wait_connected(limit).await
    }

    /// Endpoint the next attempt will use.
    pub fn endpoint(&self) -> SocketAddr {
        self.inner.endpoint()
    }

    /// Point future connect attempts elsewhere.
    pub fn set_endpoint(&self, endpoint: SocketAddr) {
        *self.inner.endpoint.write() = endpoint;
    }

    /// Whether auto-reconnect is on.
    pub fn auto_reconnect(&self) -> bool {
        self.inner.auto_reconnect.load(Ordering::SeqCst)
    }

    /// Turn auto-reconnect on or off.
    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.inner.auto_reconnect.store(enabled, Ordering::SeqCst);
        if enabled {
            self.inner.schedule_reconnect();
        }
    }

    /// Round trip measured by the last pong.
    pub fn latency(&self) -> Option<Duration> {
        *self.inner.latency.lock()
    }

    /// Lifecycle events.
    pub fn events(&self) -> &EventHub<ConnectionEvent> {
        &self.inner.events
    }

    /// Local address of the live socket.
    pub fn local_endpoint(&self) -> Option<SocketAddr> {
        self.inner.link.lock().as_ref().map(|link| link.local)
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }
}

impl Drop for StatefulClient {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

#[async_trait]
impl Connection for StatefulClient {
    fn state(&self) -> ConnectionState {
        StatefulClient::state(self)
    }

    fn remote_endpoint(&self) -> SocketAddr {
        self.endpoint()
    }

    fn local_endpoint(&self) -> Option<SocketAddr> {
        StatefulClient::local_endpoint(self)
    }

    fn events(&self) -> &EventHub<ConnectionEvent> {
        StatefulClient::events(self)
    }

    async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        StatefulClient::send(self, payload).await
    }

    async fn close(&self) {
        StatefulClient::close(self)
    }
}

impl ClientInner {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn endpoint(&self) -> SocketAddr {
        *self.endpoint.read()
    }

    fn should_reconnect(&self) -> bool {
        self.auto_reconnect.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    /// Closing is terminal; every other transition goes through.
    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            trace!(from = %current, to = %next, "state change");
            *current = next;
            true
        });
    }

    async fn wait_connected(&self, limit: Duration) -> Result<(), TransportError> {
        let mut rx = self.state.subscribe();
        let waited = timeout(
            limit,
            rx.wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Closing)),
        )
        .await;
        match waited {
            Ok(Ok(state)) if *state == ConnectionState::Connected => Ok(()),
            Ok(_) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Disconnected),
        }
    }

    async fn send_packet(self: &Arc<Self>, packet: Packet) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        if self.state() != ConnectionState::Connected {
            if !self.auto_reconnect.load(Ordering::SeqCst) {
                return Err(TransportError::Disconnected);
            }
            self.schedule_reconnect();
            self.wait_connected(self.config.send_wait_timeout).await?;
        }

        let outbound = self
            .link
            .lock()
            .as_ref()
            .map(|link| link.outbound.clone())
            .ok_or(TransportError::Disconnected)?;
        outbound
            .send(packet)
            .map_err(|_| TransportError::Disconnected)
    }

    /// Connect a socket and start its I/O task. Caller holds `connect_guard`.
    async fn open_link(self: &Arc<Self>, endpoint: SocketAddr) -> Result<(), TransportError> {
        let limit = self.config.connect_timeout;
        let stream = match timeout(limit, TcpStream::connect(endpoint)).await {
            Err(_) => return Err(TransportError::ConnectTimeout(limit)),
            Ok(Err(e)) => return Err(TransportError::ConnectFailed(e)),
            Ok(Ok(stream)) => stream,
        };
        let (reader, writer) = framed(stream, &self.config.cipher, self.config.max_chunk_size)?;

        let id = self.next_link_id.fetch_add(1, Ordering::Relaxed);
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (stop, stop_rx) = oneshot::channel();
        {
            let mut link = self.link.lock();
            if self.closed.load(Ordering::SeqCst) {
                return Err(TransportError::Closed);
            }
            *link = Some(Link {
                id,
                outbound,
                stop: Some(stop),
                local: writer.local_addr(),
            });
        }
        self.set_state(ConnectionState::Connected);

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = inner.run_link(reader, writer, outbound_rx, stop_rx).await;
            inner.link_down(id, outcome);
        });
        Ok(())
    }

    async fn run_link(
        &self,
        mut reader: FramedReader,
        mut writer: FramedWriter,
        mut outbound: mpsc::UnboundedReceiver<Packet>,
        mut stop: oneshot::Receiver<()>,
    ) -> Result<(), TransportError> {
        let heartbeat = self.config.heartbeat_timeout.map(HeartbeatTiming::client);
        let (read_idle, write_idle) = heartbeat
            .map(|t| (t.read_idle, t.write_idle))
            .unwrap_or((Duration::MAX, Duration::MAX));
        let mut last_read = Instant::now();
        let mut last_write = Instant::now();

        loop {
            let read_deadline = deadline(last_read, read_idle);
            let write_deadline = deadline(last_write, write_idle);

            tokio::select! {
                _ = &mut stop => {
                    let _ = writer.shutdown().await;
                    return Ok(());
                }
                Some(packet) = outbound.recv() => {
                    writer.send(&packet).await?;
                    last_write = Instant::now();
                }
                received = reader.recv() => {
                    let Some(packet) = received? else {
                        return Ok(());
                    };
                    last_read = Instant::now();
                    match packet {
                        Packet::Data(payload) => {
                            self.events.raise_async(ConnectionEvent::Receive(payload));
                        }
                        Packet::Ping(ts) => {
                            writer.send(&Packet::Pong(ts)).await?;
                            last_write = Instant::now();
                        }
                        Packet::Pong(ts) => {
                            let latency = Duration::from_millis(unix_millis().saturating_sub(ts));
                            *self.latency.lock() = Some(latency);
                            trace!(?latency, "pong");
                            self.events.raise_async(ConnectionEvent::Pong { latency });
                        }
                    }
                }
                _ = sleep_until(write_deadline), if heartbeat.is_some() => {
                    writer.send(&Packet::ping_now()).await?;
                    last_write = Instant::now();
                    trace!("ping");
                }
                _ = sleep_until(read_deadline), if heartbeat.is_some() => {
                    return Err(TransportError::HeartbeatLost(read_idle));
                }
            }
        }
    }

    /// Tear down after a link's I/O task ends.
    fn link_down(self: &Arc<Self>, id: u64, outcome: Result<(), TransportError>) {
        {
            let mut link = self.link.lock();
            if link.as_ref().is_some_and(|l| l.id == id) {
                *link = None;
            }
        }

        let endpoint = self.endpoint();
        self.set_state(ConnectionState::Disconnected);
        match outcome {
            Ok(()) => info!(%endpoint, "disconnected"),
            Err(TransportError::HeartbeatLost(idle)) => {
                warn!(%endpoint, ?idle, "heartbeat lost, dropping socket");
            }
            Err(err) => {
                warn!(%endpoint, error = %err, "connection failed");
                let mut args = EventArgs::new(ConnectionEvent::Error(Arc::new(err)));
                self.events.raise(&mut args);
                if !args.is_handled() && self.shutdown() {
                    info!(%endpoint, "unhandled error, client closed");
                }
            }
        }

        self.events
            .raise_async(ConnectionEvent::Disconnected { endpoint });
        self.schedule_reconnect();
    }

    /// Start the reconnect task unless one is already running.
    fn schedule_reconnect(self: &Arc<Self>) {
        if !self.should_reconnect() || self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.reconnect_loop().await;
            inner.reconnecting.store(false, Ordering::SeqCst);
            // A drop may have raced with the loop's exit.
            if inner.state() == ConnectionState::Disconnected {
                inner.schedule_reconnect();
            }
        });
    }

    async fn reconnect_loop(self: &Arc<Self>) {
        let mut backoff = ReconnectBackoff::new(
            self.config.reconnect_delay,
            self.config.backoff_min,
            self.config.backoff_max,
        );

        loop {
            let delay = backoff.next_delay();
            sleep(delay).await;
            if !self.should_reconnect() || self.state() == ConnectionState::Connected {
                return;
            }

            let attempt = backoff.attempts();
            let args = self.events.emit(ConnectionEvent::Reconnecting {
                endpoint: self.endpoint(),
                attempt,
                delay,
            });
            if let Some(target) = args.redirect() {
                info!(from = %self.endpoint(), to = %target, "reconnect redirected");
                *self.endpoint.write() = target;
            }

            let _guard = self.connect_guard.lock().await;
            if !self.should_reconnect() || self.state() == ConnectionState::Connected {
                return;
            }

            let endpoint = self.endpoint();
            self.set_state(ConnectionState::Connecting);
            debug!(%endpoint, attempt, "reconnecting");
            match self.open_link(endpoint).await {
                Ok(()) => {
                    info!(%endpoint, attempt, "reconnected");
                    self.events
                        .raise_async(ConnectionEvent::Reconnected { endpoint });
                    return;
                }
                Err(err) => {
                    self.set_state(ConnectionState::Disconnected);
                    debug!(%endpoint, attempt, error = %err, next = ?backoff.peek(), "reconnect failed");
                }
            }
        }
    }

    /// Terminal close. Returns false if already closed.
    fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.auto_reconnect.store(false, Ordering::SeqCst);
        self.set_state(ConnectionState::Closing);
        if let Some(mut link) = self.link.lock().take() {
            if let Some(stop) = link.stop.take() {
                let _ = stop.send(());
            }
        }
        true
    }
}

fn deadline(from: Instant, idle: Duration) -> Instant {
    from.checked_add(idle)
        .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400 * 365))
}
