//! Acknowledged datagram channel.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::sync::{oneshot, watch};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::dedup::{Admission, DedupTable};
use super::error::UdpError;
use super::message::{AckMode, Datagram, UdpMessage};
use crate::core::{
    DEDUP_SWEEP_INTERVAL, DEFAULT_ACK_TIMEOUT, DEFAULT_MAX_RESEND, DEFAULT_MESSAGE_ALIVE,
    UDP_LARGE_PACKET_WARN, UDP_RECV_BUFFER_SIZE,
};
use crate::crypto::CipherSuite;
use crate::transport::{DatagramCodec, EventArgs, EventHub};

/// Reliable UDP configuration.
#[derive(Debug, Clone)]
pub struct UdpConfig {
    /// Default time to wait for an ack.
    pub ack_timeout: Duration,

    /// Resends before giving up.
    pub max_resend: u32,

    /// How long receivers remember a message id; never shorter than the
    /// resend window of the send that stamps it.
    pub message_alive: Duration,

    /// Receive buffer size.
    pub recv_buffer_size: usize,

    /// Datagrams larger than this are logged.
    pub large_packet_warn: usize,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_resend: DEFAULT_MAX_RESEND,
            message_alive: DEFAULT_MESSAGE_ALIVE,
            recv_buffer_size: UDP_RECV_BUFFER_SIZE,
            large_packet_warn: UDP_LARGE_PACKET_WARN,
        }
    }
}

/// Builder for [`UdpConfig`].
#[derive(Debug)]
pub struct UdpBuilder {
    config: UdpConfig,
}

impl UdpBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: UdpConfig::default(),
        }
    }

    /// Set the default ack timeout.
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.ack_timeout = timeout;
        self
    }

    /// Set the resend budget.
    pub fn max_resend(mut self, max: u32) -> Self {
        self.config.max_resend = max;
        self
    }

    /// Set how long receivers remember ids.
    pub fn message_alive(mut self, alive: Duration) -> Self {
        self.config.message_alive = alive;
        self
    }

    /// Set the receive buffer size.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.config.recv_buffer_size = size;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> UdpConfig {
        self.config
    }
}

impl Default for UdpBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Events raised by a channel.
#[derive(Debug, Clone)]
pub enum UdpEvent {
    /// An application message arrived.
    Receive {
        /// Sender.
        from: SocketAddr,
        /// Sender-assigned id.
        id: u64,
        /// Payload.
        payload: Bytes,
    },
}

struct Shared {
    socket: UdpSocket,
    codec: DatagramCodec,
    config: UdpConfig,
    next_id: AtomicU64,
    pending: DashMap<u64, oneshot::Sender<()>>,
    dedup: DedupTable,
    events: EventHub<UdpEvent>,
    closed: watch::Sender<bool>,
}

/// A UDP socket with per-message acknowledgment, resend and dedup.
///
/// Closing (or dropping) the channel fails every outstanding send with
/// [`UdpError::Closed`].
pub struct ReliableUdpChannel {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
}

impl std::fmt::Debug for ReliableUdpChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableUdpChannel")
            .field("local_addr", &self.local_addr)
            .field("pending", &self.shared.pending.len())
            .finish()
    }
}

impl ReliableUdpChannel {
    /// Bind a channel. `None` means datagrams travel in plaintext.
    pub async fn bind(
        addr: SocketAddr,
        config: UdpConfig,
        cipher: Option<CipherSuite>,
    ) -> Result<Self, UdpError> {
        let socket = UdpSocket::bind(addr).await?;
        let local_addr = socket.local_addr()?;
        let (closed, closed_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            socket,
            codec: DatagramCodec::new(cipher.unwrap_or_default()),
            config,
            next_id: AtomicU64::new(1),
            pending: DashMap::new(),
            dedup: DedupTable::new(),
            events: EventHub::new(),
            closed,
        });

        info!(%local_addr, cipher = %shared.codec.suite().kind(), "udp channel bound");
        tokio::spawn(recv_loop(Arc::clone(&shared), closed_rx.clone()));
        tokio::spawn(sweep_loop(Arc::clone(&shared), closed_rx));

        Ok(Self { shared, local_addr })
    }

    /// Address the channel is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Channel events.
    pub fn events(&self) -> &EventHub<UdpEvent> {
        &self.shared.events
    }

    /// Messages still waiting for an ack.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// The configuration this channel was built with.
    pub fn config(&self) -> &UdpConfig {
        &self.shared.config
    }

    /// Send with the configured ack timeout.
    pub async fn send(
        &self,
        dest: SocketAddr,
        payload: Bytes,
        mode: AckMode,
    ) -> Result<u64, UdpError> {
        self.send_async(dest, payload, mode, self.shared.config.ack_timeout)
            .await
    }

    /// Send one message and wait according to `mode`.
    ///
    /// With [`AckMode::None`] this resolves after the first write. Otherwise
    /// the message is resent up to `max_resend` times, evenly spaced inside
    /// `ack_timeout`, and the send fails with [`UdpError::AckTimeout`] once
    /// `ack_timeout` has elapsed without an ack. Returns the message id.
    ///
    /// Receivers remember the id for at least the whole resend window, so a
    /// late resend is never delivered twice.
    pub async fn send_async(
        &self,
        dest: SocketAddr,
        payload: Bytes,
        mode: AckMode,
        ack_timeout: Duration,
    ) -> Result<u64, UdpError> {
        let shared = &self.shared;
        if *shared.closed.borrow() {
            return Err(UdpError::Closed);
        }

        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let resend_every = resend_interval(ack_timeout, shared.config.max_resend);
        let message = UdpMessage {
            id,
            ack_mode: mode,
            alive: shared
                .config
                .message_alive
                .max(ack_timeout.saturating_add(resend_every)),
            payload,
        };
        let wire = shared.seal(&Datagram::Message(message))?;

        if mode == AckMode::None {
            shared.transmit(&wire, dest).await?;
            return Ok(id);
        }

        let (tx, acked) = oneshot::channel();
        shared.pending.insert(id, tx);
        let outcome = shared
            .await_ack(id, dest, &wire, acked, ack_timeout, resend_every)
            .await;
        shared.pending.remove(&id);
        outcome.map(|()| id)
    }

    /// Stop receiving and fail every outstanding send.
    pub fn close(&self) {
        if !self.shared.closed.send_replace(true) {
            self.shared.pending.clear();
            info!(local_addr = %self.local_addr, "udp channel closed");
        }
    }
}

impl Drop for ReliableUdpChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl Shared {
    fn seal(&self, datagram: &Datagram) -> Result<Bytes, UdpError> {
        Ok(self.codec.seal(&datagram.encode())?)
    }

    fn open(&self, packet: &[u8]) -> Result<Datagram, UdpError> {
        Datagram::decode(self.codec.open(packet)?)
    }

    async fn transmit(&self, wire: &[u8], dest: SocketAddr) -> Result<(), UdpError> {
        if wire.len() > self.config.large_packet_warn {
            warn!(
                %dest,
                size = wire.len(),
                limit = self.config.large_packet_warn,
                "udp packet larger than recommended"
            );
        }
        self.socket.send_to(wire, dest).await?;
        Ok(())
    }

    async fn await_ack(
        &self,
        id: u64,
        dest: SocketAddr,
        wire: &[u8],
        mut acked: oneshot::Receiver<()>,
        ack_timeout: Duration,
        resend_every: Duration,
    ) -> Result<(), UdpError> {
        let max_resend = self.config.max_resend;
        let start = Instant::now();
        let deadline = start + ack_timeout;
        let mut next_resend = start + resend_every;

        self.transmit(wire, dest).await?;
        let mut resends = 0;
        loop {
            tokio::select! {
                biased;
                result = &mut acked => {
                    return result.map_err(|_| UdpError::Closed);
                }
                _ = sleep_until(deadline) => {
                    warn!(id, %dest, resends, "ack timeout");
                    return Err(UdpError::AckTimeout { id, resends });
                }
                _ = sleep_until(next_resend), if resends < max_resend && next_resend < deadline => {
                    resends += 1;
                    next_resend += resend_every;
                    debug!(id, %dest, resends, "resending");
                    self.transmit(wire, dest).await?;
                }
            }
        }
    }

    async fn send_ack(&self, id: u64, to: SocketAddr) {
        let sent = match self.seal(&Datagram::Ack(id)) {
            Ok(wire) => self.transmit(&wire, to).await,
            Err(e) => Err(e),
        };
        match sent {
            Ok(()) => trace!(id, %to, "ack sent"),
            Err(e) => debug!(id, %to, error = %e, "ack send failed"),
        }
    }

    fn on_ack(&self, id: u64, from: SocketAddr) {
        match self.pending.remove(&id) {
            Some((_, waiter)) => {
                let _ = waiter.send(());
                debug!(id, %from, "ack received");
            }
            None => trace!(id, %from, "late ack"),
        }
    }
}

/// Spacing between resends: `max_resend` copies fit strictly inside the window.
fn resend_interval(ack_timeout: Duration, max_resend: u32) -> Duration {
    (ack_timeout / max_resend.saturating_add(1)).max(Duration::from_millis(1))
}

async fn on_message(shared: &Arc<Shared>, message: UdpMessage, from: SocketAddr) {
    let UdpMessage {
        id,
        ack_mode,
        alive,
        payload,
    } = message;
    let event = UdpEvent::Receive { from, id, payload };

    match ack_mode {
        AckMode::None => shared.events.raise_async(event),
        AckMode::Semi => {
            if shared.dedup.admit(from, id, alive) != Admission::Fresh {
                debug!(id, %from, "duplicate, re-acking");
                shared.send_ack(id, from).await;
                return;
            }
            shared.dedup.complete(from, id, alive);
            shared.send_ack(id, from).await;
            shared.events.raise_async(event);
        }
        AckMode::Full => match shared.dedup.admit(from, id, alive) {
            Admission::Fresh => {
                let shared = Arc::clone(shared);
                tokio::spawn(async move {
                    let events = Arc::clone(&shared);
                    let delivered = tokio::task::spawn_blocking(move || {
                        let mut args = EventArgs::new(event);
                        events.events.raise(&mut args)
                    })
                    .await
                    .unwrap_or(false);

                    if delivered {
                        shared.dedup.complete(from, id, alive);
                        shared.send_ack(id, from).await;
                    } else {
                        warn!(id, %from, "handler failed, message left unacknowledged");
                        shared.dedup.forget(from, id);
                    }
                });
            }
            Admission::Consumed => {
                debug!(id, %from, "duplicate, re-acking");
                shared.send_ack(id, from).await;
            }
            Admission::InFlight => debug!(id, %from, "duplicate while processing, dropped"),
        },
    }
}

async fn recv_loop(shared: Arc<Shared>, mut closed: watch::Receiver<bool>) {
    let mut buf = vec![0u8; shared.config.recv_buffer_size.max(1)];
    loop {
        let (n, from) = tokio::select! {
            _ = closed.changed() => break,
            received = shared.socket.recv_from(&mut buf) => match received {
                Ok(v) => v,
                Err(e) => {
                    debug!(error = %e, "udp receive failed");
                    continue;
                }
            },
        };

        match shared.open(&buf[..n]) {
            Ok(Datagram::Ack(id)) => shared.on_ack(id, from),
            Ok(Datagram::Message(message)) => on_message(&shared, message, from).await,
            Err(e) => debug!(%from, size = n, error = %e, "dropping datagram"),
        }
    }
    debug!("udp receive loop stopped");
}

async fn sweep_loop(shared: Arc<Shared>, mut closed: watch::Receiver<bool>) {
    let mut ticker = interval(DEDUP_SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = closed.changed() => break,
            _ = ticker.tick() => {
                let removed = shared.dedup.purge_expired();
                if removed > 0 {
                    trace!(removed, remaining = shared.dedup.len(), "dedup sweep");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CipherKind;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    fn any_local() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    #[test]
    fn test_builder() {
        let config = UdpBuilder::new().max_resend(5).build();
        assert_eq!(config.max_resend, 5);
        assert_eq!(config.ack_timeout, DEFAULT_ACK_TIMEOUT);
        assert_eq!(config.large_packet_warn, UDP_LARGE_PACKET_WARN);
    }

    #[test]
    fn test_resends_fit_inside_timeout() {
        let every = resend_interval(Duration::from_millis(300), 2);
        assert_eq!(every, Duration::from_millis(100));
        assert!(every * 2 < Duration::from_millis(300));

        assert_eq!(resend_interval(Duration::from_millis(300), 0), Duration::from_millis(300));
        assert_eq!(resend_interval(Duration::ZERO, 2), Duration::from_millis(1));
        assert!(resend_interval(Duration::from_secs(1), u32::MAX) >= Duration::from_millis(1));
    }

    #[tokio::test]
    async fn test_semi_round_trip_encrypted() {
        let suite = CipherSuite::new(CipherKind::Aes256Gcm, "udp-test");
        let a = ReliableUdpChannel::bind(any_local(), UdpConfig::default(), Some(suite.clone()))
            .await
            .unwrap();
        let b = ReliableUdpChannel::bind(any_local(), UdpConfig::default(), Some(suite))
            .await
            .unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        b.events().subscribe(move |args| {
            let UdpEvent::Receive { payload, id, .. } = args.event();
            let _ = tx.send((*id, payload.clone()));
        });

        let id = a
            .send_async(b.local_addr(), Bytes::from_static(b"hello"), AckMode::Semi, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(rx.recv().await.unwrap(), (1, Bytes::from_static(b"hello")));
        assert_eq!(a.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_ids_increase() {
        let a = ReliableUdpChannel::bind(any_local(), UdpConfig::default(), None).await.unwrap();
        let sink = UdpSocket::bind(any_local()).await.unwrap();
        let dest = sink.local_addr().unwrap();

        let first = a.send(dest, Bytes::new(), AckMode::None).await.unwrap();
        let second = a.send(dest, Bytes::new(), AckMode::None).await.unwrap();
        assert_eq!((first, second), (1, 2));
    }

    #[tokio::test]
    async fn test_full_panicking_handler_is_not_acked() {
        let config = UdpBuilder::new().max_resend(1).build();
        let a = ReliableUdpChannel::bind(any_local(), config, None).await.unwrap();
        let b = ReliableUdpChannel::bind(any_local(), UdpConfig::default(), None).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        b.events().subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            panic!("handler failure");
        });

        let err = a
            .send_async(b.local_addr(), Bytes::from_static(b"x"), AckMode::Full, Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, UdpError::AckTimeout { id: 1, resends: 1 }));
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_wrong_key_is_dropped() {
        let a = ReliableUdpChannel::bind(
            any_local(),
            UdpBuilder::new().max_resend(1).build(),
            Some(CipherSuite::new(CipherKind::ChaCha20Poly1305, "one")),
        )
        .await
        .unwrap();
        let b = ReliableUdpChannel::bind(
            any_local(),
            UdpConfig::default(),
            Some(CipherSuite::new(CipherKind::ChaCha20Poly1305, "two")),
        )
        .await
        .unwrap();

        let err = a
            .send_async(b.local_addr(), Bytes::from_static(b"x"), AckMode::Semi, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, UdpError::AckTimeout { .. }));
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_new_sends() {
        let a = Arc::new(
            ReliableUdpChannel::bind(any_local(), UdpConfig::default(), None)
                .await
                .unwrap(),
        );
        let sink = UdpSocket::bind(any_local()).await.unwrap();
        let dest = sink.local_addr().unwrap();

        let sender = Arc::clone(&a);
        let waiting = tokio::spawn(async move {
            sender
                .send_async(dest, Bytes::from_static(b"x"), AckMode::Full, Duration::from_secs(30))
                .await
        });
        tokio::time::timeout(Duration::from_secs(5), async {
            while a.pending_count() == 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        a.close();
        assert!(matches!(waiting.await.unwrap(), Err(UdpError::Closed)));
        assert!(matches!(
            a.send(dest, Bytes::new(), AckMode::None).await,
            Err(UdpError::Closed)
        ));
    }
}
