//! Keyed pool of stateful client connections.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::config::PoolConfig;
use super::error::PoolError;
use crate::client::{ClientConfig, StatefulClient};
use crate::transport::{Connection, ConnectionEvent, ConnectionState, EventHub, TransportError};

type Factory = Arc<dyn Fn(SocketAddr) -> ClientConfig + Send + Sync>;

/// A live connection owned by the pool. Holding the permit counts it
/// against `max_total`.
struct Entry {
    id: u64,
    client: Arc<StatefulClient>,
    idle_since: Instant,
    _permit: OwnedSemaphorePermit,
}

struct Slot {
    idle: Mutex<Vec<Entry>>,
    permits: Arc<Semaphore>,
    returned: Notify,
}

struct PoolInner {
    config: PoolConfig,
    factory: Factory,
    slots: DashMap<SocketAddr, Arc<Slot>>,
    live: DashMap<u64, Arc<StatefulClient>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
}

/// Keyed pool of [`StatefulClient`]s.
///
/// Each key is a server endpoint. Borrowing pops the most recently returned
/// idle connection, validating that it is still connected, and creates a new
/// one when none is usable and the key is under `max_total`.
///
/// Must be created inside a tokio runtime; an eviction task runs until the
/// pool is closed or dropped.
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("keys", &self.inner.slots.len())
            .field("live", &self.inner.live.len())
            .finish()
    }
}

impl ConnectionPool {
    /// Create a pool. `factory` supplies the client configuration per key;
    /// the pool overrides its endpoint and connect timeout.
    pub fn new<F>(config: PoolConfig, factory: F) -> Self
    where
        F: Fn(SocketAddr) -> ClientConfig + Send + Sync + 'static,
    {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let inner = Arc::new(PoolInner {
            config,
            factory: Arc::new(factory),
            slots: DashMap::new(),
            live: DashMap::new(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            shutdown,
        });

        tokio::spawn(eviction_loop(Arc::downgrade(&inner), shutdown_rx));
        Self { inner }
    }

    /// Borrow a connection for `key`.
    pub async fn borrow(&self, key: SocketAddr) -> Result<PooledConnection, PoolError> {
        let inner = &self.inner;
        let started = Instant::now();
        let deadline = started + inner.config.borrow_timeout;
        let slot = inner.slot(key);

        loop {
            if inner.closed.load(Ordering::SeqCst) {
                return Err(PoolError::Closed);
            }

            if let Some(entry) = inner.take_idle(&slot, key) {
                trace!(%key, id = entry.id, "reusing idle connection");
                return Ok(inner.lend(key, entry));
            }

            match Arc::clone(&slot.permits).try_acquire_owned() {
                Ok(permit) => {
                    let entry = inner.create(key, permit, deadline).await?;
                    return Ok(inner.lend(key, entry));
                }
                Err(TryAcquireError::Closed) => return Err(PoolError::Closed),
                Err(TryAcquireError::NoPermits) => {}
            }

            tokio::select! {
                _ = slot.returned.notified() => {}
                permit = Arc::clone(&slot.permits).acquire_owned() => {
                    let permit = permit.map_err(|_| PoolError::Closed)?;
                    let entry = inner.create(key, permit, deadline).await?;
                    return Ok(inner.lend(key, entry));
                }
                _ = sleep_until(deadline) => {
                    let waited = started.elapsed();
                    debug!(%key, ?waited, "pool exhausted");
                    return Err(PoolError::Exhausted { key, waited });
                }
            }
        }
    }

    /// Idle connections for `key`.
    pub fn idle_count(&self, key: SocketAddr) -> usize {
        self.inner
            .slots
            .get(&key)
            .map(|slot| slot.idle.lock().len())
            .unwrap_or(0)
    }

    /// Borrowed connections for `key`.
    pub fn active_count(&self, key: SocketAddr) -> usize {
        self.inner
            .slots
            .get(&key)
            .map(|slot| {
                let idle = slot.idle.lock().len();
                self.inner
                    .config
                    .max_total
                    .saturating_sub(slot.permits.available_permits())
                    .saturating_sub(idle)
            })
            .unwrap_or(0)
    }

    /// Live connections across all keys.
    pub fn live_count(&self) -> usize {
        self.inner.live.len()
    }

    /// The pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Reject further borrows and close every connection, borrowed or idle.
    pub fn close(&self) {
        self.inner.close();
    }

    /// True once closed.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.inner.close();
    }
}

/// Time left for a connect attempt before the borrow deadline.
fn connect_budget(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

impl PoolInner {
    fn slot(&self, key: SocketAddr) -> Arc<Slot> {
        let slot = self.slots.entry(key).or_insert_with(|| {
            Arc::new(Slot {
                idle: Mutex::new(Vec::new()),
                permits: Arc::new(Semaphore::new(self.config.max_total)),
                returned: Notify::new(),
            })
        });
        Arc::clone(slot.value())
    }

    /// Pop idle entries newest first, destroying any that fail validation.
    fn take_idle(&self, slot: &Slot, key: SocketAddr) -> Option<Entry> {
        loop {
            let entry = slot.idle.lock().pop()?;
            if entry.client.state() == ConnectionState::Connected {
                return Some(entry);
            }
            self.destroy(key, entry, "failed validation");
        }
    }

    /// Connect a new client; the attempt may use whatever is left of `deadline`.
    async fn create(
        &self,
        key: SocketAddr,
        permit: OwnedSemaphorePermit,
        deadline: Instant,
    ) -> Result<Entry, PoolError> {
        let mut config = (self.factory)(key);
        config.endpoint = key;
        config.connect_timeout = connect_budget(deadline);

        let client = StatefulClient::new(config);
        if let Err(e) = client.connect().await {
            warn!(%key, error = %e, "pool connect failed");
            return Err(PoolError::Connect(e));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let client = Arc::new(client);
        self.live.insert(id, Arc::clone(&client));
        if self.closed.load(Ordering::SeqCst) {
            self.live.remove(&id);
            client.close();
            return Err(PoolError::Closed);
        }

        debug!(%key, id, live = self.live.len(), "connection created");
        Ok(Entry {
            id,
            client,
            idle_since: Instant::now(),
            _permit: permit,
        })
    }

    fn lend(self: &Arc<Self>, key: SocketAddr, entry: Entry) -> PooledConnection {
        PooledConnection {
            client: Arc::clone(&entry.client),
            key,
            pool: Arc::clone(self),
            lease: Mutex::new(Some(entry)),
        }
    }

    /// Passivate and either idle or destroy a returned entry.
    fn give_back(&self, key: SocketAddr, mut entry: Entry, invalidate: bool) {
        entry.client.events().clear();
        entry.client.set_auto_reconnect(false);

        let reason = if invalidate {
            Some("invalidated")
        } else if self.closed.load(Ordering::SeqCst) {
            Some("pool closed")
        } else if self.config.exclusive {
            Some("exclusive mode")
        } else if entry.client.state() != ConnectionState::Connected {
            Some("not connected")
        } else {
            None
        };

        let slot = self.slot(key);
        let Some(reason) = reason else {
            let mut idle = slot.idle.lock();
            if idle.len() < self.config.max_idle {
                entry.idle_since = Instant::now();
                trace!(%key, id = entry.id, "connection returned");
                idle.push(entry);
                drop(idle);
                slot.returned.notify_one();
                return;
            }
            drop(idle);
            self.destroy(key, entry, "max idle reached");
            return;
        };
        self.destroy(key, entry, reason);
    }

    fn destroy(&self, key: SocketAddr, entry: Entry, reason: &'static str) {
        self.live.remove(&entry.id);
        entry.client.close();
        debug!(%key, id = entry.id, reason, "connection destroyed");
    }

    /// Destroy idle entries past the idle timeout.
    fn evict(&self) {
        let slots: Vec<(SocketAddr, Arc<Slot>)> = self
            .slots
            .iter()
            .map(|s| (*s.key(), Arc::clone(s.value())))
            .collect();

        for (key, slot) in slots {
            let expired: Vec<Entry> = {
                let mut idle = slot.idle.lock();
                let (expired, keep): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut *idle)
                    .into_iter()
                    .partition(|e| e.idle_since.elapsed() >= self.config.idle_timeout);
                *idle = keep;
                expired
            };
            for entry in expired {
                self.destroy(key, entry, "idle timeout");
            }
        }
    }

    /// Create connections until every known key has `min_idle` idle.
    async fn fill_min_idle(&self) {
        if self.config.min_idle == 0 {
            return;
        }
        let slots: Vec<(SocketAddr, Arc<Slot>)> = self
            .slots
            .iter()
            .map(|s| (*s.key(), Arc::clone(s.value())))
            .collect();

        for (key, slot) in slots {
            loop {
                let idle = slot.idle.lock().len();
                if idle >= self.config.min_idle {
                    break;
                }
                let Ok(permit) = Arc::clone(&slot.permits).try_acquire_owned() else {
                    break;
                };
                let deadline = Instant::now() + self.config.borrow_timeout;
                match self.create(key, permit, deadline).await {
                    Ok(entry) => {
                        slot.idle.lock().push(entry);
                        slot.returned.notify_one();
                    }
                    Err(e) => {
                        debug!(%key, error = %e, "min idle top-up failed");
                        break;
                    }
                }
            }
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.send_replace(true);

        for slot in self.slots.iter() {
            slot.permits.close();
            let idle = std::mem::take(&mut *slot.idle.lock());
            for entry in idle {
                self.destroy(*slot.key(), entry, "pool closed");
            }
        }
        for client in self.live.iter() {
            client.value().close();
        }
        info!(live = self.live.len(), "pool closed");
    }
}

async fn eviction_loop(pool: Weak<PoolInner>, mut shutdown: watch::Receiver<bool>) {
    let period = match pool.upgrade() {
        Some(inner) => inner.config.eviction_interval.max(Duration::from_millis(1)),
        None => return,
    };
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let Some(inner) = pool.upgrade() else { break };
                inner.evict();
                inner.fill_min_idle().await;
            }
        }
    }
    trace!("eviction loop stopped");
}

/// A borrowed connection. Returned to the pool on [`close`](Self::close) or
/// drop, destroyed on [`invalidate`](Self::invalidate).
pub struct PooledConnection {
    client: Arc<StatefulClient>,
    key: SocketAddr,
    pool: Arc<PoolInner>,
    lease: Mutex<Option<Entry>>,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("key", &self.key)
            .field("state", &Connection::state(self))
            .finish()
    }
}

impl PooledConnection {
    /// Key this connection was borrowed for.
    pub fn key(&self) -> SocketAddr {
        self.key
    }

    /// The underlying client.
    pub fn client(&self) -> &StatefulClient {
        &self.client
    }

    /// True until returned or invalidated.
    pub fn is_leased(&self) -> bool {
        self.lease.lock().is_some()
    }

    /// Destroy instead of returning.
    pub fn invalidate(&self) {
        self.release(true);
    }

    fn release(&self, invalidate: bool) {
        let entry = self.lease.lock().take();
        if let Some(entry) = entry {
            self.pool.give_back(self.key, entry, invalidate);
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.release(false);
    }
}

#[async_trait]
impl Connection for PooledConnection {
    fn state(&self) -> ConnectionState {
        if self.is_leased() {
            self.client.state()
        } else {
            ConnectionState::Closing
        }
    }

    fn remote_endpoint(&self) -> SocketAddr {
        self.client.endpoint()
    }

    fn local_endpoint(&self) -> Option<SocketAddr> {
        self.client.local_endpoint()
    }

    fn events(&self) -> &EventHub<ConnectionEvent> {
        self.client.events()
    }

    async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        if !self.is_leased() {
            return Err(TransportError::Closed);
        }
        self.client.send(payload).await
    }

    /// Return the connection to the pool.
    async fn close(&self) {
        self.release(false);
    }
}
