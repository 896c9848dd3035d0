//! Subscribable lifecycle events.
//!
//! Handlers are plain closures registered with [`EventHub::subscribe`].
//! [`EventHub::raise`] runs them inline on the caller's task, which is how
//! handlers get to answer back through [`EventArgs`] (redirect a reconnect,
//! mark an error handled). [`EventHub::raise_async`] queues the event for a
//! dispatcher task instead, so slow handlers never stall socket I/O.
//!
//! A panicking handler is logged and skipped; it never aborts the caller.

use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::error;

/// Handle returned by [`EventHub::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// An event plus the answers handlers may give.
#[derive(Debug)]
pub struct EventArgs<E> {
    event: E,
    handled: bool,
    redirect: Option<SocketAddr>,
}

impl<E> EventArgs<E> {
    /// Wrap an event.
    pub fn new(event: E) -> Self {
        Self {
            event,
            handled: false,
            redirect: None,
        }
    }

    /// The event.
    pub fn event(&self) -> &E {
        &self.event
    }

    /// Unwrap the event.
    pub fn into_event(self) -> E {
        self.event
    }

    /// Suppress the default reaction (closing on error).
    pub fn mark_handled(&mut self) {
        self.handled = true;
    }

    /// Whether a handler suppressed the default reaction.
    pub fn is_handled(&self) -> bool {
        self.handled
    }

    /// Ask the connection to reconnect somewhere else.
    pub fn redirect_to(&mut self, endpoint: SocketAddr) {
        self.redirect = Some(endpoint);
    }

    /// Endpoint requested by a handler, if any.
    pub fn redirect(&self) -> Option<SocketAddr> {
        self.redirect
    }
}

type Handler<E> = Arc<dyn Fn(&mut EventArgs<E>) + Send + Sync>;
type HandlerList<E> = Arc<RwLock<Vec<(SubscriptionId, Handler<E>)>>>;

/// A list of handlers for one event type.
pub struct EventHub<E> {
    handlers: HandlerList<E>,
    next_id: AtomicU64,
    dispatcher: OnceLock<mpsc::UnboundedSender<E>>,
}

impl<E: Send + 'static> Default for EventHub<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for EventHub<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("handlers", &self.handlers.read().len())
            .finish()
    }
}

impl<E: Send + 'static> EventHub<E> {
    /// Create a hub with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(1),
            dispatcher: OnceLock::new(),
        }
    }

    /// Register a handler.
    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&mut EventArgs<E>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(sid, _)| *sid != id);
        handlers.len() != before
    }

    /// Remove every handler.
    pub fn clear(&self) {
        self.handlers.write().clear();
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// True when nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Run every handler in subscription order on the current task.
    ///
    /// Returns false if any handler panicked.
    pub fn raise(&self, args: &mut EventArgs<E>) -> bool {
        dispatch(&self.handlers, args)
    }

    /// Shorthand for raising a bare event inline and returning the answers.
    pub fn emit(&self, event: E) -> EventArgs<E> {
        let mut args = EventArgs::new(event);
        self.raise(&mut args);
        args
    }

    /// Queue an event for the dispatcher task.
    ///
    /// Events from one hub are delivered in the order they were raised.
    /// Must be called from within a tokio runtime.
    pub fn raise_async(&self, event: E) {
        if self.is_empty() {
            return;
        }
        let tx = self.dispatcher.get_or_init(|| {
            let (tx, mut rx) = mpsc::unbounded_channel::<E>();
            let handlers = Arc::clone(&self.handlers);
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    let mut args = EventArgs::new(event);
                    dispatch(&handlers, &mut args);
                }
            });
            tx
        });
        let _ = tx.send(event);
    }
}

fn dispatch<E>(handlers: &HandlerList<E>, args: &mut EventArgs<E>) -> bool {
    let snapshot: Vec<Handler<E>> = handlers.read().iter().map(|(_, h)| Arc::clone(h)).collect();
    let mut ok = true;
    for handler in snapshot {
        if catch_unwind(AssertUnwindSafe(|| handler(args))).is_err() {
            error!("event handler panicked");
            ok = false;
        }
    }
    ok
}
