//! Observer registry that fans protocol events out to subscribers.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::StreamExt;
use tokio::sync::{broadcast, oneshot};
use tokio_stream::wrappers::BroadcastStream;

use crate::traits::{EventHandler, ProtocolEvent, WILDCARD_EVENT};

/// Capacity of the live event channel backing [`EventRelay::stream`].
const STREAM_CAPACITY: usize = 1024;

/// Handle returned by [`EventRelay::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    handler: EventHandler,
    once: bool,
}

/// Event relay with named listeners and a live stream.
///
/// Handlers are invoked synchronously in registration order, outside the
/// registry lock, so a handler may register or remove listeners.
pub struct EventRelay {
    listeners: RwLock<HashMap<String, Vec<Listener>>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<ProtocolEvent>,
}

impl Default for EventRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRelay {
    /// Create an empty relay.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(STREAM_CAPACITY);
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            sender,
        }
    }

    /// Register a handler for `event` (or [`WILDCARD_EVENT`]).
    pub fn on(&self, event: &str, handler: EventHandler) -> ListenerId {
        self.register(event, handler, false)
    }

    /// Register a handler that is removed after its first delivery.
    pub fn on_once(&self, event: &str, handler: EventHandler) -> ListenerId {
        self.register(event, handler, true)
    }

    /// Resolve with the next delivery of `event`.
    ///
    /// The listener is registered eagerly, before the future is first polled.
    pub fn once(&self, event: &str) -> impl Future<Output = Option<ProtocolEvent>> + Send + use<> {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        self.on_once(
            event,
            Arc::new(move |ev: &ProtocolEvent| {
                if let Some(tx) = slot.lock().unwrap_or_else(PoisonError::into_inner).take() {
                    let _ = tx.send(ev.clone());
                }
            }),
        );
        async move { rx.await.ok() }
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut removed = false;
        for group in listeners.values_mut() {
            let before = group.len();
            group.retain(|l| l.id != id);
            removed |= group.len() != before;
        }
        listeners.retain(|_, group| !group.is_empty());
        removed
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Deliver an event to named listeners, wildcard listeners, then streams.
    pub fn emit(&self, event: &ProtocolEvent) {
        let handlers = self.take_handlers(&event.method);
        for handler in handlers {
            handler(event);
        }
        let _ = self.sender.send(event.clone());
    }

    /// Get a receiver for live events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ProtocolEvent> {
        self.sender.subscribe()
    }

    /// Stream of every event emitted from now on.
    ///
    /// Events dropped because the subscriber lagged are skipped.
    #[must_use]
    pub fn stream(&self) -> futures::stream::BoxStream<'static, ProtocolEvent> {
        BroadcastStream::new(self.subscribe())
            .filter_map(|res| async move { res.ok() })
            .boxed()
    }

    fn register(&self, event: &str, handler: EventHandler, once: bool) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.to_string())
            .or_default()
            .push(Listener { id, handler, once });
        id
    }

    /// Snapshot the handlers for `method`, dropping one-shot listeners.
    fn take_handlers(&self, method: &str) -> Vec<EventHandler> {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut handlers = Vec::new();
        for key in [method, WILDCARD_EVENT] {
            if let Some(group) = listeners.get_mut(key) {
                handlers.extend(group.iter().map(|l| Arc::clone(&l.handler)));
                group.retain(|l| !l.once);
                if group.is_empty() {
                    listeners.remove(key);
                }
            }
            if method == WILDCARD_EVENT {
                break;
            }
        }
        handlers
    }
}
