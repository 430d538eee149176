//! Scripted in-memory transport.
//!
//! Stands in for a real target in tests and embeddings: replies are scripted
//! per method and events are injected through the controller.
//!
//! # Example
//!
//! ```ignore
//! let (transport, controller) = MemoryTransportBuilder::new().build();
//! controller.respond("Page.navigate", json!({"frameId": "F1"}));
//! controller.hang("Tracing.end");
//! let session = ProtocolSession::new(Arc::new(transport), &GatherSettings::default());
//! controller.crash();
//! ```

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;
use webgather_core::{
    EventHandler, EventRelay, ProtocolEvent, SendOptions, Transport, TransportError,
    settings::{TARGET_CRASHED_EVENT, TARGET_DETACHED_EVENT},
};

/// Scripted outcome of a command.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Respond immediately.
    Respond(Value),
    /// Respond after a delay.
    Delay(Duration, Value),
    /// Fail immediately.
    Fail(TransportError),
    /// Never respond; the transport's own timeout eventually fires.
    Hang,
}

/// A command observed by the transport.
#[derive(Debug, Clone)]
pub struct SentCommand {
    pub method: String,
    pub params: Value,
    pub timeout: Duration,
}

struct Inner {
    id: String,
    persistent: Mutex<HashMap<String, Reply>>,
    queued: Mutex<HashMap<String, VecDeque<Reply>>>,
    unscripted: Reply,
    sent: Mutex<Vec<SentCommand>>,
    subscribers: EventRelay,
    closed: AtomicBool,
}

impl Inner {
    fn reply_for(&self, method: &str) -> Reply {
        let queued = self
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(method)
            .and_then(VecDeque::pop_front);
        if let Some(reply) = queued {
            return reply;
        }
        self.persistent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .cloned()
            .unwrap_or_else(|| self.unscripted.clone())
    }
}

/// Builder for [`MemoryTransport`].
pub struct MemoryTransportBuilder {
    id: Option<String>,
    unscripted: Reply,
}

impl MemoryTransportBuilder {
    /// Create a builder; unscripted commands respond with `{}`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: None,
            unscripted: Reply::Respond(Value::Object(serde_json::Map::new())),
        }
    }

    /// Use a fixed connection id instead of a random one.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Reply used for commands with no script.
    #[must_use]
    pub fn unscripted(mut self, reply: Reply) -> Self {
        self.unscripted = reply;
        self
    }

    /// Build the transport and its controller.
    #[must_use]
    pub fn build(self) -> (MemoryTransport, MemoryTransportController) {
        let inner = Arc::new(Inner {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            persistent: Mutex::new(HashMap::new()),
            queued: Mutex::new(HashMap::new()),
            unscripted: self.unscripted,
            sent: Mutex::new(Vec::new()),
            subscribers: EventRelay::new(),
            closed: AtomicBool::new(false),
        });
        (
            MemoryTransport {
                inner: Arc::clone(&inner),
            },
            MemoryTransportController { inner },
        )
    }
}

impl Default for MemoryTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory [`Transport`].
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn id(&self) -> &str {
        &self.inner.id
    }

    async fn send(
        &self,
        method: &str,
        params: Value,
        options: SendOptions,
    ) -> Result<Value, TransportError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        self.inner
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentCommand {
                method: method.to_string(),
                params,
                timeout: options.timeout,
            });

        match self.inner.reply_for(method) {
            Reply::Respond(value) => Ok(value),
            Reply::Delay(delay, value) => {
                if delay >= options.timeout {
                    tokio::time::sleep(options.timeout).await;
                    return Err(TransportError::Timeout);
                }
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            Reply::Fail(error) => Err(error),
            Reply::Hang => {
                tokio::time::sleep(options.timeout).await;
                Err(TransportError::Timeout)
            }
        }
    }

    fn subscribe(&self, event: &str, handler: EventHandler) {
        self.inner.subscribers.on(event, handler);
    }

    fn unsubscribe_all(&self) {
        self.inner.subscribers.clear();
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Controller for scripting replies, injecting events and inspecting traffic.
#[derive(Clone)]
pub struct MemoryTransportController {
    inner: Arc<Inner>,
}

impl MemoryTransportController {
    /// Reply to every call of `method` with `reply`.
    pub fn script(&self, method: &str, reply: Reply) {
        self.inner
            .persistent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.to_string(), reply);
    }

    /// Reply to the next call of `method` only; queued replies go before scripted ones.
    pub fn script_once(&self, method: &str, reply: Reply) {
        self.inner
            .queued
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(method.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn respond(&self, method: &str, value: Value) {
        self.script(method, Reply::Respond(value));
    }

    pub fn delay(&self, method: &str, delay: Duration, value: Value) {
        self.script(method, Reply::Delay(delay, value));
    }

    pub fn fail(&self, method: &str, error: TransportError) {
        self.script(method, Reply::Fail(error));
    }

    pub fn hang(&self, method: &str) {
        self.script(method, Reply::Hang);
    }

    /// Deliver an event to subscribers.
    pub fn emit(&self, event: &ProtocolEvent) {
        self.inner.subscribers.emit(event);
    }

    /// Deliver an event built from a name and payload.
    pub fn emit_event(&self, method: &str, params: Value) {
        self.emit(&ProtocolEvent::new(method, params));
    }

    /// Simulate a renderer crash.
    pub fn crash(&self) {
        self.emit_event(TARGET_CRASHED_EVENT, Value::Object(serde_json::Map::new()));
    }

    /// Simulate the inspector session being detached.
    pub fn detach(&self) {
        self.emit_event(
            TARGET_DETACHED_EVENT,
            serde_json::json!({"reason": "target_closed"}),
        );
    }

    /// Every command sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<SentCommand> {
        self.inner
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Method names of every command sent so far, in order.
    #[must_use]
    pub fn sent_methods(&self) -> Vec<String> {
        self.sent().into_iter().map(|c| c.method).collect()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.listener_count()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}
