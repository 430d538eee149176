//! WebSocket transport to a DevTools endpoint.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;
use webgather_core::{
    EventHandler, EventRelay, ProtocolEvent, SendOptions, Transport, TransportError,
    settings::TRANSPORT_DISCONNECTED_EVENT,
};

use crate::protocol::{CdpMessage, CdpRequest};

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, TransportError>>>>>;

/// Transport over a DevTools WebSocket, e.g. `ws://127.0.0.1:9222/devtools/page/<id>`.
///
/// A reader task correlates responses by id and dispatches events; a writer
/// task drains outbound frames. When the socket closes, pending commands fail
/// with `TransportError::Closed` and subscribers receive a
/// `Transport.disconnected` event.
pub struct WebSocketTransport {
    id: String,
    next_id: AtomicU64,
    outbound: mpsc::UnboundedSender<Message>,
    pending: Pending,
    subscribers: Arc<EventRelay>,
    closed: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl WebSocketTransport {
    /// Connect to a DevTools WebSocket URL.
    ///
    /// # Errors
    /// Returns `TransportError::Io` if the handshake fails.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let (mut sink, mut source) = stream.split();
        tracing::debug!(url, "Connected to DevTools endpoint");

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let subscribers = Arc::new(EventRelay::new());
        let closed = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    tracing::error!("WebSocket write failed: {e}");
                    break;
                }
            }
        });

        let reader = {
            let pending = Arc::clone(&pending);
            let subscribers = Arc::clone(&subscribers);
            let closed = Arc::clone(&closed);
            tokio::spawn(async move {
                while let Some(frame) = source.next().await {
                    let text = match frame {
                        Ok(Message::Text(text)) => text,
                        Ok(Message::Close(_)) => break,
                        Ok(_) => continue,
                        Err(e) => {
                            tracing::error!("WebSocket read failed: {e}");
                            break;
                        }
                    };
                    match serde_json::from_str::<CdpMessage>(&text) {
                        Ok(CdpMessage::Response(response)) => {
                            let callback = pending
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .remove(&response.id);
                            match callback {
                                Some(tx) => {
                                    let _ = tx.send(response.into_result());
                                }
                                None => tracing::debug!(id = response.id, "Response for unknown or abandoned request"),
                            }
                        }
                        Ok(CdpMessage::Event(event)) => subscribers.emit(&event),
                        Err(e) => tracing::warn!("Unparseable DevTools message: {e}"),
                    }
                }

                closed.store(true, Ordering::SeqCst);
                fail_pending(&pending);
                tracing::debug!("DevTools socket closed");
                subscribers.emit(&ProtocolEvent::new(
                    TRANSPORT_DISCONNECTED_EVENT,
                    Value::Object(serde_json::Map::new()),
                ));
            })
        };

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            next_id: AtomicU64::new(1),
            outbound,
            pending,
            subscribers,
            closed,
            tasks: vec![writer, reader],
        })
    }

    /// Number of commands still awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Removes a request's pending entry when its `send` future settles or is dropped.
struct PendingGuard {
    pending: Pending,
    id: u64,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

fn fail_pending(pending: &Pending) {
    let drained: Vec<_> = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
        .collect();
    for (_, tx) in drained {
        let _ = tx.send(Err(TransportError::Closed));
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(
        &self,
        method: &str,
        params: Value,
        options: SendOptions,
    ) -> Result<Value, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        let _guard = PendingGuard {
            pending: Arc::clone(&self.pending),
            id,
        };

        let request = CdpRequest {
            id,
            method: method.to_string(),
            params,
            session_id: None,
        };
        let frame = match serde_json::to_string(&request) {
            Ok(frame) => frame,
            Err(e) => return Err(TransportError::Io(e.to_string())),
        };
        if self.outbound.send(Message::Text(frame.into())).is_err() {
            return Err(TransportError::Closed);
        }

        match tokio::time::timeout(options.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(TransportError::Timeout),
        }
    }

    fn subscribe(&self, event: &str, handler: EventHandler) {
        self.subscribers.on(event, handler);
    }

    fn unsubscribe_all(&self) {
        self.subscribers.clear();
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        fail_pending(&self.pending);
        self.outbound
            .send(Message::Close(None))
            .map_err(|_| TransportError::Closed)
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
