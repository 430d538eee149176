//! Protocol session: timed commands, event relay and crash detection.

use std::{
    future::Future,
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use webgather_core::{
    CrashSignal, EventHandler, EventRelay, GatherError, GatherSettings, ListenerId,
    ProtocolEvent, SendOptions, TerminalLatch, Transport, TransportError, WILDCARD_EVENT,
    with_timeout,
};

use crate::TargetInfo;

/// Extra time given to the transport's own timeout so the session timer fires first.
pub const PROTOCOL_TIMEOUT_BUFFER: Duration = Duration::from_millis(50);

/// Largest accepted command timeout: the signed 32-bit millisecond timer
/// limit, less [`PROTOCOL_TIMEOUT_BUFFER`].
pub const MAX_COMMAND_TIMEOUT: Duration = Duration::from_millis(i32::MAX as u64 - 50);

/// Health of the session's target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Healthy,
    /// Terminal: a crash or detach was recorded.
    Crashed,
}

/// A single control session to the remote target.
///
/// Every command is raced against a timer. Once the target crashes or
/// detaches, the first cause is recorded and sticks: new commands fail with
/// it immediately, and timers of in-flight commands fire with it instead of
/// a generic timeout.
///
/// Not meant to be shared by concurrent gather runs.
pub struct ProtocolSession {
    id: String,
    transport: Arc<dyn Transport>,
    relay: Arc<EventRelay>,
    latch: Arc<TerminalLatch>,
    default_timeout: Duration,
    next_timeout: Mutex<Option<Duration>>,
    target_info: RwLock<Option<TargetInfo>>,
    disposed: AtomicBool,
}

impl ProtocolSession {
    /// Attach a session to `transport`.
    ///
    /// Subscribes to every transport event and installs the crash/detach
    /// listeners named in `settings`.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, settings: &GatherSettings) -> Self {
        let relay = Arc::new(EventRelay::new());
        let latch = Arc::new(TerminalLatch::new());

        for event in &settings.crash_events {
            relay.on(event, terminal_listener(&latch, GatherError::TargetCrashed));
        }
        for event in &settings.detach_events {
            relay.on(event, terminal_listener(&latch, GatherError::TargetDetached));
        }

        let forward = Arc::clone(&relay);
        transport.subscribe(
            WILDCARD_EVENT,
            Arc::new(move |event: &ProtocolEvent| forward.emit(event)),
        );

        let id = transport.id().to_string();
        tracing::debug!(session = %id, "Session attached");

        Self {
            id,
            transport,
            relay,
            latch,
            default_timeout: settings.protocol_timeout().min(MAX_COMMAND_TIMEOUT),
            next_timeout: Mutex::new(None),
            target_info: RwLock::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    /// Identifier of the underlying connection.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn target_info(&self) -> Option<TargetInfo> {
        self.target_info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_target_info(&self, info: TargetInfo) {
        *self
            .target_info
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(info);
    }

    /// Override the timeout of the next command only, clamped to [`MAX_COMMAND_TIMEOUT`].
    pub fn set_next_command_timeout(&self, timeout: Duration) {
        *self.lock_next_timeout() = Some(timeout.min(MAX_COMMAND_TIMEOUT));
    }

    #[must_use]
    pub fn has_next_command_timeout(&self) -> bool {
        self.lock_next_timeout().is_some()
    }

    /// Timeout the next command will use, without consuming an override.
    #[must_use]
    pub fn next_command_timeout(&self) -> Duration {
        self.lock_next_timeout().unwrap_or(self.default_timeout)
    }

    /// Send a command and await its result.
    ///
    /// # Errors
    /// - The recorded terminal cause, if the target crashed or detached
    /// - `ProtocolTimeout` if the effective timeout elapsed first
    /// - `Protocol` if the target answered with an error
    /// - `InvalidCommand` for an empty method, `SessionDisposed` after `dispose()`
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value, GatherError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(GatherError::SessionDisposed);
        }
        if method.is_empty() {
            return Err(GatherError::InvalidCommand(
                "method must not be empty".to_string(),
            ));
        }
        if let Some(cause) = self.latch.get() {
            return Err(cause);
        }

        let timeout = self.take_next_timeout();
        tracing::debug!(method, ?timeout, "Sending command");

        let options = SendOptions {
            timeout: timeout + PROTOCOL_TIMEOUT_BUFFER,
        };
        let call = async {
            self.transport
                .send(method, params, options)
                .await
                .map_err(|e| self.translate(method, e))
        };
        let result = with_timeout(call, timeout, || {
            self.latch.get().unwrap_or_else(|| GatherError::ProtocolTimeout {
                method: method.to_string(),
            })
        })
        .await;

        if let Err(e) = &result {
            tracing::debug!(method, error = %e, "Command failed");
        }
        result
    }

    /// Send a command and deserialize its result.
    ///
    /// # Errors
    /// Same as [`send_command`](Self::send_command), plus `Protocol` if the
    /// result does not match `T`.
    pub async fn send_command_as<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, GatherError> {
        let value = self.send_command(method, params).await?;
        serde_json::from_value(value).map_err(|e| GatherError::Protocol {
            method: method.to_string(),
            message: format!("unexpected response shape: {e}"),
        })
    }

    /// Send a command whose outcome does not matter; failures are logged.
    pub async fn send_command_and_ignore(&self, method: &str, params: Value) {
        if let Err(e) = self.send_command(method, params).await {
            tracing::debug!(method, error = %e, "Ignoring command failure");
        }
    }

    /// Subscribe to an event by name, or every event with `"*"`.
    pub fn on(&self, event: &str, handler: EventHandler) -> ListenerId {
        self.relay.on(event, handler)
    }

    /// Subscribe for a single delivery of `event`.
    pub fn on_once(&self, event: &str, handler: EventHandler) -> ListenerId {
        self.relay.on_once(event, handler)
    }

    /// Resolve with the next delivery of `event`, or `None` if the session is disposed first.
    pub fn once(&self, event: &str) -> impl Future<Output = Option<ProtocolEvent>> + Send + use<> {
        self.relay.once(event)
    }

    /// Remove a subscription made with [`on`](Self::on).
    pub fn off(&self, id: ListenerId) -> bool {
        self.relay.off(id)
    }

    /// Stream of every event relayed from now on.
    #[must_use]
    pub fn events(&self) -> BoxStream<'static, ProtocolEvent> {
        self.relay.stream()
    }

    /// Signal that fires with the terminal cause once the target crashes or detaches.
    #[must_use]
    pub fn crash_signal(&self) -> CrashSignal {
        self.latch.signal()
    }

    /// The recorded crash or detach cause, if any.
    #[must_use]
    pub fn terminal_error(&self) -> Option<GatherError> {
        self.latch.get()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        if self.latch.is_set() {
            SessionState::Crashed
        } else {
            SessionState::Healthy
        }
    }

    /// Unsubscribe from the transport and close it. Later calls are no-ops.
    ///
    /// # Errors
    /// Returns `Transport` if closing the connection fails.
    pub async fn dispose(&self) -> Result<(), GatherError> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!(session = %self.id, "Disposing session");
        self.transport.unsubscribe_all();
        self.relay.clear();
        self.transport
            .close()
            .await
            .map_err(|e| GatherError::Transport(e.to_string()))
    }

    fn translate(&self, method: &str, error: TransportError) -> GatherError {
        match (error, self.latch.get()) {
            (TransportError::Closed | TransportError::Timeout, Some(cause)) => cause,
            (error, _) => error.into_gather_error(method),
        }
    }

    fn take_next_timeout(&self) -> Duration {
        self.lock_next_timeout()
            .take()
            .unwrap_or(self.default_timeout)
    }

    fn lock_next_timeout(&self) -> std::sync::MutexGuard<'_, Option<Duration>> {
        self.next_timeout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn terminal_listener(latch: &Arc<TerminalLatch>, cause: GatherError) -> EventHandler {
    let latch = Arc::clone(latch);
    Arc::new(move |event: &ProtocolEvent| {
        if latch.set_if_absent(cause.clone()) {
            tracing::warn!(event = %event.method, cause = %cause, "Target lost");
        } else {
            tracing::debug!(event = %event.method, "Target already lost, keeping first cause");
        }
    })
}

#[cfg(test)]
mod tests {
    use webgather_transport::MemoryTransportBuilder;

    use super::*;

    fn session() -> ProtocolSession {
        let (transport, _controller) = MemoryTransportBuilder::new().build();
        ProtocolSession::new(Arc::new(transport), &GatherSettings::default())
    }

    #[test]
    fn test_override_is_clamped() {
        let session = session();
        session.set_next_command_timeout(Duration::from_secs(u64::from(u32::MAX)));
        assert_eq!(session.next_command_timeout(), MAX_COMMAND_TIMEOUT);
        assert_eq!(MAX_COMMAND_TIMEOUT.as_millis(), 2_147_483_597);
    }

    #[test]
    fn test_override_is_one_shot() {
        let session = session();
        assert!(!session.has_next_command_timeout());
        session.set_next_command_timeout(Duration::from_secs(5));
        assert!(session.has_next_command_timeout());
        assert_eq!(session.take_next_timeout(), Duration::from_secs(5));
        assert!(!session.has_next_command_timeout());
        assert_eq!(session.take_next_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_default_timeout_from_settings() {
        let (transport, _controller) = MemoryTransportBuilder::new().build();
        let settings = GatherSettings {
            protocol_timeout_ms: 1_000,
            ..GatherSettings::default()
        };
        let session = ProtocolSession::new(Arc::new(transport), &settings);
        assert_eq!(session.next_command_timeout(), Duration::from_secs(1));
    }
}
