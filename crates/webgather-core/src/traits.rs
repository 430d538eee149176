//! Core traits for the transport and the computed cache.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::TransportError;

/// Event name that subscribes a handler to every event.
pub const WILDCARD_EVENT: &str = "*";

/// Event emitted by the remote target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolEvent {
    /// Event name, e.g. `Inspector.targetCrashed`.
    pub method: String,
    /// Event payload, passed through unmodified.
    #[serde(default)]
    pub params: Value,
    /// Flattened child session the event belongs to, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ProtocolEvent {
    /// Create an event with no child session.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
            session_id: None,
        }
    }
}

/// Callback invoked for each delivered event.
pub type EventHandler = Arc<dyn Fn(&ProtocolEvent) + Send + Sync>;

/// Per-call transport options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// How long the transport itself may wait before giving up.
    pub timeout: Duration,
}

/// Duplex channel to the remote target.
///
/// Connection establishment and framing live behind this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stable identifier of the underlying connection.
    fn id(&self) -> &str;

    /// Send a command and await its response.
    async fn send(
        &self,
        method: &str,
        params: Value,
        options: SendOptions,
    ) -> Result<Value, TransportError>;

    /// Register a handler for `event`, or for every event with [`WILDCARD_EVENT`].
    fn subscribe(&self, event: &str, handler: EventHandler);

    /// Drop every registered handler.
    fn unsubscribe_all(&self);

    /// Release the connection.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Keyed memo store shared across runs and gatherers.
///
/// Must tolerate concurrent reads and writes to disjoint keys.
pub trait ComputedCache: Send + Sync {
    /// Get a memoized value.
    fn get(&self, key: &str) -> Option<Value>;

    /// Store a memoized value.
    fn set(&self, key: String, value: Value);
}

/// Return the cached value for `key`, computing and storing it on a miss.
///
/// Failed computations are not cached.
///
/// # Errors
/// Returns whatever `compute` returns on a miss.
pub async fn compute_cached<F, Fut, E>(
    cache: &dyn ComputedCache,
    key: &str,
    compute: F,
) -> Result<Value, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value, E>>,
{
    if let Some(hit) = cache.get(key) {
        tracing::trace!(key, "Computed cache hit");
        return Ok(hit);
    }
    let value = compute().await?;
    cache.set(key.to_string(), value.clone());
    Ok(value)
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use super::*;

    #[derive(Default)]
    struct MapCache(Mutex<HashMap<String, Value>>);

    impl ComputedCache for MapCache {
        fn get(&self, key: &str) -> Option<Value> {
            self.0.lock().unwrap().get(key).cloned()
        }

        fn set(&self, key: String, value: Value) {
            self.0.lock().unwrap().insert(key, value);
        }
    }

    #[tokio::test]
    async fn test_compute_cached_memoizes() {
        let cache = MapCache::default();
        let mut calls = 0;

        let first: Result<Value, ()> = compute_cached(&cache, "main-thread-tasks", || {
            calls += 1;
            async { Ok(serde_json::json!([1, 2, 3])) }
        })
        .await;
        assert_eq!(first, Ok(serde_json::json!([1, 2, 3])));

        let second: Result<Value, ()> = compute_cached(&cache, "main-thread-tasks", || {
            calls += 1;
            async { Ok(Value::Null) }
        })
        .await;
        assert_eq!(second, Ok(serde_json::json!([1, 2, 3])));
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_compute_cached_skips_failures() {
        let cache = MapCache::default();

        let failed: Result<Value, &str> =
            compute_cached(&cache, "network-records", || async { Err("boom") }).await;
        assert_eq!(failed, Err("boom"));
        assert!(cache.get("network-records").is_none());
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"method": "Runtime.consoleAPICalled", "params": {"type": "log"}, "sessionId": "abc"}"#;
        let event: ProtocolEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.method, "Runtime.consoleAPICalled");
        assert_eq!(event.params["type"], "log");
        assert_eq!(event.session_id.as_deref(), Some("abc"));
    }
}
