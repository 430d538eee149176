//! Settings shared by the session and every gather run.

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event the target emits when its renderer crashes.
pub const TARGET_CRASHED_EVENT: &str = "Inspector.targetCrashed";

/// Event the target emits when the inspector session is detached.
pub const TARGET_DETACHED_EVENT: &str = "Inspector.detached";

/// Synthetic event transports emit when the connection drops.
pub const TRANSPORT_DISCONNECTED_EVENT: &str = "Transport.disconnected";

/// Default command timeout in milliseconds.
pub const DEFAULT_PROTOCOL_TIMEOUT_MS: u64 = 30_000;

/// Settings for a session and the runs that use it.
///
/// Every field has a default, so an empty JSON object is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatherSettings {
    /// Default timeout applied to each command without an override.
    pub protocol_timeout_ms: u64,
    /// Events that mean the target crashed.
    pub crash_events: Vec<String>,
    /// Events that mean the session lost its target.
    pub detach_events: Vec<String>,
    /// Arbitrary app-specific settings handed to gatherers.
    pub metadata: HashMap<String, Value>,
}

impl Default for GatherSettings {
    fn default() -> Self {
        Self {
            protocol_timeout_ms: DEFAULT_PROTOCOL_TIMEOUT_MS,
            crash_events: vec![TARGET_CRASHED_EVENT.to_string()],
            detach_events: vec![
                TARGET_DETACHED_EVENT.to_string(),
                TRANSPORT_DISCONNECTED_EVENT.to_string(),
            ],
            metadata: HashMap::new(),
        }
    }
}

impl GatherSettings {
    /// Parse settings from JSON, filling absent fields with defaults.
    ///
    /// # Errors
    /// Returns error if the JSON is malformed or has wrongly typed fields.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Default command timeout.
    #[must_use]
    pub const fn protocol_timeout(&self) -> Duration {
        Duration::from_millis(self.protocol_timeout_ms)
    }

    /// Get a metadata value by key.
    #[must_use]
    pub fn get_metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Set a metadata value.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }
}
