//! Wire protocol for DevTools communication.
//!
//! Requests carry an `id`; responses echo it back with either `result` or
//! `error`. Events carry no `id`:
//! ```json
//! {"method": "Inspector.targetCrashed", "params": {}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use webgather_core::{ProtocolEvent, TransportError};

/// Command sent to the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpRequest {
    /// Correlation id, unique per connection.
    pub id: u64,
    /// Method name, e.g. `Page.navigate`.
    pub method: String,
    /// Method parameters.
    pub params: Value,
    /// Flattened child session to route the command to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Error payload inside a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdpResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Response to a [`CdpRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpResponse {
    /// Id of the request this answers.
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CdpResponseError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl CdpResponse {
    /// Turn the response into the command's outcome.
    ///
    /// # Errors
    /// Returns `TransportError::Remote` if the target replied with an error.
    pub fn into_result(self) -> Result<Value, TransportError> {
        match self.error {
            Some(error) => {
                let message = match error.data {
                    Some(data) => format!("{} ({data})", error.message),
                    None => error.message,
                };
                Err(TransportError::Remote {
                    code: error.code,
                    message,
                })
            }
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Any inbound message; responses are told apart by their `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CdpMessage {
    Response(CdpResponse),
    Event(ProtocolEvent),
}
