//! Transports that connect a session to a DevTools protocol target.
//!
//! Provides:
//! - Wire protocol types (JSON, id-correlated)
//! - Scripted in-memory transport for tests and embedding
//! - WebSocket transport (feature: websocket)

pub mod memory;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryTransport, MemoryTransportBuilder, MemoryTransportController, Reply, SentCommand};
pub use protocol::{CdpMessage, CdpRequest, CdpResponse, CdpResponseError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;
