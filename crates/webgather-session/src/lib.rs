//! Protocol session over a single transport.
//!
//! Provides:
//! - `ProtocolSession` - Command/response with per-call timeouts
//! - Crash/detach detection that poisons in-flight and future commands
//! - Event relay to session subscribers

pub mod session;
pub mod target;

pub use session::{MAX_COMMAND_TIMEOUT, PROTOCOL_TIMEOUT_BUFFER, ProtocolSession, SessionState};
pub use target::TargetInfo;
