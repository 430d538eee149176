//! Core abstractions for driving and observing an instrumented remote target.
//!
//! This crate provides the building blocks shared by the session and the runner:
//! - `GatherError` / `TransportError` - Error taxonomy
//! - `Transport` and `ComputedCache` traits
//! - `EventRelay` - Observer registry for protocol events
//! - `TerminalLatch` / `CrashSignal` - Sticky crash cause and the crash race
//! - `GatherSettings` - Timeouts and crash/detach event names

pub mod error;
pub mod race;
pub mod relay;
pub mod settings;
pub mod traits;

pub use error::{GatherError, TransportError};
pub use race::{CrashSignal, TerminalLatch, first_settled, with_timeout};
pub use relay::{EventRelay, ListenerId};
pub use settings::GatherSettings;
pub use traits::{
    ComputedCache, EventHandler, ProtocolEvent, SendOptions, Transport, WILDCARD_EVENT,
    compute_cached,
};
