//! Error taxonomy shared by the session and the gather runner.

use thiserror::Error;

/// Error produced while talking to the remote target or gathering from it.
///
/// `Clone` so that a single recorded terminal cause can be handed to every
/// caller that is waiting on the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatherError {
    /// A command's effective timeout elapsed with no crash cause recorded.
    #[error("Protocol timeout: {method} did not respond in time")]
    ProtocolTimeout { method: String },
    /// The remote target reported an unrecoverable crash.
    #[error("Target crashed")]
    TargetCrashed,
    /// The session lost its target without an explicit crash signal.
    #[error("Target detached")]
    TargetDetached,
    /// Invalid gatherer set or dependency graph, detected before execution.
    #[error("Configuration error: {0}")]
    Configuration(String),
    /// A gatherer hook or artifact computation failed.
    #[error("Gatherer {gatherer_id} failed: {cause}")]
    GathererFailure { gatherer_id: String, cause: String },
    /// The target answered the command with an error.
    #[error("Protocol error ({method}): {message}")]
    Protocol { method: String, message: String },
    /// The command could not be issued at all.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
    /// The session was used after `dispose()`.
    #[error("Session already disposed")]
    SessionDisposed,
    /// The caller-supplied activity failed.
    #[error("Activity failed: {0}")]
    Activity(String),
    /// The transport failed for a reason other than a reply from the target.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl GatherError {
    /// Whether this error means the target is gone for good.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::TargetCrashed | Self::TargetDetached)
    }

    /// Whether this is a generic command timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::ProtocolTimeout { .. })
    }
}

/// Error reported by a [`Transport`](crate::traits::Transport) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Transport timed out")]
    Timeout,
    #[error("Transport closed")]
    Closed,
    #[error("Remote error {code}: {message}")]
    Remote { code: i64, message: String },
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// Convert into a [`GatherError`] for the given command.
    #[must_use]
    pub fn into_gather_error(self, method: &str) -> GatherError {
        match self {
            Self::Timeout => GatherError::ProtocolTimeout {
                method: method.to_string(),
            },
            Self::Closed => GatherError::TargetDetached,
            Self::Remote { message, .. } => GatherError::Protocol {
                method: method.to_string(),
                message,
            },
            Self::Io(reason) => GatherError::Transport(reason),
        }
    }
}
