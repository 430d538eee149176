//! Artifact state machine and the bundle a run produces.

use std::{
    collections::{BTreeMap, HashMap},
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use webgather_session::{ProtocolSession, TargetInfo};

use crate::{GatherMode, HookPhase};

/// Lifecycle position of one gatherer's artifact within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactPhase {
    Pending,
    InstrumentationStarted,
    SensitiveStarted,
    SensitiveStopped,
    InstrumentationStopped,
    Collected,
    Failed,
}

impl ArtifactPhase {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Collected | Self::Failed)
    }

    /// The only phase this one may advance to, besides `Failed`.
    #[must_use]
    pub const fn successor(self) -> Option<Self> {
        match self {
            Self::Pending => Some(Self::InstrumentationStarted),
            Self::InstrumentationStarted => Some(Self::SensitiveStarted),
            Self::SensitiveStarted => Some(Self::SensitiveStopped),
            Self::SensitiveStopped => Some(Self::InstrumentationStopped),
            Self::InstrumentationStopped => Some(Self::Collected),
            Self::Collected | Self::Failed => None,
        }
    }
}

impl From<HookPhase> for ArtifactPhase {
    fn from(phase: HookPhase) -> Self {
        match phase {
            HookPhase::StartInstrumentation => Self::InstrumentationStarted,
            HookPhase::StartSensitiveInstrumentation => Self::SensitiveStarted,
            HookPhase::StopSensitiveInstrumentation => Self::SensitiveStopped,
            HookPhase::StopInstrumentation => Self::InstrumentationStopped,
        }
    }
}

/// Collected value or failure description for one artifact.
///
/// Serializes as `{"ok": value}` or `{"error": "description"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactOutcome {
    Ok(Value),
    Error(String),
}

impl ArtifactOutcome {
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    #[must_use]
    pub const fn value(&self) -> Option<&Value> {
        match self {
            Self::Ok(value) => Some(value),
            Self::Error(_) => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Ok(_) => None,
            Self::Error(message) => Some(message),
        }
    }
}

/// Per-run state of one participating gatherer.
#[derive(Debug, Clone)]
pub struct ArtifactState {
    id: String,
    phase: ArtifactPhase,
    outcome: Option<ArtifactOutcome>,
}

impl ArtifactState {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            phase: ArtifactPhase::Pending,
            outcome: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn phase(&self) -> ArtifactPhase {
        self.phase
    }

    #[must_use]
    pub const fn outcome(&self) -> Option<&ArtifactOutcome> {
        self.outcome.as_ref()
    }

    /// Move to the next instrumentation phase.
    ///
    /// Returns `false` and leaves the state untouched unless `to` is the
    /// immediate successor of the current phase.
    pub fn advance(&mut self, to: ArtifactPhase) -> bool {
        if to.is_terminal() || self.phase.successor() != Some(to) {
            return false;
        }
        self.phase = to;
        true
    }

    /// Record the collected value. Only valid once instrumentation has stopped.
    pub fn collect(&mut self, value: Value) -> bool {
        if self.phase != ArtifactPhase::InstrumentationStopped {
            return false;
        }
        self.phase = ArtifactPhase::Collected;
        self.outcome = Some(ArtifactOutcome::Ok(value));
        true
    }

    /// Record a failure from any non-terminal phase.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        self.phase = ArtifactPhase::Failed;
        self.outcome = Some(ArtifactOutcome::Error(message.into()));
        true
    }
}

/// Run metadata supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseArtifacts {
    /// Wall-clock start of the run, Unix epoch milliseconds.
    pub fetch_time: i64,
    /// Target identity; refreshed from the session after the activity.
    pub target: Option<TargetInfo>,
    /// Arbitrary caller-provided fields.
    #[serde(default)]
    pub extra: HashMap<String, Value>,
}

impl BaseArtifacts {
    /// Stamp the current time and the session's known target.
    #[must_use]
    pub fn capture(session: &ProtocolSession) -> Self {
        Self {
            fetch_time: now_millis(),
            target: session.target_info(),
            extra: HashMap::new(),
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Duration of one step of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTiming {
    pub name: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTiming {
    pub total_ms: u64,
    pub phases: Vec<PhaseTiming>,
}

/// Everything a successful run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactBundle {
    pub run_id: Uuid,
    pub gather_mode: GatherMode,
    pub session_id: String,
    pub base: BaseArtifacts,
    pub timing: RunTiming,
    /// One entry per failed artifact.
    pub warnings: Vec<String>,
    /// Gatherer id to outcome, for every participating gatherer.
    pub artifacts: BTreeMap<String, ArtifactOutcome>,
}

impl ArtifactBundle {
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ArtifactOutcome> {
        self.artifacts.get(id)
    }

    /// Collected value of `id`, if it succeeded.
    #[must_use]
    pub fn value(&self, id: &str) -> Option<&Value> {
        self.artifacts.get(id).and_then(ArtifactOutcome::value)
    }
}
