//! Gatherer capability trait and descriptors.

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use webgather_core::{ComputedCache, GatherError, GatherSettings};
use webgather_session::ProtocolSession;

use crate::ArtifactOutcome;

/// Kind of activity a run brackets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatherMode {
    /// Full page navigation.
    Navigation,
    /// Observation over a user-driven time span.
    Timespan,
    /// One-shot inspection of the current state.
    Snapshot,
}

impl GatherMode {
    pub const ALL: [Self; 3] = [Self::Navigation, Self::Timespan, Self::Snapshot];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::Timespan => "timespan",
            Self::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for GatherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instrumentation hook, in the order the runner sweeps them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    StartInstrumentation,
    StartSensitiveInstrumentation,
    StopSensitiveInstrumentation,
    StopInstrumentation,
}

impl HookPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StartInstrumentation => "startInstrumentation",
            Self::StartSensitiveInstrumentation => "startSensitiveInstrumentation",
            Self::StopSensitiveInstrumentation => "stopSensitiveInstrumentation",
            Self::StopInstrumentation => "stopInstrumentation",
        }
    }
}

/// Error returned by a gatherer hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct GathererError {
    message: String,
}

impl GathererError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<GatherError> for GathererError {
    fn from(error: GatherError) -> Self {
        Self::new(error.to_string())
    }
}

impl From<serde_json::Error> for GathererError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(format!("JSON error: {error}"))
    }
}

/// Collected artifacts of a gatherer's declared dependencies, keyed by input name.
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    inputs: BTreeMap<String, ArtifactOutcome>,
}

impl Dependencies {
    #[must_use]
    pub const fn new(inputs: BTreeMap<String, ArtifactOutcome>) -> Self {
        Self { inputs }
    }

    /// Outcome of the gatherer feeding `input`, success or failure.
    #[must_use]
    pub fn get(&self, input: &str) -> Option<&ArtifactOutcome> {
        self.inputs.get(input)
    }

    /// Value of `input`, turning a failed or missing dependency into an error.
    ///
    /// # Errors
    /// Returns error if the dependency failed or was not declared.
    pub fn value(&self, input: &str) -> Result<&Value, GathererError> {
        match self.inputs.get(input) {
            Some(ArtifactOutcome::Ok(value)) => Ok(value),
            Some(ArtifactOutcome::Error(message)) => Err(GathererError::new(format!(
                "Dependency {input} failed: {message}"
            ))),
            None => Err(GathererError::new(format!(
                "Dependency {input} was not declared"
            ))),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArtifactOutcome)> {
        self.inputs.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// What a hook can see of the run.
pub struct PassContext<'a> {
    /// Id of the gatherer being invoked.
    pub gatherer_id: &'a str,
    pub gather_mode: GatherMode,
    pub session: &'a ProtocolSession,
    pub computed_cache: &'a dyn ComputedCache,
    pub settings: &'a GatherSettings,
    /// Empty for every hook except `get_artifact`.
    pub dependencies: &'a Dependencies,
}

/// A pluggable observer that produces one artifact per run.
///
/// Every hook is optional. Hooks of one gatherer never overlap; hooks of
/// different gatherers in the same phase may run concurrently.
#[async_trait]
pub trait Gatherer: Send + Sync {
    /// Low-overhead, long-duration observation set up before the activity.
    async fn start_instrumentation(&self, _ctx: &PassContext<'_>) -> Result<(), GathererError> {
        Ok(())
    }

    /// Observation that must tightly bracket the activity.
    async fn start_sensitive_instrumentation(
        &self,
        _ctx: &PassContext<'_>,
    ) -> Result<(), GathererError> {
        Ok(())
    }

    async fn stop_sensitive_instrumentation(
        &self,
        _ctx: &PassContext<'_>,
    ) -> Result<(), GathererError> {
        Ok(())
    }

    async fn stop_instrumentation(&self, _ctx: &PassContext<'_>) -> Result<(), GathererError> {
        Ok(())
    }

    /// Compute the final artifact. Defaults to `null`.
    async fn get_artifact(&self, _ctx: &PassContext<'_>) -> Result<Value, GathererError> {
        Ok(Value::Null)
    }
}

/// A gatherer instance plus the run configuration around it.
#[derive(Clone)]
pub struct GathererDescriptor {
    /// Unique within a run; also the key in the bundle.
    pub id: String,
    pub instance: Arc<dyn Gatherer>,
    pub supported_modes: Vec<GatherMode>,
    /// Input name to producing gatherer id.
    pub dependencies: BTreeMap<String, String>,
}

impl GathererDescriptor {
    /// Describe a gatherer that supports every mode and has no dependencies.
    #[must_use]
    pub fn new(id: impl Into<String>, instance: Arc<dyn Gatherer>) -> Self {
        Self {
            id: id.into(),
            instance,
            supported_modes: GatherMode::ALL.to_vec(),
            dependencies: BTreeMap::new(),
        }
    }

    /// Restrict the modes this gatherer participates in.
    #[must_use]
    pub fn modes(mut self, modes: impl IntoIterator<Item = GatherMode>) -> Self {
        self.supported_modes = modes.into_iter().collect();
        self
    }

    /// Feed the artifact of `producer` into this gatherer as `input`.
    #[must_use]
    pub fn depends_on(mut self, input: impl Into<String>, producer: impl Into<String>) -> Self {
        self.dependencies.insert(input.into(), producer.into());
        self
    }

    #[must_use]
    pub fn supports(&self, mode: GatherMode) -> bool {
        self.supported_modes.contains(&mode)
    }
}

impl fmt::Debug for GathererDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GathererDescriptor")
            .field("id", &self.id)
            .field("supported_modes", &self.supported_modes)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Noop;

    #[async_trait]
    impl Gatherer for Noop {}

    #[test]
    fn test_descriptor_builder() {
        let descriptor = GathererDescriptor::new("Trace", Arc::new(Noop))
            .modes([GatherMode::Navigation, GatherMode::Timespan])
            .depends_on("DevtoolsLog", "DevtoolsLog");

        assert!(descriptor.supports(GatherMode::Timespan));
        assert!(!descriptor.supports(GatherMode::Snapshot));
        assert_eq!(descriptor.dependencies["DevtoolsLog"], "DevtoolsLog");
        assert!(format!("{descriptor:?}").contains("Trace"));
    }

    #[test]
    fn test_dependency_values() {
        let mut inputs = BTreeMap::new();
        inputs.insert("Scripts".to_string(), ArtifactOutcome::Ok(json!(["a.js"])));
        inputs.insert("Trace".to_string(), ArtifactOutcome::Error("timed out".to_string()));
        let deps = Dependencies::new(inputs);

        assert_eq!(deps.value("Scripts").unwrap(), &json!(["a.js"]));
        assert_eq!(
            deps.value("Trace").unwrap_err().message(),
            "Dependency Trace failed: timed out"
        );
        assert!(deps.value("Missing").is_err());
        assert!(deps.get("Trace").is_some_and(|o| !o.is_ok()));
        assert_eq!(deps.len(), 2);
    }

    #[test]
    fn test_mode_serialization() {
        assert_eq!(serde_json::to_value(GatherMode::Timespan).unwrap(), "timespan");
        assert_eq!(GatherMode::Snapshot.to_string(), "snapshot");
    }
}
