//! Gather runner: drives gatherers through the instrumentation lifecycle.

use std::{collections::BTreeMap, future::Future, sync::Arc};

use futures::future::join_all;
use tokio::time::Instant;
use uuid::Uuid;
use webgather_core::{ComputedCache, GatherError, GatherSettings};
use webgather_session::ProtocolSession;

use crate::{
    ArtifactBundle, ArtifactOutcome, ArtifactState, BaseArtifacts, Dependencies, DependencyGraph,
    GatherMode, Gatherer, GathererDescriptor, GathererError, HookPhase, PassContext, PhaseTiming,
    RunTiming,
};

/// Error returned by a caller-supplied activity.
pub type ActivityError = Box<dyn std::error::Error + Send + Sync>;

const START_SWEEPS: [HookPhase; 2] = [
    HookPhase::StartInstrumentation,
    HookPhase::StartSensitiveInstrumentation,
];

const STOP_SWEEPS: [HookPhase; 2] = [
    HookPhase::StopSensitiveInstrumentation,
    HookPhase::StopInstrumentation,
];

/// Runs gatherers around an activity on one session.
///
/// A run is all-or-nothing for instrumentation: a failing hook, a failing
/// activity or a target crash yields a single error and no bundle. Artifact
/// failures are isolated and reported inside the bundle.
pub struct GatherRunner {
    session: Arc<ProtocolSession>,
    computed_cache: Arc<dyn ComputedCache>,
    settings: GatherSettings,
}

struct Participants<'a> {
    mode: GatherMode,
    descriptors: Vec<&'a GathererDescriptor>,
    states: Vec<ArtifactState>,
    timings: Vec<PhaseTiming>,
    warnings: Vec<String>,
}

impl GatherRunner {
    /// Create a runner for `session`.
    #[must_use]
    pub fn new(
        session: Arc<ProtocolSession>,
        computed_cache: Arc<dyn ComputedCache>,
        settings: GatherSettings,
    ) -> Self {
        Self {
            session,
            computed_cache,
            settings,
        }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<ProtocolSession> {
        &self.session
    }

    /// Run every gatherer supporting `mode` around `activity`.
    ///
    /// The whole run races the session's crash signal; if the target crashes
    /// or detaches, no further hooks are invoked and the recorded cause is
    /// returned instead of a bundle.
    ///
    /// # Errors
    /// - `Configuration` for an invalid gatherer set, before any hook runs
    /// - `GathererFailure` if an instrumentation hook fails
    /// - `Activity` if the activity fails
    /// - `TargetCrashed` / `TargetDetached` if the target is lost
    pub async fn run<A, Fut>(
        &self,
        mode: GatherMode,
        gatherers: &[GathererDescriptor],
        base: BaseArtifacts,
        activity: A,
    ) -> Result<ArtifactBundle, GatherError>
    where
        A: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<(), ActivityError>> + Send,
    {
        let started = Instant::now();
        let descriptors: Vec<&GathererDescriptor> =
            gatherers.iter().filter(|d| d.supports(mode)).collect();
        let graph = DependencyGraph::resolve(gatherers, &descriptors)?;

        let run_id = Uuid::new_v4();
        tracing::info!(%run_id, %mode, gatherers = descriptors.len(), "Starting gather run");

        let mut run = Participants {
            mode,
            states: descriptors.iter().map(|d| ArtifactState::new(&d.id)).collect(),
            descriptors,
            timings: Vec::new(),
            warnings: Vec::new(),
        };

        let outcome = self
            .session
            .crash_signal()
            .race(self.drive(&mut run, &graph, activity))
            .await;

        if let Some(cause) = self.session.terminal_error() {
            tracing::warn!(%run_id, cause = %cause, "Gather run aborted, target lost");
            return Err(cause);
        }
        let artifacts = outcome?;

        let mut base = base;
        if let Some(target) = self.session.target_info() {
            base.target = Some(target);
        }
        let total_ms = elapsed_ms(started);
        tracing::info!(%run_id, total_ms, warnings = run.warnings.len(), "Gather run finished");

        Ok(ArtifactBundle {
            run_id,
            gather_mode: mode,
            session_id: self.session.id().to_string(),
            base,
            timing: RunTiming {
                total_ms,
                phases: run.timings,
            },
            warnings: run.warnings,
            artifacts,
        })
    }

    async fn drive<A, Fut>(
        &self,
        run: &mut Participants<'_>,
        graph: &DependencyGraph,
        activity: A,
    ) -> Result<BTreeMap<String, ArtifactOutcome>, GatherError>
    where
        A: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<(), ActivityError>> + Send,
    {
        for phase in START_SWEEPS {
            self.sweep(run, phase).await?;
        }

        let step = Instant::now();
        activity()
            .await
            .map_err(|e| GatherError::Activity(e.to_string()))?;
        run.timings.push(PhaseTiming {
            name: "activity".to_string(),
            duration_ms: elapsed_ms(step),
        });

        for phase in STOP_SWEEPS {
            self.sweep(run, phase).await?;
        }

        Ok(self.collect(run, graph).await)
    }

    /// Invoke `phase` on every participant concurrently and wait for all of them.
    async fn sweep(&self, run: &mut Participants<'_>, phase: HookPhase) -> Result<(), GatherError> {
        let step = Instant::now();
        let no_dependencies = Dependencies::default();
        let mode = run.mode;

        let results = join_all(run.descriptors.iter().map(|descriptor| {
            let ctx = self.context(&descriptor.id, mode, &no_dependencies);
            let instance = Arc::clone(&descriptor.instance);
            async move { invoke(instance.as_ref(), phase, &ctx).await }
        }))
        .await;

        let mut first_failure = None;
        for ((descriptor, state), result) in run
            .descriptors
            .iter()
            .zip(run.states.iter_mut())
            .zip(results)
        {
            match result {
                Ok(()) => {
                    let advanced = state.advance(phase.into());
                    debug_assert!(advanced, "{} skipped a phase", descriptor.id);
                }
                Err(e) => {
                    tracing::warn!(
                        gatherer = %descriptor.id,
                        phase = phase.as_str(),
                        error = %e,
                        "Instrumentation hook failed"
                    );
                    state.fail(e.to_string());
                    first_failure.get_or_insert_with(|| GatherError::GathererFailure {
                        gatherer_id: descriptor.id.clone(),
                        cause: format!("{} failed: {e}", phase.as_str()),
                    });
                }
            }
        }

        run.timings.push(PhaseTiming {
            name: phase.as_str().to_string(),
            duration_ms: elapsed_ms(step),
        });
        tracing::info!(phase = phase.as_str(), "Sweep complete");
        first_failure.map_or(Ok(()), Err)
    }

    /// Collect artifacts layer by layer; failures stay local to their artifact.
    async fn collect(
        &self,
        run: &mut Participants<'_>,
        graph: &DependencyGraph,
    ) -> BTreeMap<String, ArtifactOutcome> {
        let step = Instant::now();
        let mode = run.mode;
        let mut collected: BTreeMap<String, ArtifactOutcome> = BTreeMap::new();

        for layer in graph.layers() {
            let pending: Vec<_> = layer
                .iter()
                .map(|&idx| {
                    let descriptor = run.descriptors[idx];
                    let dependencies = Dependencies::new(
                        descriptor
                            .dependencies
                            .iter()
                            .map(|(input, producer)| {
                                let outcome = collected.get(producer).cloned().unwrap_or_else(|| {
                                    ArtifactOutcome::Error(format!("{producer} was not collected"))
                                });
                                (input.clone(), outcome)
                            })
                            .collect(),
                    );
                    let instance = Arc::clone(&descriptor.instance);
                    let id = descriptor.id.as_str();
                    async move {
                        let ctx = self.context(id, mode, &dependencies);
                        (idx, instance.get_artifact(&ctx).await)
                    }
                })
                .collect();

            for (idx, result) in join_all(pending).await {
                let id = run.descriptors[idx].id.clone();
                let state = &mut run.states[idx];
                let outcome = match result {
                    Ok(value) => {
                        state.collect(value.clone());
                        ArtifactOutcome::Ok(value)
                    }
                    Err(e) => {
                        tracing::warn!(gatherer = %id, error = %e, "Artifact collection failed");
                        state.fail(e.to_string());
                        run.warnings.push(
                            GatherError::GathererFailure {
                                gatherer_id: id.clone(),
                                cause: e.to_string(),
                            }
                            .to_string(),
                        );
                        ArtifactOutcome::Error(e.to_string())
                    }
                };
                collected.insert(id, outcome);
            }
        }

        run.timings.push(PhaseTiming {
            name: "getArtifact".to_string(),
            duration_ms: elapsed_ms(step),
        });
        collected
    }

    fn context<'a>(
        &'a self,
        gatherer_id: &'a str,
        gather_mode: GatherMode,
        dependencies: &'a Dependencies,
    ) -> PassContext<'a> {
        PassContext {
            gatherer_id,
            gather_mode,
            session: &self.session,
            computed_cache: self.computed_cache.as_ref(),
            settings: &self.settings,
            dependencies,
        }
    }
}

async fn invoke(
    gatherer: &dyn Gatherer,
    phase: HookPhase,
    ctx: &PassContext<'_>,
) -> Result<(), GathererError> {
    match phase {
        HookPhase::StartInstrumentation => gatherer.start_instrumentation(ctx).await,
        HookPhase::StartSensitiveInstrumentation => {
            gatherer.start_sensitive_instrumentation(ctx).await
        }
        HookPhase::StopSensitiveInstrumentation => {
            gatherer.stop_sensitive_instrumentation(ctx).await
        }
        HookPhase::StopInstrumentation => gatherer.stop_instrumentation(ctx).await,
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    u64::try_from(since.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use webgather_transport::MemoryTransportBuilder;

    use super::*;
    use crate::MemoryCache;

    struct Fixed(Value);

    #[async_trait]
    impl Gatherer for Fixed {
        async fn get_artifact(&self, _ctx: &PassContext<'_>) -> Result<Value, GathererError> {
            Ok(self.0.clone())
        }
    }

    fn runner() -> GatherRunner {
        let (transport, _controller) = MemoryTransportBuilder::new().id("conn-1").build();
        let session = Arc::new(ProtocolSession::new(
            Arc::new(transport),
            &GatherSettings::default(),
        ));
        GatherRunner::new(session, Arc::new(MemoryCache::new()), GatherSettings::default())
    }

    #[tokio::test]
    async fn test_bundle_metadata() {
        let runner = runner();
        let gatherers = vec![GathererDescriptor::new("Fixed", Arc::new(Fixed(json!(42))))];
        let base = BaseArtifacts {
            fetch_time: 1_700_000_000_000,
            ..BaseArtifacts::default()
        };

        let bundle = runner
            .run(GatherMode::Navigation, &gatherers, base, || async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(bundle.session_id, "conn-1");
        assert_eq!(bundle.gather_mode, GatherMode::Navigation);
        assert_eq!(bundle.base.fetch_time, 1_700_000_000_000);
        assert_eq!(bundle.value("Fixed"), Some(&json!(42)));
        let names: Vec<&str> = bundle.timing.phases.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "startInstrumentation",
                "startSensitiveInstrumentation",
                "activity",
                "stopSensitiveInstrumentation",
                "stopInstrumentation",
                "getArtifact",
            ]
        );
        assert!(bundle.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_activity_failure_is_fatal() {
        let runner = runner();
        let gatherers = vec![GathererDescriptor::new("Fixed", Arc::new(Fixed(json!(1))))];

        let err = runner
            .run(GatherMode::Navigation, &gatherers, BaseArtifacts::default(), || async {
                Err::<(), ActivityError>("net::ERR_NAME_NOT_RESOLVED".into())
            })
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatherError::Activity("net::ERR_NAME_NOT_RESOLVED".to_string())
        );
    }
}
