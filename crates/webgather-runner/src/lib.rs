//! Phased gather orchestration for remote targets.
//!
//! Provides:
//! - `Gatherer` - Capability trait with optional lifecycle hooks
//! - `GathererDescriptor` - Gatherer id, modes and dependencies
//! - `GatherRunner` - Runs gatherers around an activity and assembles the bundle
//! - Computed cache implementations (memory)

pub mod artifact;
pub mod cache;
pub mod gatherer;
pub mod graph;
pub mod runner;

pub use artifact::{ArtifactBundle, ArtifactOutcome, ArtifactPhase, ArtifactState, BaseArtifacts, PhaseTiming, RunTiming};
pub use gatherer::{Dependencies, GatherMode, Gatherer, GathererDescriptor, GathererError, HookPhase, PassContext};
pub use graph::DependencyGraph;
pub use runner::{ActivityError, GatherRunner};

#[cfg(feature = "memory")]
pub use cache::MemoryCache;
