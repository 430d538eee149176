//! Dependency graph over the participating gatherers.

use std::collections::{HashMap, HashSet};

use webgather_core::GatherError;

use crate::GathererDescriptor;

/// Topological layering of the participating gatherers.
///
/// Every gatherer sits in a later layer than each gatherer it depends on;
/// gatherers within a layer are independent of one another. Indices refer
/// to the `participating` slice passed to [`resolve`](Self::resolve).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    layers: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Validate the configuration and sort the participating gatherers.
    ///
    /// `configured` is every descriptor in the run, `participating` the subset
    /// supporting the run's mode.
    ///
    /// # Errors
    /// Returns `Configuration` for duplicate ids, unknown dependencies,
    /// dependencies on gatherers outside the run's mode, or cycles.
    pub fn resolve(
        configured: &[GathererDescriptor],
        participating: &[&GathererDescriptor],
    ) -> Result<Self, GatherError> {
        let mut seen = HashSet::new();
        for descriptor in configured {
            if !seen.insert(descriptor.id.as_str()) {
                return Err(GatherError::Configuration(format!(
                    "duplicate gatherer id {}",
                    descriptor.id
                )));
            }
        }

        let index: HashMap<&str, usize> = participating
            .iter()
            .enumerate()
            .map(|(i, d)| (d.id.as_str(), i))
            .collect();

        let mut dependents = vec![Vec::new(); participating.len()];
        let mut in_degree = vec![0usize; participating.len()];
        for (consumer, descriptor) in participating.iter().enumerate() {
            for (input, producer) in &descriptor.dependencies {
                let Some(&producer_idx) = index.get(producer.as_str()) else {
                    let reason = if seen.contains(producer.as_str()) {
                        "does not participate in this mode"
                    } else {
                        "is not a configured gatherer"
                    };
                    return Err(GatherError::Configuration(format!(
                        "{} input {input} depends on {producer}, which {reason}",
                        descriptor.id
                    )));
                };
                dependents[producer_idx].push(consumer);
                in_degree[consumer] += 1;
            }
        }

        let mut layers = Vec::new();
        let mut ready: Vec<usize> = (0..participating.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();
        let mut placed = 0;
        while !ready.is_empty() {
            let mut next = Vec::new();
            for &node in &ready {
                for &consumer in &dependents[node] {
                    in_degree[consumer] -= 1;
                    if in_degree[consumer] == 0 {
                        next.push(consumer);
                    }
                }
            }
            next.sort_unstable();
            placed += ready.len();
            layers.push(std::mem::replace(&mut ready, next));
        }

        if placed < participating.len() {
            let cyclic: Vec<&str> = (0..participating.len())
                .filter(|&i| in_degree[i] > 0)
                .map(|i| participating[i].id.as_str())
                .collect();
            return Err(GatherError::Configuration(format!(
                "dependency cycle among {}",
                cyclic.join(", ")
            )));
        }

        Ok(Self { layers })
    }

    #[must_use]
    pub fn layers(&self) -> &[Vec<usize>] {
        &self.layers
    }

    /// Flattened collection order.
    pub fn order(&self) -> impl Iterator<Item = usize> + '_ {
        self.layers.iter().flatten().copied()
    }
}
