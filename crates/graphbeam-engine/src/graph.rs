//! Step dependency graph.
//!
//! Edge direction: `a -> b` means b depends on a. Built once during the
//! validation phase; cycles and unknown dependencies are configuration
//! errors.

use std::collections::HashMap;

use graphbeam_types::{IntegrationError, StepId, StepMetadata};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

/// Immutable adjacency view of the declared steps.
#[derive(Debug)]
pub struct StepGraph {
    order: Vec<StepId>,
    dependencies: HashMap<StepId, Vec<StepId>>,
    dependents: HashMap<StepId, Vec<StepId>>,
}

impl StepGraph {
    /// Build and validate the graph.
    ///
    /// # Errors
    ///
    /// Returns a `config` error for duplicate step ids
    /// (`DUPLICATE_STEP_ID`), dependencies on undeclared steps
    /// (`UNKNOWN_DEPENDENCY`), self-dependencies, and cycles
    /// (`CYCLIC_DEPENDENCY`).
    pub fn build(steps: &[StepMetadata]) -> Result<Self, IntegrationError> {
        let mut dependencies: HashMap<StepId, Vec<StepId>> = HashMap::new();
        let mut dependents: HashMap<StepId, Vec<StepId>> = HashMap::new();
        let mut order = Vec::with_capacity(steps.len());

        for step in steps {
            if dependencies.contains_key(&step.id) {
                return Err(IntegrationError::config(
                    "DUPLICATE_STEP_ID",
                    format!("step '{}' is declared more than once", step.id),
                ));
            }
            order.push(step.id.clone());
            dependencies.insert(step.id.clone(), step.depends_on.clone());
            dependents.entry(step.id.clone()).or_default();
        }

        for step in steps {
            for dep in &step.depends_on {
                if dep == &step.id {
                    return Err(IntegrationError::config(
                        "CYCLIC_DEPENDENCY",
                        format!("step '{}' depends on itself", step.id),
                    ));
                }
                if !dependencies.contains_key(dep) {
                    return Err(IntegrationError::config(
                        "UNKNOWN_DEPENDENCY",
                        format!("step '{}' depends on undeclared step '{}'", step.id, dep),
                    ));
                }
                dependents
                    .get_mut(dep)
                    .expect("dependency present after declaration pass")
                    .push(step.id.clone());
            }
        }

        // Index-based graph: DiGraphMap nodes must be Copy.
        let index_of: HashMap<&StepId, usize> = order
            .iter()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();
        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();
        for i in 0..order.len() {
            graph.add_node(i);
        }
        for step in steps {
            for dep in &step.depends_on {
                graph.add_edge(index_of[dep], index_of[&step.id], ());
            }
        }
        if let Err(cycle) = toposort(&graph, None) {
            return Err(IntegrationError::config(
                "CYCLIC_DEPENDENCY",
                format!(
                    "cycle detected in step dependencies involving step '{}'",
                    order[cycle.node_id()]
                ),
            ));
        }

        Ok(Self {
            order,
            dependencies,
            dependents,
        })
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Step ids in declaration order.
    #[must_use]
    pub fn ids(&self) -> &[StepId] {
        &self.order
    }

    /// Steps with no dependencies, in declaration order.
    #[must_use]
    pub fn roots(&self) -> Vec<StepId> {
        self.order
            .iter()
            .filter(|id| self.dependencies[*id].is_empty())
            .cloned()
            .collect()
    }

    /// Direct dependencies of a step.
    #[must_use]
    pub fn dependencies_of(&self, id: &StepId) -> &[StepId] {
        self.dependencies.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Direct dependents of a step.
    #[must_use]
    pub fn dependents_of(&self, id: &StepId) -> &[StepId] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}
