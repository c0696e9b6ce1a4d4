//! Step dependency graph
//!
//! Steps live in an arena and refer to each other by [`StepIndex`]. The graph
//! is assembled with [`StepGraphBuilder`], which rejects unknown steps and
//! cycles as edges are added, and is then frozen into an immutable
//! [`StepGraph`].

use crate::core::{
    error::{PipelineError, PipelineResult},
    step::StepDescriptor,
};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;

/// Position of a step in its graph, in declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepIndex(usize);

impl StepIndex {
    pub fn get(self) -> usize {
        self.0
    }
}

/// `target` must not start before `source` completes successfully
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyEdge {
    pub source: String,
    pub target: String,
}

impl fmt::Display for DependencyEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.target)
    }
}

/// Mutable builder for a [`StepGraph`]
#[derive(Debug, Clone, Default)]
pub struct StepGraphBuilder {
    steps: Vec<StepDescriptor>,
    index: HashMap<String, StepIndex>,
    dependencies: Vec<Vec<StepIndex>>,
}

impl StepGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step; declaration order is the tie-breaker for ordering
    pub fn add_step(&mut self, step: StepDescriptor) -> PipelineResult<StepIndex> {
        step.validate()?;

        if self.index.contains_key(step.name()) {
            return Err(PipelineError::DuplicateStep {
                step: step.name().to_string(),
            });
        }

        let idx = StepIndex(self.steps.len());
        self.index.insert(step.name().to_string(), idx);
        self.steps.push(step);
        self.dependencies.push(Vec::new());
        Ok(idx)
    }

    /// Builder-style [`add_step`](Self::add_step)
    pub fn step(mut self, step: StepDescriptor) -> PipelineResult<Self> {
        self.add_step(step)?;
        Ok(self)
    }

    /// Record that `target` waits for `source`
    ///
    /// Leaves the builder untouched when it fails.
    pub fn add_dependency(&mut self, target: &str, source: &str) -> PipelineResult<()> {
        let target_idx = self.lookup(target)?;
        let source_idx = self.lookup(source)?;

        if self.dependencies[target_idx.0].contains(&source_idx) {
            return Ok(());
        }

        // The new edge closes a cycle iff source already waits on target.
        if let Some(chain) = self.dependency_chain(source_idx, target_idx) {
            let mut path = vec![self.steps[target_idx.0].name().to_string()];
            path.extend(chain.into_iter().map(|i| self.steps[i.0].name().to_string()));
            return Err(PipelineError::Cycle { path });
        }

        self.dependencies[target_idx.0].push(source_idx);
        Ok(())
    }

    /// Builder-style [`add_dependency`](Self::add_dependency)
    pub fn depends_on(mut self, target: &str, source: &str) -> PipelineResult<Self> {
        self.add_dependency(target, source)?;
        Ok(self)
    }

    /// Validate and freeze the graph
    pub fn build(self) -> PipelineResult<StepGraph> {
        let mut dependents = vec![Vec::new(); self.steps.len()];
        for (target, deps) in self.dependencies.iter().enumerate() {
            for dep in deps {
                dependents[dep.0].push(StepIndex(target));
            }
        }

        let graph = StepGraph {
            steps: self.steps,
            index: self.index,
            dependencies: self.dependencies,
            dependents,
        };

        // Edges were checked one by one; this catches anything that slipped past.
        graph.ordered()?;
        Ok(graph)
    }

    fn lookup(&self, name: &str) -> PipelineResult<StepIndex> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| PipelineError::UnknownStep {
                step: name.to_string(),
            })
    }

    /// Dependency chain `from -> ... -> to`, following "waits on" edges
    fn dependency_chain(&self, from: StepIndex, to: StepIndex) -> Option<Vec<StepIndex>> {
        let mut parent: Vec<Option<StepIndex>> = vec![None; self.steps.len()];
        let mut seen = vec![false; self.steps.len()];
        let mut stack = vec![from];
        seen[from.0] = true;

        while let Some(current) = stack.pop() {
            if current == to {
                let mut chain = vec![current];
                let mut cursor = current;
                while let Some(prev) = parent[cursor.0] {
                    chain.push(prev);
                    cursor = prev;
                }
                chain.reverse();
                return Some(chain);
            }

            for &dep in &self.dependencies[current.0] {
                if !seen[dep.0] {
                    seen[dep.0] = true;
                    parent[dep.0] = Some(current);
                    stack.push(dep);
                }
            }
        }

        None
    }
}

/// Immutable, validated step DAG
#[derive(Debug, Clone, Default)]
pub struct StepGraph {
    steps: Vec<StepDescriptor>,
    index: HashMap<String, StepIndex>,
    dependencies: Vec<Vec<StepIndex>>,
    dependents: Vec<Vec<StepIndex>>,
}

impl StepGraph {
    pub fn builder() -> StepGraphBuilder {
        StepGraphBuilder::new()
    }

    /// Graph of independent steps, in the given order
    pub fn from_steps<I>(steps: I) -> PipelineResult<Self>
    where
        I: IntoIterator<Item = StepDescriptor>,
    {
        let mut builder = StepGraphBuilder::new();
        for step in steps {
            builder.add_step(step)?;
        }
        builder.build()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps in declaration order
    pub fn steps(&self) -> impl Iterator<Item = (StepIndex, &StepDescriptor)> {
        self.steps.iter().enumerate().map(|(i, s)| (StepIndex(i), s))
    }

    pub fn step(&self, idx: StepIndex) -> &StepDescriptor {
        &self.steps[idx.0]
    }

    pub fn get(&self, name: &str) -> Option<&StepDescriptor> {
        self.index_of(name).map(|idx| self.step(idx))
    }

    pub fn index_of(&self, name: &str) -> Option<StepIndex> {
        self.index.get(name).copied()
    }

    /// Steps `idx` waits for
    pub fn dependencies(&self, idx: StepIndex) -> &[StepIndex] {
        &self.dependencies[idx.0]
    }

    /// Steps waiting for `idx`
    pub fn dependents(&self, idx: StepIndex) -> &[StepIndex] {
        &self.dependents[idx.0]
    }

    /// Names of the steps `name` waits for, in the order they were added
    pub fn dependency_names(&self, name: &str) -> Vec<&str> {
        self.index_of(name)
            .map(|idx| {
                self.dependencies(idx)
                    .iter()
                    .map(|dep| self.step(*dep).name())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every dependency edge, grouped by target in declaration order
    pub fn edges(&self) -> Vec<DependencyEdge> {
        self.dependencies
            .iter()
            .enumerate()
            .flat_map(|(target, deps)| {
                deps.iter().map(move |dep| DependencyEdge {
                    source: self.steps[dep.0].name().to_string(),
                    target: self.steps[target].name().to_string(),
                })
            })
            .collect()
    }

    /// Lazily walk the steps so that every step follows its dependencies
    pub fn topological_order(&self) -> TopologicalOrder<'_> {
        TopologicalOrder::new(self)
    }

    /// Eager form of [`topological_order`](Self::topological_order)
    pub fn ordered(&self) -> PipelineResult<Vec<&StepDescriptor>> {
        self.topological_order().collect()
    }
}

/// Kahn's algorithm, ties broken by declaration order
pub struct TopologicalOrder<'a> {
    graph: &'a StepGraph,
    pending: Vec<usize>,
    ready: BinaryHeap<Reverse<usize>>,
    emitted: usize,
    done: bool,
}

impl<'a> TopologicalOrder<'a> {
    fn new(graph: &'a StepGraph) -> Self {
        let pending: Vec<usize> = graph.dependencies.iter().map(Vec::len).collect();
        let ready = pending
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        Self {
            graph,
            pending,
            ready,
            emitted: 0,
            done: false,
        }
    }
}

impl<'a> Iterator for TopologicalOrder<'a> {
    type Item = PipelineResult<&'a StepDescriptor>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.ready.pop() {
            Some(Reverse(idx)) => {
                for dependent in &self.graph.dependents[idx] {
                    self.pending[dependent.0] -= 1;
                    if self.pending[dependent.0] == 0 {
                        self.ready.push(Reverse(dependent.0));
                    }
                }
                self.emitted += 1;
                Some(Ok(&self.graph.steps[idx]))
            }
            None => {
                self.done = true;
                if self.emitted < self.graph.steps.len() {
                    let path = self
                        .pending
                        .iter()
                        .enumerate()
                        .filter(|(_, count)| **count > 0)
                        .map(|(i, _)| self.graph.steps[i].name().to_string())
                        .collect();
                    Some(Err(PipelineError::Cycle { path }))
                } else {
                    None
                }
            }
        }
    }
}
