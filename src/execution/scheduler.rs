//! Execution scheduler - determines which steps to run next

use crate::core::{StepGraph, StepIndex, StepState};

/// Strategy for scheduling step execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SchedulingStrategy {
    /// Execute steps in dependency order, one at a time
    #[default]
    Sequential,

    /// Execute all ready steps in parallel
    Parallel,

    /// Limited parallelism (max N concurrent steps)
    LimitedParallel(usize),
}

/// Scheduler for determining which steps of a graph to run
#[derive(Debug, Clone)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Get the next batch of steps to execute
    ///
    /// `states` is indexed like the graph. A step is ready when it is pending
    /// and every step it depends on has completed.
    pub fn next_steps(&self, graph: &StepGraph, states: &[StepState]) -> Vec<StepIndex> {
        let running = states
            .iter()
            .filter(|s| matches!(s, StepState::Running { .. }))
            .count();
        let ready = Self::ready_steps(graph, states);

        match self.strategy {
            SchedulingStrategy::Sequential if running == 0 => ready.into_iter().take(1).collect(),
            SchedulingStrategy::Sequential => vec![],
            SchedulingStrategy::Parallel => ready,
            SchedulingStrategy::LimitedParallel(max) => {
                let remaining = max.max(1).saturating_sub(running);
                ready.into_iter().take(remaining).collect()
            }
        }
    }

    /// Ready steps in topological order
    fn ready_steps(graph: &StepGraph, states: &[StepState]) -> Vec<StepIndex> {
        graph
            .topological_order()
            .filter_map(Result::ok)
            .filter_map(|step| graph.index_of(step.name()))
            .filter(|idx| {
                matches!(states[idx.get()], StepState::Pending)
                    && graph
                        .dependencies(*idx)
                        .iter()
                        .all(|dep| states[dep.get()].is_completed())
            })
            .collect()
    }
}
