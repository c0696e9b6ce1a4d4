//! Stage domain model

use crate::core::{
    binding::OutputBinding,
    error::{PipelineError, PipelineResult},
    graph::StepGraph,
    step::StepDescriptor,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A deployable stack and the outputs it declares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackRef {
    pub id: String,
    #[serde(default)]
    pub outputs: Vec<String>,
}

impl StackRef {
    pub fn new<I, S>(id: impl Into<String>, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            outputs: outputs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn declares(&self, output: &str) -> bool {
        self.outputs.iter().any(|o| o == output)
    }
}

/// A blocking precondition on a stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Gate {
    /// Waits for a human to approve
    ManualApproval {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comment: Option<String>,
    },
}

impl Gate {
    pub fn manual_approval(name: impl Into<String>) -> Self {
        Gate::ManualApproval {
            name: name.into(),
            comment: None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Gate::ManualApproval { name, .. } => name,
        }
    }

    pub fn is_manual_approval(&self) -> bool {
        matches!(self, Gate::ManualApproval { .. })
    }
}

/// Lifecycle of one stage during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StagePhase {
    Pending,
    PreRunning,
    Deploying,
    PostRunning,
    Succeeded,
    Failed,
}

impl StagePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, StagePhase::Succeeded | StagePhase::Failed)
    }

    /// Whether the stage may move from `self` to `next`
    pub fn can_transition_to(self, next: StagePhase) -> bool {
        use StagePhase::*;
        match (self, next) {
            (Pending, PreRunning)
            | (PreRunning, Deploying)
            | (Deploying, PostRunning)
            | (PostRunning, Succeeded) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Checked transition
    pub fn advance(self, stage: &str, next: StagePhase) -> PipelineResult<StagePhase> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(PipelineError::InvalidTransition {
                stage: stage.to_string(),
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for StagePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Which part of a stage a step belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Pre,
    Post,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Pre => f.write_str("pre"),
            Phase::Post => f.write_str("post"),
        }
    }
}

/// One environment's deployment unit: pre steps, deploy, post steps
#[derive(Debug, Clone)]
pub struct StageDefinition {
    name: String,
    stack: StackRef,
    pre: StepGraph,
    post: StepGraph,
    gate: Option<Gate>,
    production: bool,
}

impl StageDefinition {
    /// Assemble a stage around `stack`
    ///
    /// Post steps may consume the stack's own outputs; pre steps run before
    /// the deploy and so may only consume outputs of earlier stages, which the
    /// pipeline checks when the stage is appended.
    pub fn compose(
        name: impl Into<String>,
        stack: StackRef,
        pre: StepGraph,
        post: StepGraph,
        gate: Option<Gate>,
    ) -> PipelineResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PipelineError::InvalidConfig("stage name must not be empty".to_string()));
        }
        if stack.id.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "stage '{}' has a stack with an empty id",
                name
            )));
        }

        if let Some((_, step)) = pre.steps().find(|(_, s)| post.index_of(s.name()).is_some()) {
            return Err(PipelineError::DuplicateStep {
                step: step.name().to_string(),
            });
        }

        let stage = Self {
            name,
            stack,
            pre,
            post,
            gate,
            production: false,
        };

        for binding in stage.bindings(Phase::Pre) {
            if binding.output.stack == stage.stack.id {
                return Err(binding.unresolved("pre steps run before this stack deploys"));
            }
        }
        for binding in stage.bindings(Phase::Post) {
            if binding.output.stack == stage.stack.id && !stage.stack.declares(&binding.output.output) {
                return Err(binding.unresolved("stack does not declare this output"));
            }
        }

        Ok(stage)
    }

    pub fn production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stack(&self) -> &StackRef {
        &self.stack
    }

    pub fn pre(&self) -> &StepGraph {
        &self.pre
    }

    pub fn post(&self) -> &StepGraph {
        &self.post
    }

    pub fn graph(&self, phase: Phase) -> &StepGraph {
        match phase {
            Phase::Pre => &self.pre,
            Phase::Post => &self.post,
        }
    }

    pub fn gate(&self) -> Option<&Gate> {
        self.gate.as_ref()
    }

    pub fn is_production(&self) -> bool {
        self.production
    }

    /// Every step of the stage, pre first
    pub fn steps(&self) -> impl Iterator<Item = (Phase, &StepDescriptor)> {
        self.pre
            .steps()
            .map(|(_, s)| (Phase::Pre, s))
            .chain(self.post.steps().map(|(_, s)| (Phase::Post, s)))
    }

    /// Output bindings consumed by the steps of one phase
    pub fn bindings(&self, phase: Phase) -> Vec<OutputBinding> {
        self.graph(phase)
            .steps()
            .flat_map(|(_, step)| step.bindings().collect::<Vec<_>>())
            .collect()
    }
}
