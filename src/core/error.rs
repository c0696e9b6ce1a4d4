//! Pipeline error taxonomy

use thiserror::Error;

/// Errors raised while defining or executing a pipeline
///
/// Construction errors (cycles, unknown steps, bad bindings) surface when the
/// definition is built and never mid-run. Execution errors carry the stage and
/// step that failed so the caller can report it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("Cycle detected in dependency graph: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("Unknown step '{step}'")]
    UnknownStep { step: String },

    #[error("Duplicate step '{step}'")]
    DuplicateStep { step: String },

    #[error("Invalid step '{step}': {reason}")]
    InvalidStep { step: String, reason: String },

    #[error("Step '{step}' binds {env_var} to {stack}.{output}, which is not available: {reason}")]
    UnresolvedBinding {
        step: String,
        env_var: String,
        stack: String,
        output: String,
        reason: String,
    },

    #[error("Duplicate stage '{stage}'")]
    DuplicateStage { stage: String },

    #[error("Production stage '{stage}' has no manual approval gate")]
    MissingApproval { stage: String },

    #[error("Stage '{stage}' cannot move from {from} to {to}")]
    InvalidTransition { stage: String, from: String, to: String },

    #[error("Gate '{gate}' rejected stage '{stage}': {reason}")]
    GateRejected { stage: String, gate: String, reason: String },

    #[error("Deploy of stack '{stack}' in stage '{stage}' failed: {message}")]
    DeployFailed { stage: String, stack: String, message: String },

    #[error("Outputs for stack '{stack}' were already recorded")]
    OutputsAlreadyRecorded { stack: String },

    #[error("Step '{step}' in stage '{stage}' failed: {message}")]
    StepExecution { stage: String, step: String, message: String },

    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// The step this error is attributed to, if any
    pub fn step(&self) -> Option<&str> {
        match self {
            PipelineError::UnknownStep { step }
            | PipelineError::DuplicateStep { step }
            | PipelineError::InvalidStep { step, .. }
            | PipelineError::UnresolvedBinding { step, .. }
            | PipelineError::StepExecution { step, .. } => Some(step),
            _ => None,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
