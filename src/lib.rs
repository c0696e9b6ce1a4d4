//! stageline - staged release pipelines with ordered steps and stack output bindings

pub mod cli;
pub mod core;
pub mod endpoint;
pub mod execution;
pub mod runner;

// Re-export commonly used types
pub use core::{
    ExecutionStatus, OutputRef, PipelineDefinition, PipelineError, PipelineRun, StageDefinition,
    StepDescriptor, StepGraph, StepState,
};
pub use execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};
pub use runner::{GateDecision, GateKeeper, RunnerError, StepRunner};
