//! Execution state models

use crate::core::{
    error::PipelineError,
    stage::{Phase, StagePhase},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Pipeline completed successfully
    Completed,
    /// Pipeline failed
    Failed,
}

/// State of a single step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepState {
    /// Step is waiting for dependencies
    Pending,
    /// Step is currently running
    Running {
        started_at: DateTime<Utc>,
    },
    /// Step completed successfully
    Completed {
        output: String,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Step failed
    Failed {
        error: String,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Step never ran because something upstream failed
    Skipped {
        reason: String,
    },
}

impl StepState {
    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Completed { .. } | StepState::Failed { .. } | StepState::Skipped { .. }
        )
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, StepState::Completed { .. })
    }
}

/// A step's state within one stage run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRun {
    pub name: String,
    pub phase: Phase,
    pub state: StepState,
}

/// Outcome of one stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRun {
    pub name: String,
    pub stack: String,
    pub phase: StagePhase,
    pub steps: Vec<StepRun>,
    /// Outputs emitted by the stage's deploy
    pub outputs: HashMap<String, String>,
}

impl StageRun {
    pub fn step(&self, name: &str) -> Option<&StepRun> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Record of one pipeline execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Unique execution ID
    pub execution_id: Uuid,

    pub pipeline_name: String,

    /// Current execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution completed/failed
    pub completed_at: Option<DateTime<Utc>>,

    /// State of the synth step
    pub synth: StepState,

    /// One entry per stage, in pipeline order
    pub stages: Vec<StageRun>,

    /// The error that stopped the run, if any
    #[serde(skip)]
    pub error: Option<PipelineError>,
}

impl PipelineRun {
    /// Create a new pipeline run
    pub fn new(pipeline_name: impl Into<String>) -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            pipeline_name: pipeline_name.into(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            synth: StepState::Pending,
            stages: Vec::new(),
            error: None,
        }
    }

    /// Mark pipeline as started
    pub fn start(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark pipeline as completed
    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark pipeline as failed
    pub fn fail(&mut self, error: PipelineError) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    pub fn stage(&self, name: &str) -> Option<&StageRun> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// The step that stopped the run
    pub fn failed_step(&self) -> Option<&str> {
        self.error.as_ref().and_then(PipelineError::step)
    }

    /// Fraction of stages that succeeded (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.stages.is_empty() {
            return 0.0;
        }
        let done = self
            .stages
            .iter()
            .filter(|s| s.phase == StagePhase::Succeeded)
            .count();
        done as f64 / self.stages.len() as f64
    }

    /// Convert into a `Result`, surfacing the failure
    pub fn into_result(self) -> Result<Self, PipelineError> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(self),
        }
    }
}
