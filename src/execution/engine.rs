//! Main execution engine - drives a pipeline definition through its stages

use crate::{
    core::{
        resolve_environment, ExecutionStatus, Gate, OutputStore, Phase, PipelineDefinition,
        PipelineError, PipelineResult, PipelineRun, StageEntry, StagePhase, StageRun, StepGraph,
        StepIndex, StepRun, StepState,
    },
    execution::{ExecutionScheduler, SchedulingStrategy},
    runner::{GateDecision, GateKeeper, RunnerError, StepRunner},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Stage name under which the synth step is reported
pub const SYNTH_STAGE: &str = "Build";

/// Events that can occur during pipeline execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ExecutionEvent {
    PipelineStarted {
        execution_id: Uuid,
        pipeline_name: String,
    },
    GateWaiting {
        stage: String,
        gate: String,
    },
    GateApproved {
        stage: String,
        gate: String,
    },
    GateRejected {
        stage: String,
        gate: String,
        reason: String,
    },
    StageStarted {
        stage: String,
    },
    StepStarted {
        stage: String,
        step: String,
    },
    StepCompleted {
        stage: String,
        step: String,
    },
    StepFailed {
        stage: String,
        step: String,
        error: String,
    },
    StepSkipped {
        stage: String,
        step: String,
        reason: String,
    },
    DeployStarted {
        stage: String,
        stack: String,
    },
    DeployCompleted {
        stage: String,
        stack: String,
        outputs: Vec<String>,
    },
    StageCompleted {
        stage: String,
        phase: StagePhase,
    },
    PipelineCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

type StepOutcome = (StepIndex, DateTime<Utc>, Result<String, RunnerError>);

/// Main pipeline execution engine
///
/// Stages run strictly one after another. Within a phase, independent steps
/// may run together depending on the scheduling strategy.
pub struct ExecutionEngine<R, G> {
    runner: Arc<R>,
    gates: Arc<G>,
    scheduler: ExecutionScheduler,
    event_handlers: Vec<EventHandler>,
}

impl<R, G> ExecutionEngine<R, G>
where
    R: StepRunner + 'static,
    G: GateKeeper + 'static,
{
    pub fn new(runner: R, gates: G, strategy: SchedulingStrategy) -> Self {
        Self {
            runner: Arc::new(runner),
            gates: Arc::new(gates),
            scheduler: ExecutionScheduler::new(strategy),
            event_handlers: Vec::new(),
        }
    }

    /// Add an event handler
    pub fn with_event_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.push(Arc::new(handler));
        self
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        for handler in &self.event_handlers {
            handler(event.clone());
        }
    }

    /// Execute the entire pipeline
    ///
    /// Always returns a run record; on failure `run.error` names what failed
    /// and no later stage has started.
    pub async fn execute(&self, pipeline: &PipelineDefinition) -> PipelineRun {
        let mut run = PipelineRun::new(pipeline.name());
        run.stages = pipeline.stages().iter().map(new_stage_run).collect();

        info!(
            "Starting pipeline execution: {} ({}) from {}@{}",
            pipeline.name(),
            run.execution_id,
            pipeline.source().repo,
            pipeline.source().branch
        );
        run.start();
        self.emit_event(ExecutionEvent::PipelineStarted {
            execution_id: run.execution_id,
            pipeline_name: pipeline.name().to_string(),
        });

        match self.run_pipeline(pipeline, &mut run).await {
            Ok(()) => run.complete(),
            Err(err) => {
                error!("Pipeline {} failed: {}", pipeline.name(), err);
                run.fail(err);
            }
        }

        info!("Pipeline execution finished: {} - {:?}", pipeline.name(), run.status);
        self.emit_event(ExecutionEvent::PipelineCompleted {
            execution_id: run.execution_id,
            status: run.status,
        });

        run
    }

    async fn run_pipeline(&self, pipeline: &PipelineDefinition, run: &mut PipelineRun) -> PipelineResult<()> {
        let mut outputs = OutputStore::new();

        run.synth = self.run_synth(pipeline).await;
        if let StepState::Failed { error, .. } = &run.synth {
            return Err(PipelineError::StepExecution {
                stage: SYNTH_STAGE.to_string(),
                step: pipeline.synth().name().to_string(),
                message: error.clone(),
            });
        }

        for (entry, stage_run) in pipeline.stages().iter().zip(run.stages.iter_mut()) {
            self.run_stage(pipeline, entry, stage_run, &mut outputs).await?;
        }

        Ok(())
    }

    async fn run_synth(&self, pipeline: &PipelineDefinition) -> StepState {
        let synth = pipeline.synth().clone();
        let environment = pipeline.effective_environment(pipeline.synth()).clone();
        let env: HashMap<String, String> = synth
            .literal_env()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let started_at = Utc::now();
        self.emit_event(ExecutionEvent::StepStarted {
            stage: SYNTH_STAGE.to_string(),
            step: synth.name().to_string(),
        });

        let runner = Arc::clone(&self.runner);
        let step = synth.clone();
        let result = tokio::spawn(async move {
            runner.run_step(SYNTH_STAGE, &step, &environment, &env).await
        })
        .await
        .unwrap_or_else(|e| Err(task_failure(e)));
        self.finish_step(SYNTH_STAGE, synth.name(), started_at, result)
    }

    /// Run one stage; on failure the stage is marked failed and its
    /// unfinished steps skipped
    async fn run_stage(
        &self,
        pipeline: &PipelineDefinition,
        entry: &StageEntry,
        stage_run: &mut StageRun,
        outputs: &mut OutputStore,
    ) -> PipelineResult<()> {
        let result = self.drive_stage(pipeline, entry, stage_run, outputs).await;

        if let Err(err) = &result {
            if !stage_run.phase.is_terminal() {
                stage_run.phase = StagePhase::Failed;
            }
            let reason = match err.step() {
                Some(step) => format!("blocked by failed step '{}'", step),
                None => format!("stage failed: {}", err),
            };
            for step in stage_run.steps.iter_mut().filter(|s| !s.state.is_terminal()) {
                step.state = StepState::Skipped {
                    reason: reason.clone(),
                };
                self.emit_event(ExecutionEvent::StepSkipped {
                    stage: stage_run.name.clone(),
                    step: step.name.clone(),
                    reason: reason.clone(),
                });
            }
        }

        self.emit_event(ExecutionEvent::StageCompleted {
            stage: stage_run.name.clone(),
            phase: stage_run.phase,
        });
        result
    }

    async fn drive_stage(
        &self,
        pipeline: &PipelineDefinition,
        entry: &StageEntry,
        stage_run: &mut StageRun,
        outputs: &mut OutputStore,
    ) -> PipelineResult<()> {
        let stage = &entry.stage;
        let name = stage.name();

        for gate in &entry.pre_gates {
            self.pass_gate(name, gate).await?;
        }

        info!("Stage {} starting", name);
        self.emit_event(ExecutionEvent::StageStarted {
            stage: name.to_string(),
        });
        stage_run.phase = stage_run.phase.advance(name, StagePhase::PreRunning)?;
        self.run_phase(pipeline, name, Phase::Pre, stage.pre(), stage_run, outputs)
            .await?;

        if let Some(gate) = stage.gate() {
            self.pass_gate(name, gate).await?;
        }

        stage_run.phase = stage_run.phase.advance(name, StagePhase::Deploying)?;
        let stack = stage.stack();
        self.emit_event(ExecutionEvent::DeployStarted {
            stage: name.to_string(),
            stack: stack.id.clone(),
        });
        let emitted = self
            .runner
            .deploy(name, stack, pipeline.deploy_environment())
            .await
            .map_err(|e| PipelineError::DeployFailed {
                stage: name.to_string(),
                stack: stack.id.clone(),
                message: e.to_string(),
            })?;

        for declared in &stack.outputs {
            if !emitted.contains_key(declared) {
                warn!("Stack {} did not emit declared output {}", stack.id, declared);
            }
        }
        let mut emitted_names: Vec<String> = emitted.keys().cloned().collect();
        emitted_names.sort();
        outputs.record(&stack.id, emitted.clone())?;
        stage_run.outputs = emitted;
        self.emit_event(ExecutionEvent::DeployCompleted {
            stage: name.to_string(),
            stack: stack.id.clone(),
            outputs: emitted_names,
        });

        stage_run.phase = stage_run.phase.advance(name, StagePhase::PostRunning)?;
        self.run_phase(pipeline, name, Phase::Post, stage.post(), stage_run, outputs)
            .await?;

        stage_run.phase = stage_run.phase.advance(name, StagePhase::Succeeded)?;
        info!("Stage {} succeeded", name);
        Ok(())
    }

    async fn pass_gate(&self, stage: &str, gate: &Gate) -> PipelineResult<()> {
        info!("Stage {} waiting on {}", stage, gate.name());
        self.emit_event(ExecutionEvent::GateWaiting {
            stage: stage.to_string(),
            gate: gate.name().to_string(),
        });

        let decision = self
            .gates
            .await_gate(stage, gate)
            .await
            .unwrap_or_else(|e| GateDecision::Rejected {
                reason: e.to_string(),
            });

        match decision {
            GateDecision::Approved => {
                self.emit_event(ExecutionEvent::GateApproved {
                    stage: stage.to_string(),
                    gate: gate.name().to_string(),
                });
                Ok(())
            }
            GateDecision::Rejected { reason } => {
                warn!("Gate {} rejected stage {}: {}", gate.name(), stage, reason);
                self.emit_event(ExecutionEvent::GateRejected {
                    stage: stage.to_string(),
                    gate: gate.name().to_string(),
                    reason: reason.clone(),
                });
                Err(PipelineError::GateRejected {
                    stage: stage.to_string(),
                    gate: gate.name().to_string(),
                    reason,
                })
            }
        }
    }

    /// Run every step of one phase, respecting the graph's dependencies
    async fn run_phase(
        &self,
        pipeline: &PipelineDefinition,
        stage: &str,
        phase: Phase,
        graph: &StepGraph,
        stage_run: &mut StageRun,
        outputs: &OutputStore,
    ) -> PipelineResult<()> {
        let mut states = vec![StepState::Pending; graph.len()];
        let result = self
            .run_graph(pipeline, stage, graph, &mut states, outputs)
            .await;

        for (idx, step) in graph.steps() {
            if let Some(record) = stage_run
                .steps
                .iter_mut()
                .find(|s| s.phase == phase && s.name == step.name())
            {
                record.state = states[idx.get()].clone();
            }
        }

        result
    }

    async fn run_graph(
        &self,
        pipeline: &PipelineDefinition,
        stage: &str,
        graph: &StepGraph,
        states: &mut [StepState],
        outputs: &OutputStore,
    ) -> PipelineResult<()> {
        loop {
            let batch = self.scheduler.next_steps(graph, states);
            if batch.is_empty() {
                break;
            }
            debug!(
                "Stage {}: running batch of {} step(s) ({:?})",
                stage,
                batch.len(),
                self.scheduler.strategy()
            );

            // Resolve every environment before starting anything in the batch.
            let mut prepared = Vec::with_capacity(batch.len());
            for idx in &batch {
                let step = graph.step(*idx);
                match resolve_environment(step, outputs) {
                    Ok(env) => prepared.push((*idx, env)),
                    Err(err) => {
                        let now = Utc::now();
                        states[idx.get()] = StepState::Failed {
                            error: err.to_string(),
                            started_at: now,
                            failed_at: now,
                        };
                        self.emit_event(ExecutionEvent::StepFailed {
                            stage: stage.to_string(),
                            step: step.name().to_string(),
                            error: err.to_string(),
                        });
                        return Err(err);
                    }
                }
            }

            let mut tasks: JoinSet<Result<String, RunnerError>> = JoinSet::new();
            let mut spawned: HashMap<task::Id, (StepIndex, DateTime<Utc>)> = HashMap::new();
            for (idx, env) in prepared {
                let step = graph.step(idx).clone();
                let environment = pipeline.effective_environment(&step).clone();
                let started_at = Utc::now();
                states[idx.get()] = StepState::Running { started_at };
                self.emit_event(ExecutionEvent::StepStarted {
                    stage: stage.to_string(),
                    step: step.name().to_string(),
                });

                let runner = Arc::clone(&self.runner);
                let stage_name = stage.to_string();
                let handle = tasks.spawn(async move {
                    runner.run_step(&stage_name, &step, &environment, &env).await
                });
                spawned.insert(handle.id(), (idx, started_at));
            }

            // A panicking runner still finishes its own step.
            let mut outcomes: Vec<StepOutcome> = Vec::with_capacity(spawned.len());
            while let Some(joined) = tasks.join_next_with_id().await {
                let (id, result) = match joined {
                    Ok((id, result)) => (id, result),
                    Err(e) => (e.id(), Err(task_failure(e))),
                };
                match spawned.remove(&id) {
                    Some((idx, started_at)) => outcomes.push((idx, started_at, result)),
                    None => error!("Stage {}: task {} does not belong to this batch", stage, id),
                }
            }
            outcomes.sort_by_key(|(idx, _, _)| *idx);

            let mut first_failure = None;
            for (idx, started_at, result) in outcomes {
                let name = graph.step(idx).name();
                let state = self.finish_step(stage, name, started_at, result);
                if let StepState::Failed { error, .. } = &state {
                    first_failure.get_or_insert_with(|| PipelineError::StepExecution {
                        stage: stage.to_string(),
                        step: name.to_string(),
                        message: error.clone(),
                    });
                }
                states[idx.get()] = state;
            }

            if let Some(err) = first_failure {
                return Err(err);
            }
        }

        Ok(())
    }

    fn finish_step(
        &self,
        stage: &str,
        step: &str,
        started_at: DateTime<Utc>,
        result: Result<String, RunnerError>,
    ) -> StepState {
        match result {
            Ok(output) => {
                info!("Step {}/{} completed", stage, step);
                self.emit_event(ExecutionEvent::StepCompleted {
                    stage: stage.to_string(),
                    step: step.to_string(),
                });
                StepState::Completed {
                    output,
                    started_at,
                    completed_at: Utc::now(),
                }
            }
            Err(e) => {
                error!("Step {}/{} failed: {}", stage, step, e);
                self.emit_event(ExecutionEvent::StepFailed {
                    stage: stage.to_string(),
                    step: step.to_string(),
                    error: e.to_string(),
                });
                StepState::Failed {
                    error: e.to_string(),
                    started_at,
                    failed_at: Utc::now(),
                }
            }
        }
    }
}

fn task_failure(err: JoinError) -> RunnerError {
    if err.is_panic() {
        RunnerError::Internal(format!("runner panicked: {}", err))
    } else {
        RunnerError::Internal(format!("step task aborted: {}", err))
    }
}

fn new_stage_run(entry: &StageEntry) -> StageRun {
    StageRun {
        name: entry.stage.name().to_string(),
        stack: entry.stage.stack().id.clone(),
        phase: StagePhase::Pending,
        steps: entry
            .stage
            .steps()
            .map(|(phase, step)| StepRun {
                name: step.name().to_string(),
                phase,
                state: StepState::Pending,
            })
            .collect(),
        outputs: HashMap::new(),
    }
}
