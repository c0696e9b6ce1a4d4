//! Test doubles for scenario tests

use async_trait::async_trait;
use stageline::core::{
    BuildEnvironment, Gate, PipelineDefinition, PipelineRun, StackRef, StepDescriptor,
};
use stageline::execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};
use stageline::runner::{AutoApprove, GateDecision, GateKeeper, RunnerError, StepRunner};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Shared, ordered record of everything the collaborators were asked to do
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> usize {
        self.entries()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("'{}' not in log: {:?}", entry, self.entries()))
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries().iter().any(|e| e == entry)
    }
}

/// Runner that records calls instead of executing anything
///
/// Log entries are `start:<stage>/<step>`, `run:<stage>/<step>` (on finish)
/// and `deploy:<stack>`.
#[derive(Debug, Clone, Default)]
pub struct RecordingRunner {
    pub log: CallLog,
    failing_steps: HashSet<String>,
    failing_stacks: HashSet<String>,
    outputs: HashMap<String, HashMap<String, String>>,
    delays: HashMap<String, Duration>,
    envs: Arc<Mutex<HashMap<String, HashMap<String, String>>>>,
    environments: Arc<Mutex<HashMap<String, BuildEnvironment>>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, step: &str) -> Self {
        self.failing_steps.insert(step.to_string());
        self
    }

    pub fn failing_deploy(mut self, stack: &str) -> Self {
        self.failing_stacks.insert(stack.to_string());
        self
    }

    /// Replace what `stack` emits on deploy
    pub fn with_outputs(mut self, stack: &str, outputs: &[(&str, &str)]) -> Self {
        self.outputs.insert(
            stack.to_string(),
            outputs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    pub fn with_delay(mut self, step: &str, delay: Duration) -> Self {
        self.delays.insert(step.to_string(), delay);
        self
    }

    /// Environment a step was started with, keyed `<stage>/<step>`
    pub fn env_of(&self, key: &str) -> Option<HashMap<String, String>> {
        self.envs.lock().unwrap().get(key).cloned()
    }

    /// Build environment a step ran on (`<stage>/<step>`) or a stack
    /// published its assets on (`deploy:<stack>`)
    pub fn environment_of(&self, key: &str) -> Option<BuildEnvironment> {
        self.environments.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl StepRunner for RecordingRunner {
    async fn run_step(
        &self,
        stage: &str,
        step: &StepDescriptor,
        environment: &BuildEnvironment,
        env: &HashMap<String, String>,
    ) -> Result<String, RunnerError> {
        let key = format!("{}/{}", stage, step.name());
        self.log.push(format!("start:{}", key));
        self.envs.lock().unwrap().insert(key.clone(), env.clone());
        self.environments
            .lock()
            .unwrap()
            .insert(key.clone(), environment.clone());

        if let Some(delay) = self.delays.get(step.name()) {
            tokio::time::sleep(*delay).await;
        }

        self.log.push(format!("run:{}", key));
        if self.failing_steps.contains(step.name()) {
            return Err(RunnerError::Command {
                command: step.commands().join(" && "),
                code: 1,
                stderr: format!("{} failed", step.name()),
            });
        }
        Ok(format!("{} ok", step.name()))
    }

    async fn deploy(
        &self,
        _stage: &str,
        stack: &StackRef,
        environment: &BuildEnvironment,
    ) -> Result<HashMap<String, String>, RunnerError> {
        self.log.push(format!("deploy:{}", stack.id));
        self.environments
            .lock()
            .unwrap()
            .insert(format!("deploy:{}", stack.id), environment.clone());
        if self.failing_stacks.contains(&stack.id) {
            return Err(RunnerError::Internal(format!("{} rolled back", stack.id)));
        }

        Ok(self.outputs.get(&stack.id).cloned().unwrap_or_else(|| {
            stack
                .outputs
                .iter()
                .map(|o| (o.clone(), format!("{}-{}", stack.id, o).to_lowercase()))
                .collect()
        }))
    }
}

/// Gate keeper driven by a test through a channel
///
/// Each `await_gate` reports `(stage, gate)` on `waiting` and then blocks
/// until the test sends a decision.
pub struct ChannelGate {
    log: CallLog,
    waiting: mpsc::UnboundedSender<(String, String)>,
    decisions: tokio::sync::Mutex<mpsc::UnboundedReceiver<GateDecision>>,
}

pub struct GateControl {
    pub waiting: mpsc::UnboundedReceiver<(String, String)>,
    pub decisions: mpsc::UnboundedSender<GateDecision>,
}

impl ChannelGate {
    pub fn new(log: CallLog) -> (Self, GateControl) {
        let (waiting_tx, waiting_rx) = mpsc::unbounded_channel();
        let (decision_tx, decision_rx) = mpsc::unbounded_channel();
        (
            Self {
                log,
                waiting: waiting_tx,
                decisions: tokio::sync::Mutex::new(decision_rx),
            },
            GateControl {
                waiting: waiting_rx,
                decisions: decision_tx,
            },
        )
    }
}

#[async_trait]
impl GateKeeper for ChannelGate {
    async fn await_gate(&self, stage: &str, gate: &Gate) -> Result<GateDecision, RunnerError> {
        self.log.push(format!("gate-wait:{}/{}", stage, gate.name()));
        let _ = self.waiting.send((stage.to_string(), gate.name().to_string()));

        let decision = self
            .decisions
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| RunnerError::Internal("approval channel closed".to_string()))?;

        self.log.push(format!("gate-done:{}/{}", stage, gate.name()));
        Ok(decision)
    }
}

/// Events captured from an engine run
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<ExecutionEvent>>>);

impl EventLog {
    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.0.lock().unwrap().clone()
    }
}

/// Run `pipeline` with auto-approval, capturing events
pub async fn run_auto<R: StepRunner + 'static>(
    runner: R,
    pipeline: &PipelineDefinition,
    strategy: SchedulingStrategy,
) -> (PipelineRun, EventLog) {
    let events = EventLog::default();
    let sink = events.clone();
    let engine = ExecutionEngine::new(runner, AutoApprove, strategy)
        .with_event_handler(move |e| sink.0.lock().unwrap().push(e));
    (engine.execute(pipeline).await, events)
}
