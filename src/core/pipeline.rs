//! Pipeline domain model

use crate::core::{
    error::{PipelineError, PipelineResult},
    graph::StepGraph,
    stage::{Gate, Phase, StageDefinition},
    step::{BuildEnvironment, StepDescriptor},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Repository and branch the pipeline pulls from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    /// `owner/repo`
    pub repo: String,
    pub branch: String,
}

impl SourceRef {
    pub fn new(repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            branch: branch.into(),
        }
    }
}

/// Build environments used when a step does not request its own
///
/// Every environment defaults to a plain medium container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildDefaults {
    /// Regular pipeline steps
    #[serde(default)]
    pub general: BuildEnvironment,

    /// The synth step
    #[serde(default)]
    pub synth: BuildEnvironment,

    /// Container image and file asset publishing
    #[serde(default)]
    pub asset_publishing: BuildEnvironment,
}

/// A stage and the gates that must pass before its pre phase begins
#[derive(Debug, Clone)]
pub struct StageEntry {
    pub stage: StageDefinition,
    pub pre_gates: Vec<Gate>,
}

impl StageEntry {
    /// Whether a manual approval sits anywhere in front of the deploy
    pub fn has_manual_approval(&self) -> bool {
        self.pre_gates.iter().any(Gate::is_manual_approval)
            || self.stage.gate().is_some_and(Gate::is_manual_approval)
    }
}

/// A whole release pipeline: synth, then stages in deployment order
#[derive(Debug, Clone)]
pub struct PipelineDefinition {
    name: String,
    source: SourceRef,
    synth: StepDescriptor,
    defaults: BuildDefaults,
    stages: Vec<StageEntry>,
}

impl PipelineDefinition {
    pub fn new(
        name: impl Into<String>,
        source: SourceRef,
        synth: StepDescriptor,
    ) -> PipelineResult<Self> {
        synth.validate()?;
        if let Some(binding) = synth.bindings().next() {
            return Err(binding.unresolved("the synth step runs before any stack deploys"));
        }
        if source.repo.trim().is_empty() || source.branch.trim().is_empty() {
            return Err(PipelineError::InvalidConfig(
                "source repository and branch must not be empty".to_string(),
            ));
        }

        Ok(Self {
            name: name.into(),
            source,
            synth,
            defaults: BuildDefaults::default(),
            stages: Vec::new(),
        })
    }

    pub fn with_defaults(mut self, defaults: BuildDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Append a stage after every stage already added
    ///
    /// `pre_gates` must all pass before the stage's pre phase starts. A
    /// production stage needs a manual approval either here or as the stage's
    /// own gate. Every output binding must point at this stage's stack (post
    /// steps only) or at a stack deployed by an earlier stage.
    pub fn append_stage(&mut self, stage: StageDefinition, pre_gates: Vec<Gate>) -> PipelineResult<()> {
        if self.stages.iter().any(|e| e.stage.name() == stage.name()) {
            return Err(PipelineError::DuplicateStage {
                stage: stage.name().to_string(),
            });
        }
        if self.stages.iter().any(|e| e.stage.stack().id == stage.stack().id) {
            return Err(PipelineError::InvalidConfig(format!(
                "stack '{}' is already deployed by another stage",
                stage.stack().id
            )));
        }

        if let Some((_, step)) = stage.steps().find(|(_, s)| s.name() == self.synth.name()) {
            return Err(PipelineError::DuplicateStep {
                step: step.name().to_string(),
            });
        }

        let entry = StageEntry { stage, pre_gates };
        if entry.stage.is_production() && !entry.has_manual_approval() {
            return Err(PipelineError::MissingApproval {
                stage: entry.stage.name().to_string(),
            });
        }

        let earlier: HashMap<&str, &StageDefinition> = self
            .stages
            .iter()
            .map(|e| (e.stage.stack().id.as_str(), &e.stage))
            .collect();
        for phase in [Phase::Pre, Phase::Post] {
            for binding in entry.stage.bindings(phase) {
                if binding.output.stack == entry.stage.stack().id {
                    continue;
                }
                match earlier.get(binding.output.stack.as_str()) {
                    Some(producer) if producer.stack().declares(&binding.output.output) => {}
                    Some(_) => return Err(binding.unresolved("stack does not declare this output")),
                    None => return Err(binding.unresolved("no earlier stage deploys this stack")),
                }
            }
        }

        self.stages.push(entry);
        Ok(())
    }

    /// Builder-style [`append_stage`](Self::append_stage)
    pub fn with_stage(mut self, stage: StageDefinition, pre_gates: Vec<Gate>) -> PipelineResult<Self> {
        self.append_stage(stage, pre_gates)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &SourceRef {
        &self.source
    }

    pub fn synth(&self) -> &StepDescriptor {
        &self.synth
    }

    pub fn defaults(&self) -> &BuildDefaults {
        &self.defaults
    }

    pub fn stages(&self) -> &[StageEntry] {
        &self.stages
    }

    pub fn stage(&self, name: &str) -> Option<&StageEntry> {
        self.stages.iter().find(|e| e.stage.name() == name)
    }

    /// Build environment a step will actually run with
    ///
    /// A step's own environment wins. Otherwise the synth step gets the synth
    /// default and stage steps get the general default.
    pub fn effective_environment<'a>(&'a self, step: &'a StepDescriptor) -> &'a BuildEnvironment {
        match step.environment() {
            Some(environment) => environment,
            None if step.name() == self.synth.name() => &self.defaults.synth,
            None => &self.defaults.general,
        }
    }

    /// Build environment used to publish a stack's assets during deploy
    pub fn deploy_environment(&self) -> &BuildEnvironment {
        &self.defaults.asset_publishing
    }

    /// Every step graph in execution order
    pub fn step_graphs(&self) -> impl Iterator<Item = (&str, Phase, &StepGraph)> {
        self.stages.iter().flat_map(|e| {
            [Phase::Pre, Phase::Post]
                .into_iter()
                .map(move |phase| (e.stage.name(), phase, e.stage.graph(phase)))
        })
    }

    /// Number of steps across all stages, synth included
    pub fn step_count(&self) -> usize {
        1 + self
            .stages
            .iter()
            .map(|e| e.stage.pre().len() + e.stage.post().len())
            .sum::<usize>()
    }
}
