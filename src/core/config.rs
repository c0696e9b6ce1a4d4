//! Pipeline configuration from YAML
//!
//! The declarative form of a [`PipelineDefinition`]. Converting a definition
//! to config and back yields the same steps and dependency edges.

use crate::core::{
    binding::OutputRef,
    error::PipelineResult,
    graph::{StepGraph, StepGraphBuilder},
    pipeline::{BuildDefaults, PipelineDefinition, SourceRef},
    stage::{Gate, StackRef, StageDefinition},
    step::{BuildEnvironment, EnvValue, StepDescriptor},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level pipeline configuration loaded from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pipeline name
    pub name: String,

    /// Repository and branch to pull from
    pub source: SourceRef,

    /// Default build environments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<BuildDefaults>,

    /// Step that synthesizes the deployable stacks
    pub synth: StepConfig,

    /// Stages in deployment order
    #[serde(default)]
    pub stages: Vec<StageConfig>,

    /// Stack output values used by local runs (stack id -> output -> value)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub local_outputs: BTreeMap<String, BTreeMap<String, String>>,
}

/// Stage configuration as defined in YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,

    pub stack: StackRef,

    /// Production stages require a manual approval
    #[serde(default)]
    pub production: bool,

    /// Gates that must pass before the pre phase
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_gates: Vec<Gate>,

    /// Gate that must pass before the deploy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gate: Option<Gate>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre: Vec<StepConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post: Vec<StepConfig>,
}

/// Step configuration as defined in YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Step name, unique within its stage
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install_commands: Vec<String>,

    pub commands: Vec<String>,

    /// Overrides the pipeline's default build environment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<BuildEnvironment>,

    /// Literal environment variables
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Environment variables taken from stack outputs
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env_from_outputs: BTreeMap<String, OutputRef>,

    /// Steps in the same phase this step waits for
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl PipelineConfig {
    /// Load pipeline configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse pipeline configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PipelineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        self.to_definition()?;

        for stack in self.local_outputs.keys() {
            if !self.stages.iter().any(|s| &s.stack.id == stack) {
                anyhow::bail!("local_outputs references unknown stack '{}'", stack);
            }
        }

        Ok(())
    }

    /// Serialize back to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Convert config to a validated PipelineDefinition
    pub fn to_definition(&self) -> PipelineResult<PipelineDefinition> {
        let mut pipeline =
            PipelineDefinition::new(&self.name, self.source.clone(), self.synth.to_step())?;
        if let Some(defaults) = &self.defaults {
            pipeline = pipeline.with_defaults(defaults.clone());
        }

        for stage in &self.stages {
            let definition = StageDefinition::compose(
                &stage.name,
                stage.stack.clone(),
                build_graph(&stage.pre)?,
                build_graph(&stage.post)?,
                stage.gate.clone(),
            )?
            .production(stage.production);
            pipeline.append_stage(definition, stage.pre_gates.clone())?;
        }

        Ok(pipeline)
    }
}

impl StepConfig {
    fn to_step(&self) -> StepDescriptor {
        let mut step = StepDescriptor::new(&self.name, self.commands.iter().cloned())
            .with_install_commands(self.install_commands.iter().cloned());
        if let Some(environment) = &self.environment {
            step = step.with_environment(environment.clone());
        }
        for (key, value) in &self.env {
            step = step.with_env(key, value);
        }
        for (key, output) in &self.env_from_outputs {
            step = step.bind(key, output.clone());
        }
        step
    }

    fn from_step(step: &StepDescriptor, depends_on: Vec<String>) -> Self {
        let mut env = BTreeMap::new();
        let mut env_from_outputs = BTreeMap::new();
        for (key, value) in step.env() {
            match value {
                EnvValue::Literal(literal) => {
                    env.insert(key.clone(), literal.clone());
                }
                EnvValue::Output(output) => {
                    env_from_outputs.insert(key.clone(), output.clone());
                }
            }
        }

        Self {
            name: step.name().to_string(),
            install_commands: step.install_commands().to_vec(),
            commands: step.commands().to_vec(),
            environment: step.environment().cloned(),
            env,
            env_from_outputs,
            depends_on,
        }
    }
}

fn build_graph(steps: &[StepConfig]) -> PipelineResult<StepGraph> {
    let mut builder = StepGraphBuilder::new();
    for step in steps {
        builder.add_step(step.to_step())?;
    }
    for step in steps {
        for dep in &step.depends_on {
            builder.add_dependency(&step.name, dep)?;
        }
    }
    builder.build()
}

fn graph_to_config(graph: &StepGraph) -> Vec<StepConfig> {
    graph
        .steps()
        .map(|(_, step)| {
            let depends_on = graph
                .dependency_names(step.name())
                .into_iter()
                .map(str::to_string)
                .collect();
            StepConfig::from_step(step, depends_on)
        })
        .collect()
}

impl From<&PipelineDefinition> for PipelineConfig {
    fn from(pipeline: &PipelineDefinition) -> Self {
        let stages = pipeline
            .stages()
            .iter()
            .map(|entry| StageConfig {
                name: entry.stage.name().to_string(),
                stack: entry.stage.stack().clone(),
                production: entry.stage.is_production(),
                pre_gates: entry.pre_gates.clone(),
                gate: entry.stage.gate().cloned(),
                pre: graph_to_config(entry.stage.pre()),
                post: graph_to_config(entry.stage.post()),
            })
            .collect();

        PipelineConfig {
            name: pipeline.name().to_string(),
            source: pipeline.source().clone(),
            defaults: Some(pipeline.defaults().clone()),
            synth: StepConfig::from_step(pipeline.synth(), Vec::new()),
            stages,
            local_outputs: BTreeMap::new(),
        }
    }
}

impl PipelineDefinition {
    /// Declarative form of this pipeline
    pub fn to_config(&self) -> PipelineConfig {
        PipelineConfig::from(self)
    }
}
