//! Step domain model

use crate::core::{
    binding::{OutputBinding, OutputRef},
    error::{PipelineError, PipelineResult},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

/// Resource sizing hint passed through to the build service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeProfile {
    Small,
    #[default]
    Medium,
    Large,
    XLarge,
}

impl fmt::Display for ComputeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComputeProfile::Small => "SMALL",
            ComputeProfile::Medium => "MEDIUM",
            ComputeProfile::Large => "LARGE",
            ComputeProfile::XLarge => "X2_LARGE",
        };
        f.write_str(name)
    }
}

/// Build cache the step's container may reuse between runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    DockerLayer,
    Source,
    Custom,
}

/// Execution environment requested for a step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildEnvironment {
    #[serde(default)]
    pub compute: ComputeProfile,

    /// Whether the container needs docker-in-docker
    #[serde(default)]
    pub privileged: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheMode>,
}

impl BuildEnvironment {
    pub fn new(compute: ComputeProfile) -> Self {
        Self {
            compute,
            privileged: false,
            cache: None,
        }
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn with_cache(mut self, cache: CacheMode) -> Self {
        self.cache = Some(cache);
        self
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheMode::DockerLayer => "docker-layer",
            CacheMode::Source => "source",
            CacheMode::Custom => "custom",
        };
        f.write_str(name)
    }
}

impl fmt::Display for BuildEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.compute)?;
        if self.privileged {
            f.write_str(", privileged")?;
        }
        if let Some(cache) = self.cache {
            write!(f, ", {} cache", cache)?;
        }
        Ok(())
    }
}

/// Value of a single environment variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvValue {
    /// Fixed at definition time
    Literal(String),
    /// Taken from a stack output once the stack has deployed
    Output(OutputRef),
}

/// A single build/test/script action
///
/// Descriptors are immutable once built; the builder methods consume `self`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepDescriptor {
    name: String,
    install_commands: Vec<String>,
    commands: Vec<String>,
    environment: Option<BuildEnvironment>,
    env: BTreeMap<String, EnvValue>,
}

impl StepDescriptor {
    pub fn new<I, S>(name: impl Into<String>, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            install_commands: Vec::new(),
            commands: commands.into_iter().map(Into::into).collect(),
            environment: None,
            env: BTreeMap::new(),
        }
    }

    pub fn with_install_commands<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.install_commands = commands.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_environment(mut self, environment: BuildEnvironment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Set a literal environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), EnvValue::Literal(value.into()));
        self
    }

    /// Bind an environment variable to a stack output
    ///
    /// The step will not start until the producing stack has deployed and
    /// emitted `output`.
    pub fn bind(mut self, env_var: impl Into<String>, output: OutputRef) -> Self {
        self.env.insert(env_var.into(), EnvValue::Output(output));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn install_commands(&self) -> &[String] {
        &self.install_commands
    }

    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    /// Explicit build environment, if the step overrides the pipeline default
    pub fn environment(&self) -> Option<&BuildEnvironment> {
        self.environment.as_ref()
    }

    pub fn env(&self) -> &BTreeMap<String, EnvValue> {
        &self.env
    }

    /// Literal environment entries only
    pub fn literal_env(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env.iter().filter_map(|(k, v)| match v {
            EnvValue::Literal(value) => Some((k.as_str(), value.as_str())),
            EnvValue::Output(_) => None,
        })
    }

    /// Output bindings this step consumes
    pub fn bindings(&self) -> impl Iterator<Item = OutputBinding> + '_ {
        self.env.iter().filter_map(|(k, v)| match v {
            EnvValue::Output(output) => Some(OutputBinding {
                step: self.name.clone(),
                env_var: k.clone(),
                output: output.clone(),
            }),
            EnvValue::Literal(_) => None,
        })
    }

    /// Check the descriptor invariants
    pub fn validate(&self) -> PipelineResult<()> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::InvalidStep {
                step: self.name.clone(),
                reason: "name must not be empty".to_string(),
            });
        }

        if self.commands.iter().all(|c| c.trim().is_empty()) {
            return Err(PipelineError::InvalidStep {
                step: self.name.clone(),
                reason: "at least one command is required".to_string(),
            });
        }

        for key in self.env.keys() {
            if !is_valid_env_var(key) {
                return Err(PipelineError::InvalidStep {
                    step: self.name.clone(),
                    reason: format!("'{}' is not a valid environment variable name", key),
                });
            }
        }

        Ok(())
    }
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static pattern"))
}

/// Whether `name` can be exported to a shell process
pub fn is_valid_env_var(name: &str) -> bool {
    env_var_pattern().is_match(name)
}
