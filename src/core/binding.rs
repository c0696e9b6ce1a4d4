//! Stack output bindings
//!
//! A deployed stack emits named outputs (bucket names, endpoint ids). Steps
//! consume them as environment variables. Outputs are written once per stack
//! and read by any number of steps afterwards.

use crate::core::{
    error::{PipelineError, PipelineResult},
    step::{EnvValue, StepDescriptor},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Reference to a named output of a stack
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputRef {
    pub stack: String,
    pub output: String,
}

impl OutputRef {
    pub fn new(stack: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            stack: stack.into(),
            output: output.into(),
        }
    }
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stack, self.output)
    }
}

/// A step consuming a stack output through an environment variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputBinding {
    pub step: String,
    pub env_var: String,
    pub output: OutputRef,
}

impl OutputBinding {
    pub(crate) fn unresolved(&self, reason: impl Into<String>) -> PipelineError {
        PipelineError::UnresolvedBinding {
            step: self.step.clone(),
            env_var: self.env_var.clone(),
            stack: self.output.stack.clone(),
            output: self.output.output.clone(),
            reason: reason.into(),
        }
    }
}

/// Outputs emitted by deployed stacks during one run
#[derive(Debug, Clone, Default)]
pub struct OutputStore {
    stacks: HashMap<String, HashMap<String, String>>,
}

impl OutputStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outputs of a successful deploy
    pub fn record(&mut self, stack: &str, outputs: HashMap<String, String>) -> PipelineResult<()> {
        if self.stacks.contains_key(stack) {
            return Err(PipelineError::OutputsAlreadyRecorded {
                stack: stack.to_string(),
            });
        }
        self.stacks.insert(stack.to_string(), outputs);
        Ok(())
    }

    /// Whether the stack has deployed in this run
    pub fn is_deployed(&self, stack: &str) -> bool {
        self.stacks.contains_key(stack)
    }

    pub fn get(&self, output: &OutputRef) -> Option<&str> {
        self.stacks
            .get(&output.stack)
            .and_then(|outputs| outputs.get(&output.output))
            .map(String::as_str)
    }
}

/// Build the process environment for a step
///
/// Literal entries are copied as-is; bound entries are looked up in `store`.
/// Fails on the first binding whose stack has not deployed or did not emit the
/// output, so the step never starts with a partial environment.
pub fn resolve_environment(
    step: &StepDescriptor,
    store: &OutputStore,
) -> PipelineResult<HashMap<String, String>> {
    let mut env = HashMap::with_capacity(step.env().len());

    for (key, value) in step.env() {
        let resolved = match value {
            EnvValue::Literal(literal) => literal.clone(),
            EnvValue::Output(output) => {
                let binding = OutputBinding {
                    step: step.name().to_string(),
                    env_var: key.clone(),
                    output: output.clone(),
                };
                if !store.is_deployed(&output.stack) {
                    return Err(binding.unresolved("stack has not been deployed"));
                }
                match store.get(output) {
                    Some(value) => value.to_string(),
                    None => return Err(binding.unresolved("stack did not emit this output")),
                }
            }
        };
        env.insert(key.clone(), resolved);
    }

    Ok(env)
}
