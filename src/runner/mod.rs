//! External collaborators that run steps, deploy stacks and decide gates
//!
//! The engine only decides *when* something may happen; the work itself goes
//! through the traits here.

pub mod approval;
pub mod config;
pub mod error;
pub mod shell;

use crate::core::{BuildEnvironment, StackRef, StepDescriptor};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::info;

pub use approval::{AutoApprove, ConsoleApproval, GateDecision, GateKeeper};
pub use config::RunnerConfig;
pub use error::RunnerError;
pub use shell::ShellRunner;

/// Trait for step and deploy execution - allows for different implementations
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Run a step's commands on `environment` with the given process
    /// environment variables
    async fn run_step(
        &self,
        stage: &str,
        step: &StepDescriptor,
        environment: &BuildEnvironment,
        env: &HashMap<String, String>,
    ) -> Result<String, RunnerError>;

    /// Deploy a stack, publishing its assets on `environment`, and return the
    /// outputs it emitted
    async fn deploy(
        &self,
        stage: &str,
        stack: &StackRef,
        environment: &BuildEnvironment,
    ) -> Result<HashMap<String, String>, RunnerError>;
}

/// Runner that only logs what would happen
///
/// Every declared stack output is reported as `<stack>/<output>`.
#[derive(Debug, Clone, Default)]
pub struct DryRunRunner;

#[async_trait]
impl StepRunner for DryRunRunner {
    async fn run_step(
        &self,
        stage: &str,
        step: &StepDescriptor,
        environment: &BuildEnvironment,
        env: &HashMap<String, String>,
    ) -> Result<String, RunnerError> {
        let mut keys: Vec<&String> = env.keys().collect();
        keys.sort();
        info!(
            "[dry-run] [{}] {} on {} ({} commands, env: {:?})",
            stage,
            step.name(),
            environment,
            step.install_commands().len() + step.commands().len(),
            keys
        );
        Ok(step
            .commands()
            .iter()
            .map(|c| format!("$ {}\n", c))
            .collect())
    }

    async fn deploy(
        &self,
        stage: &str,
        stack: &StackRef,
        environment: &BuildEnvironment,
    ) -> Result<HashMap<String, String>, RunnerError> {
        info!("[dry-run] [{}] deploy {} (assets on {})", stage, stack.id, environment);
        Ok(stack
            .outputs
            .iter()
            .map(|o| (o.clone(), format!("{}/{}", stack.id, o)))
            .collect())
    }
}
