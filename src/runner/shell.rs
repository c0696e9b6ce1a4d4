//! Local shell runner - executes step commands as subprocesses

use crate::core::{BuildEnvironment, StackRef, StepDescriptor};
use crate::runner::{RunnerConfig, RunnerError, StepRunner};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Runs each command of a step through `<shell> -c`
///
/// Install commands run first, then commands, stopping at the first non-zero
/// exit. Stack deploys are not performed locally; the configured outputs are
/// reported instead.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    config: RunnerConfig,
}

impl ShellRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self { config }
    }

    async fn run_command(
        &self,
        command: &str,
        env: &HashMap<String, String>,
    ) -> Result<String, RunnerError> {
        debug!("Running `{}` with {} env vars", command, env.len());

        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c").arg(command).envs(env).kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().await.map_err(|e| {
            RunnerError::Internal(format!("Failed to spawn {}: {}", self.config.shell, e))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let code = output.status.code().unwrap_or(-1);
            warn!("`{}` exited with code {}: {}", command, code, stderr);
            return Err(RunnerError::Command {
                command: command.to_string(),
                code,
                stderr,
            });
        }

        String::from_utf8(output.stdout)
            .map_err(|e| RunnerError::Internal(format!("Failed to decode output: {}", e)))
    }
}

#[async_trait]
impl StepRunner for ShellRunner {
    async fn run_step(
        &self,
        stage: &str,
        step: &StepDescriptor,
        environment: &BuildEnvironment,
        env: &HashMap<String, String>,
    ) -> Result<String, RunnerError> {
        info!("[{}] running {}", stage, step.name());
        debug!("[{}] {} requested build environment {}", stage, step.name(), environment);

        let commands: Vec<&String> = step
            .install_commands()
            .iter()
            .chain(step.commands())
            .collect();

        let run_all = async move {
            let mut output = String::new();
            for command in commands {
                output.push_str(&self.run_command(command, env).await?);
            }
            Ok::<_, RunnerError>(output)
        };

        timeout(Duration::from_secs(self.config.timeout_secs), run_all)
            .await
            .map_err(|_| RunnerError::Timeout(self.config.timeout_secs))?
    }

    async fn deploy(
        &self,
        stage: &str,
        stack: &StackRef,
        environment: &BuildEnvironment,
    ) -> Result<HashMap<String, String>, RunnerError> {
        debug!("[{}] {} asset publishing environment {}", stage, stack.id, environment);
        match self.config.stack_outputs.get(&stack.id) {
            Some(outputs) => {
                info!("[{}] using local outputs for {}", stage, stack.id);
                Ok(outputs.clone())
            }
            None => {
                warn!("[{}] no local outputs configured for {}", stage, stack.id);
                Ok(HashMap::new())
            }
        }
    }
}
