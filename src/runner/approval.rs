//! Gate keepers - decide whether a gated stage may proceed

use crate::core::Gate;
use crate::runner::RunnerError;
use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin};
use tokio::sync::Mutex;
use tracing::info;

/// Outcome of waiting on a gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Approved,
    Rejected { reason: String },
}

/// Resolves gates such as manual approvals
#[async_trait]
pub trait GateKeeper: Send + Sync {
    /// Block until `gate` is decided for `stage`
    async fn await_gate(&self, stage: &str, gate: &Gate) -> Result<GateDecision, RunnerError>;
}

/// Approves every gate immediately
#[derive(Debug, Clone, Default)]
pub struct AutoApprove;

#[async_trait]
impl GateKeeper for AutoApprove {
    async fn await_gate(&self, stage: &str, gate: &Gate) -> Result<GateDecision, RunnerError> {
        info!("Auto-approving {} for {}", gate.name(), stage);
        Ok(GateDecision::Approved)
    }
}

/// Asks on the terminal
///
/// One reader is shared by every gate, so answers typed ahead of a prompt
/// are kept for the next gate.
pub struct ConsoleApproval<R = BufReader<Stdin>> {
    answers: Mutex<R>,
}

impl ConsoleApproval {
    pub fn new() -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }
}

impl Default for ConsoleApproval {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> ConsoleApproval<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    /// Read answers from `reader` instead of stdin
    pub fn from_reader(reader: R) -> Self {
        Self {
            answers: Mutex::new(reader),
        }
    }
}

fn prompt(stage: &str, gate: &Gate) -> String {
    match gate {
        Gate::ManualApproval { name, comment: Some(comment) } => {
            format!("{} for {} ({})? [y/N] ", name, stage, comment)
        }
        Gate::ManualApproval { name, comment: None } => {
            format!("{} for {}? [y/N] ", name, stage)
        }
    }
}

#[async_trait]
impl<R> GateKeeper for ConsoleApproval<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn await_gate(&self, stage: &str, gate: &Gate) -> Result<GateDecision, RunnerError> {
        // Held across the prompt so concurrent gates cannot interleave.
        let mut answers = self.answers.lock().await;

        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(prompt(stage, gate).as_bytes())
            .await
            .map_err(|e| RunnerError::Internal(format!("Failed to write prompt: {}", e)))?;
        stdout
            .flush()
            .await
            .map_err(|e| RunnerError::Internal(format!("Failed to write prompt: {}", e)))?;

        let mut line = String::new();
        answers
            .read_line(&mut line)
            .await
            .map_err(|e| RunnerError::Internal(format!("Failed to read answer: {}", e)))?;

        Ok(parse_answer(&line))
    }
}

fn parse_answer(line: &str) -> GateDecision {
    match line.trim().to_lowercase().as_str() {
        "y" | "yes" => GateDecision::Approved,
        "" => GateDecision::Rejected {
            reason: "no answer given".to_string(),
        },
        other => GateDecision::Rejected {
            reason: format!("answered '{}'", other),
        },
    }
}
