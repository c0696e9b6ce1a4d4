//! CLI output formatting

use crate::{
    core::{ExecutionStatus, PipelineRun, StagePhase, StepState},
    execution::ExecutionEvent,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static LOCK: Emoji<'_, '_> = Emoji("🔒 ", "# ");

/// Create a progress bar
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    if let Ok(template) = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
    {
        progress.set_style(template.progress_chars("#>-"));
    }
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a step state for display
pub fn format_step_state(state: &StepState) -> String {
    match state {
        StepState::Pending => style("PENDING").dim().to_string(),
        StepState::Running { .. } => style("RUNNING").yellow().to_string(),
        StepState::Completed { .. } => style("COMPLETED").green().to_string(),
        StepState::Failed { .. } => style("FAILED").red().to_string(),
        StepState::Skipped { .. } => style("SKIPPED").dim().to_string(),
    }
}

/// Format a stage phase for display
pub fn format_stage_phase(phase: StagePhase) -> String {
    match phase {
        StagePhase::Pending => style("PENDING").dim().to_string(),
        StagePhase::PreRunning => style("PRE").yellow().to_string(),
        StagePhase::Deploying => style("DEPLOYING").yellow().to_string(),
        StagePhase::PostRunning => style("POST").yellow().to_string(),
        StagePhase::Succeeded => style("SUCCEEDED").green().to_string(),
        StagePhase::Failed => style("FAILED").red().to_string(),
    }
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Completed => style("COMPLETED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
    }
}

/// Per-stage summary lines for a finished run
pub fn format_run_summary(run: &PipelineRun) -> String {
    let mut lines = vec![format!(
        "{} {} - {} ({})",
        INFO,
        style(&run.pipeline_name).bold(),
        format_status(run.status),
        style(format!("{:.0}%", run.progress() * 100.0)).cyan()
    )];

    for stage in &run.stages {
        lines.push(format!(
            "  {} [{}] {}",
            style(&stage.name).bold(),
            style(&stage.stack).dim(),
            format_stage_phase(stage.phase)
        ));
        for step in &stage.steps {
            lines.push(format!(
                "    {:<4} {} {}",
                style(step.phase).dim(),
                step.name,
                format_step_state(&step.state)
            ));
        }
    }

    lines.join("\n")
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::PipelineStarted {
            execution_id,
            pipeline_name,
        } => format!(
            "{} Starting pipeline {} ({})",
            ROCKET,
            style(pipeline_name).bold(),
            style(&execution_id.to_string()[..8]).dim()
        ),
        ExecutionEvent::GateWaiting { stage, gate } => {
            format!("{} {} waiting on {}", LOCK, style(stage).bold(), style(gate).yellow())
        }
        ExecutionEvent::GateApproved { stage, gate } => {
            format!("{} {} approved for {}", CHECK, style(gate).green(), style(stage).bold())
        }
        ExecutionEvent::GateRejected { stage, gate, reason } => format!(
            "{} {} rejected {}: {}",
            CROSS,
            style(gate).red(),
            style(stage).bold(),
            style(reason).dim()
        ),
        ExecutionEvent::StageStarted { stage } => {
            format!("{} Stage {}", ROCKET, style(stage).bold())
        }
        ExecutionEvent::StepStarted { stage, step } => {
            format!("{} {}/{}", SPINNER, style(stage).dim(), style(step).cyan())
        }
        ExecutionEvent::StepCompleted { stage, step } => {
            format!("{} {}/{}", CHECK, style(stage).dim(), style(step).green())
        }
        ExecutionEvent::StepFailed { stage, step, error } => format!(
            "{} {}/{}: {}",
            CROSS,
            style(stage).dim(),
            style(step).red(),
            style(error).dim()
        ),
        ExecutionEvent::StepSkipped { stage, step, reason } => format!(
            "{} {}/{} skipped ({})",
            WARN,
            style(stage).dim(),
            style(step).yellow(),
            reason
        ),
        ExecutionEvent::DeployStarted { stage, stack } => {
            format!("{} {} deploying {}", SPINNER, style(stage).bold(), style(stack).cyan())
        }
        ExecutionEvent::DeployCompleted { stack, outputs, .. } => format!(
            "{} {} deployed ({})",
            CHECK,
            style(stack).green(),
            style(outputs.join(", ")).dim()
        ),
        ExecutionEvent::StageCompleted { stage, phase } => {
            format!("{} Stage {} {}", INFO, style(stage).bold(), format_stage_phase(*phase))
        }
        ExecutionEvent::PipelineCompleted {
            execution_id,
            status,
        } => {
            let status_str = match status {
                ExecutionStatus::Completed => format!("{} completed", style("successfully").green()),
                ExecutionStatus::Failed => style("failed").red().to_string(),
                _ => format!("{:?}", status),
            };
            format!(
                "{} Pipeline ({}) {}",
                INFO,
                style(&execution_id.to_string()[..8]).dim(),
                status_str
            )
        }
    }
}

/// Format step output with truncation
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let truncated = lines[..max_lines].join("\n");
        format!(
            "{}\n{}... ({} more lines)",
            truncated,
            style("[truncated]").dim(),
            lines.len() - max_lines
        )
    }
}
