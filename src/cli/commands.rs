//! CLI command definitions

use crate::endpoint::{DEFAULT_BRANCH, DEFAULT_REPO};
use crate::execution::SchedulingStrategy;
use clap::Args;

/// Run a pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Only log what each step and deploy would do
    #[arg(long)]
    pub dry_run: bool,

    /// Approve every manual approval gate without asking
    #[arg(short, long)]
    pub yes: bool,

    /// Scheduling strategy for steps within a phase
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Sequential)]
    pub strategy: SchedulingStrategyArg,

    /// Maximum concurrent steps for `parallel-limited`
    #[arg(long, default_value_t = 4)]
    pub max_parallel: usize,

    /// Override the source branch
    #[arg(long)]
    pub branch: Option<String>,

    /// Directory step commands run in (defaults to the current directory)
    #[arg(long)]
    pub working_dir: Option<String>,
}

/// Validate a pipeline configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show stage and step order without running anything
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: String,
}

/// Print the built-in endpoint pipeline as YAML
#[derive(Debug, Args, Clone)]
pub struct ExportCommand {
    /// Source repository (`owner/repo`)
    #[arg(long, default_value = DEFAULT_REPO)]
    pub repo: String,

    /// Source branch
    #[arg(long, default_value = DEFAULT_BRANCH)]
    pub branch: String,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

impl SchedulingStrategyArg {
    pub fn into_strategy(self, max_parallel: usize) -> SchedulingStrategy {
        match self {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => SchedulingStrategy::LimitedParallel(max_parallel),
        }
    }
}

impl From<SchedulingStrategyArg> for SchedulingStrategy {
    fn from(arg: SchedulingStrategyArg) -> Self {
        arg.into_strategy(4)
    }
}
