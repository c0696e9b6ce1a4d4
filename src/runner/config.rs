//! Shell runner configuration

use std::collections::HashMap;
use std::path::PathBuf;

/// Configuration for [`ShellRunner`](crate::runner::ShellRunner)
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Shell used to run each command with `-c`
    pub shell: String,

    /// Timeout for one step in seconds
    pub timeout_secs: u64,

    /// Working directory for commands (defaults to the current directory)
    pub working_dir: Option<PathBuf>,

    /// Outputs reported for each stack when it "deploys" locally
    pub stack_outputs: HashMap<String, HashMap<String, String>>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            shell: "sh".to_string(),
            timeout_secs: 3600,
            working_dir: None,
            stack_outputs: HashMap::new(),
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_stack_outputs<I, K, V>(mut self, stack: impl Into<String>, outputs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.stack_outputs.insert(
            stack.into(),
            outputs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        );
        self
    }
}
