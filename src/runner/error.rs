//! Runner error types

use thiserror::Error;

/// Error types for build and deploy collaborators
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("command `{command}` exited with code {code}: {stderr}")]
    Command {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}
