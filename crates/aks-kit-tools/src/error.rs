//! Error types for external tool invocations.

use thiserror::Error;

/// A result type using `ToolError`.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Errors that can occur while running docker, kubectl or helm.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The program could not be found on `PATH`.
    #[error("{program} is not installed or not on PATH")]
    NotInstalled {
        /// The program that was looked up.
        program: String,
    },

    /// The program ran and exited unsuccessfully.
    #[error("{program} failed (exit code {code:?}): {stderr}")]
    Failed {
        /// The program that failed.
        program: String,
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Captured standard error, trimmed.
        stderr: String,
    },

    /// The program's output could not be interpreted.
    #[error("unexpected output from {program}: {reason}")]
    InvalidOutput {
        /// The program whose output was rejected.
        program: String,
        /// Why the output was rejected.
        reason: String,
    },

    /// Input for the program could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error while spawning or talking to the process.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolError {
    /// Returns the exit code of a failed invocation.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Failed { code, .. } => *code,
            _ => None,
        }
    }

    /// Returns `true` if the binary itself is missing.
    #[must_use]
    pub const fn is_not_installed(&self) -> bool {
        matches!(self, Self::NotInstalled { .. })
    }
}
