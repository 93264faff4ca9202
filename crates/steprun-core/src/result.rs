//! Compile and execution result types

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Result of running one process to completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Exit code of the process (-1 when killed by a signal)
    pub exit_code: i32,

    /// Standard output, lossily decoded
    pub stdout: String,

    /// Standard error, lossily decoded
    pub stderr: String,

    /// Wall-clock time from spawn to exit
    pub duration: Duration,

    /// Whether either stream hit the capture limit
    pub truncated: bool,
}

impl ExecutionResult {
    /// Check if the process exited with status zero
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Outcome of a compile step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationOutcome {
    pub succeeded: bool,

    /// Compiler standard error, or a toolchain-missing message
    pub diagnostics: String,

    /// Produced artifact; always inside the request's workspace
    pub artifact: Option<PathBuf>,
}

impl CompilationOutcome {
    #[must_use]
    pub fn success(artifact: PathBuf, diagnostics: String) -> Self {
        Self {
            succeeded: true,
            diagnostics,
            artifact: Some(artifact),
        }
    }

    #[must_use]
    pub const fn failure(diagnostics: String) -> Self {
        Self {
            succeeded: false,
            diagnostics,
            artifact: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_status_zero_is_success() {
        let finished = |exit_code| ExecutionResult {
            exit_code,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::from_millis(5),
            truncated: false,
        };
        assert!(finished(0).is_success());
        assert!(!finished(1).is_success());
        assert!(!finished(-1).is_success());
    }
}
