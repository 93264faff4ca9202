//! Error types for steprun-core

use crate::runner::Stage;
use crate::tracer::ParseError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StepError {
    /// The tag is kept for logging; callers only ever see the fixed message.
    #[error("Unsupported language")]
    UnsupportedLanguage(String),

    #[error("No public class found in Java code.")]
    NoPublicClass,

    #[error("{diagnostics}")]
    CompileFailure { diagnostics: String },

    #[error("toolchain missing: {binary} is not installed or not in PATH")]
    ToolchainMissing { binary: String },

    #[error("{}", runtime_message(*exit_code, stderr))]
    RuntimeFailure { exit_code: i32, stderr: String },

    #[error("{stage} timed out after {} seconds", limit.as_secs_f64())]
    ExecutionTimeout { stage: Stage, limit: Duration },

    #[error("{0}")]
    Parse(#[from] ParseError),

    #[error("workspace error: {0}")]
    Workspace(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StepError {
    /// Text shown to the submitter.
    ///
    /// Compile and run failures surface the toolchain's own output untouched;
    /// everything else uses the `Display` form.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::CompileFailure { diagnostics } => diagnostics.clone(),
            Self::RuntimeFailure { exit_code, stderr } => runtime_message(*exit_code, stderr),
            other => other.to_string(),
        }
    }

    /// Short stable name of the error class, used in logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::UnsupportedLanguage(_) => "unsupported_language",
            Self::NoPublicClass => "no_public_class",
            Self::CompileFailure { .. } => "compile_failure",
            Self::ToolchainMissing { .. } => "toolchain_missing",
            Self::RuntimeFailure { .. } => "runtime_failure",
            Self::ExecutionTimeout { .. } => "execution_timeout",
            Self::Parse(_) => "parse_error",
            Self::Workspace(_) => "workspace_error",
            Self::Io(_) => "io_error",
            Self::Protocol(_) => "protocol_error",
            Self::Config(_) => "config_error",
        }
    }
}

fn runtime_message(exit_code: i32, stderr: &str) -> String {
    if stderr.is_empty() {
        format!("process exited with status {exit_code}")
    } else {
        stderr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_diagnostics_are_passed_through_verbatim() {
        let err = StepError::CompileFailure {
            diagnostics: "main.c:1:1: error: expected ';'\n".into(),
        };
        assert_eq!(err.user_message(), "main.c:1:1: error: expected ';'\n");
    }

    #[test]
    fn runtime_failure_without_stderr_reports_status() {
        let err = StepError::RuntimeFailure {
            exit_code: 3,
            stderr: String::new(),
        };
        assert_eq!(err.user_message(), "process exited with status 3");
    }

    #[test]
    fn unsupported_language_hides_the_tag() {
        let err = StepError::UnsupportedLanguage("cobol".into());
        assert_eq!(err.user_message(), "Unsupported language");
        assert_eq!(err.kind(), "unsupported_language");
    }
}
