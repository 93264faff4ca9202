//! Toolchain resolution and the compile step
//!
//! The binaries named in [`ToolchainConfig`] are the only programs the
//! harness ever spawns. They are resolved to absolute paths once, when the
//! harness starts, and compile commands are always argument vectors.

use crate::config::ToolchainConfig;
use crate::runner::{ProcessRunner, Stage};
use crate::workspace::Workspace;
use crate::{CompilationOutcome, Result, StepError};
use std::ffi::OsString;
use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Role a binary plays in a recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Python,
    Cc,
    Cxx,
    Javac,
    Java,
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Python => "python",
            Self::Cc => "cc",
            Self::Cxx => "cxx",
            Self::Javac => "javac",
            Self::Java => "java",
        })
    }
}

/// A configured binary name and where it was found, if anywhere
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTool {
    pub name: String,
    pub path: Option<PathBuf>,
}

impl ResolvedTool {
    /// Absolute path of the binary, or `ToolchainMissing`
    pub fn program(&self) -> Result<&Path> {
        self.path
            .as_deref()
            .ok_or_else(|| StepError::ToolchainMissing {
                binary: self.name.clone(),
            })
    }
}

/// The allow-list, resolved against `PATH`
#[derive(Debug, Clone)]
pub struct Toolchains {
    python: ResolvedTool,
    cc: ResolvedTool,
    cxx: ResolvedTool,
    javac: ResolvedTool,
    java: ResolvedTool,
}

impl Toolchains {
    /// Resolve every configured binary. Missing ones are logged, not fatal.
    #[must_use]
    pub fn resolve(config: &ToolchainConfig) -> Self {
        let search_path = std::env::var_os("PATH").unwrap_or_default();
        let resolve = |tool: Tool, name: &str| {
            let path = find_executable(name, &search_path);
            match &path {
                Some(path) => {
                    tracing::info!(%tool, binary = name, path = %path.display(), "toolchain resolved");
                }
                None => tracing::warn!(%tool, binary = name, "toolchain not found"),
            }
            ResolvedTool {
                name: name.to_string(),
                path,
            }
        };

        Self {
            python: resolve(Tool::Python, &config.python),
            cc: resolve(Tool::Cc, &config.cc),
            cxx: resolve(Tool::Cxx, &config.cxx),
            javac: resolve(Tool::Javac, &config.javac),
            java: resolve(Tool::Java, &config.java),
        }
    }

    #[must_use]
    pub const fn get(&self, tool: Tool) -> &ResolvedTool {
        match tool {
            Tool::Python => &self.python,
            Tool::Cc => &self.cc,
            Tool::Cxx => &self.cxx,
            Tool::Javac => &self.javac,
            Tool::Java => &self.java,
        }
    }

    pub fn program(&self, tool: Tool) -> Result<&Path> {
        self.get(tool).program()
    }
}

/// Look `name` up the way a shell would, without running one
fn find_executable(name: &str, search_path: &std::ffi::OsStr) -> Option<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return is_executable(&path).then_some(path);
    }
    std::env::split_paths(search_path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

/// A compile command and the artifact it is expected to produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileCommand {
    pub argv: Vec<OsString>,
    pub artifact: PathBuf,
}

/// Runs compile commands inside a workspace
#[derive(Debug, Clone, Copy)]
pub struct ToolchainInvoker {
    runner: ProcessRunner,
}

impl ToolchainInvoker {
    #[must_use]
    pub const fn new(runner: ProcessRunner) -> Self {
        Self { runner }
    }

    /// Compile once. There are no retries; a failed outcome ends the request.
    pub async fn compile(
        &self,
        command: CompileCommand,
        workspace: &Workspace,
    ) -> Result<CompilationOutcome> {
        tracing::info!(workspace_id = %workspace.id(), "compiling");

        let result = match self
            .runner
            .run(&command.argv, "", workspace.dir(), Stage::Compile)
            .await
        {
            Ok(result) => result,
            Err(StepError::ToolchainMissing { binary }) => {
                return Ok(CompilationOutcome::failure(missing_toolchain_message(&binary)));
            }
            Err(e) => return Err(e),
        };

        if !result.is_success() {
            tracing::info!(
                workspace_id = %workspace.id(),
                exit_code = result.exit_code,
                "compilation failed"
            );
            let diagnostics = if !result.stderr.is_empty() {
                result.stderr
            } else if !result.stdout.is_empty() {
                result.stdout
            } else {
                missing_toolchain_message(&command.argv[0].to_string_lossy())
            };
            return Ok(CompilationOutcome::failure(diagnostics));
        }

        if !command.artifact.exists() {
            return Ok(CompilationOutcome::failure(format!(
                "compiler exited successfully but produced no {}",
                command.artifact.display()
            )));
        }

        tracing::info!(workspace_id = %workspace.id(), "compilation succeeded");
        Ok(CompilationOutcome::success(command.artifact, result.stderr))
    }
}

fn missing_toolchain_message(binary: &str) -> String {
    format!("Compilation failed. Make sure {binary} is installed and in your PATH.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Language;
    use std::time::Duration;

    #[test]
    fn resolves_from_search_path() {
        let dir = tempfile::tempdir().unwrap();
        let tool = dir.path().join("fakecc");
        std::fs::write(&tool, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        std::fs::write(dir.path().join("notexec"), "").unwrap();

        let search = std::env::join_paths([Path::new("/nonexistent"), dir.path()]).unwrap();
        assert_eq!(find_executable("fakecc", &search), Some(tool.clone()));
        assert_eq!(find_executable("notexec", &search), None);
        assert_eq!(
            find_executable(tool.to_str().unwrap(), std::ffi::OsStr::new("")),
            Some(tool)
        );
    }

    #[test]
    fn unresolved_tool_reports_missing() {
        let tools = Toolchains::resolve(&ToolchainConfig {
            javac: "steprun-no-such-javac".into(),
            ..ToolchainConfig::default()
        });
        let err = tools.program(Tool::Javac).unwrap_err();
        assert!(matches!(err, StepError::ToolchainMissing { binary } if binary == "steprun-no-such-javac"));
    }

    fn invoker() -> ToolchainInvoker {
        ToolchainInvoker::new(ProcessRunner::new(Duration::from_secs(5), 4096))
    }

    #[tokio::test]
    async fn failing_compiler_surfaces_stderr() {
        let root = tempfile::tempdir().unwrap();
        let mut workspace = Workspace::acquire(root.path(), Language::C, "int main(").unwrap();
        let artifact = workspace.artifact_path();
        let command = CompileCommand {
            argv: ["sh", "-c", "echo 'error: expected declaration' >&2; exit 1"]
                .into_iter()
                .map(OsString::from)
                .collect(),
            artifact,
        };

        let outcome = invoker().compile(command, &workspace).await.unwrap();
        assert!(!outcome.succeeded);
        assert_eq!(outcome.diagnostics, "error: expected declaration\n");
        assert!(outcome.artifact.is_none());
    }

    #[tokio::test]
    async fn success_requires_the_artifact() {
        let root = tempfile::tempdir().unwrap();
        let mut workspace = Workspace::acquire(root.path(), Language::C, "").unwrap();
        let artifact = workspace.artifact_path();

        let lazy = CompileCommand {
            argv: vec![OsString::from("true")],
            artifact: artifact.clone(),
        };
        assert!(!invoker().compile(lazy, &workspace).await.unwrap().succeeded);

        let honest = CompileCommand {
            argv: vec![OsString::from("touch"), artifact.clone().into_os_string()],
            artifact: artifact.clone(),
        };
        let outcome = invoker().compile(honest, &workspace).await.unwrap();
        assert!(outcome.succeeded);
        assert_eq!(outcome.artifact, Some(artifact));
    }

    #[tokio::test]
    async fn missing_compiler_is_a_failed_outcome() {
        let root = tempfile::tempdir().unwrap();
        let mut workspace = Workspace::acquire(root.path(), Language::Cpp, "").unwrap();
        let command = CompileCommand {
            argv: vec![OsString::from("steprun-no-such-g++")],
            artifact: workspace.artifact_path(),
        };

        let outcome = invoker().compile(command, &workspace).await.unwrap();
        assert!(!outcome.succeeded);
        assert!(outcome.diagnostics.contains("steprun-no-such-g++"));
    }
}
