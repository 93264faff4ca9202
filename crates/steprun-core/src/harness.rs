//! The compile/run pipeline
//!
//! dispatch → inspect → acquire workspace → prepare → compile? → run → release
//!
//! Each call owns its workspace; concurrent calls share nothing but the
//! read-only toolchain table, so a `Harness` can sit behind an `Arc` and
//! serve any number of requests at once.

use crate::assist::Assistant;
use crate::protocol::{DebugRequest, DebugResponse};
use crate::recipe::recipe_for;
use crate::runner::{ProcessRunner, Stage};
use crate::toolchain::{ToolchainInvoker, Toolchains};
use crate::workspace::Workspace;
use crate::{ExecutionResult, HarnessConfig, Language, Result, StepError, tracer};

/// One program to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub language: Language,
    pub source: String,
    /// Fed to the program's standard input
    pub stdin: String,
}

impl ExecutionRequest {
    #[must_use]
    pub fn new(language: Language, source: impl Into<String>) -> Self {
        Self {
            language,
            source: source.into(),
            stdin: String::new(),
        }
    }

    #[must_use]
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = stdin.into();
        self
    }
}

/// Polyglot execution harness
#[derive(Debug, Clone)]
pub struct Harness {
    config: HarnessConfig,
    tools: Toolchains,
    compiler: ToolchainInvoker,
    runner: ProcessRunner,
}

impl Harness {
    /// Resolve the toolchain allow-list and build a harness around `config`
    #[must_use]
    pub fn new(config: HarnessConfig) -> Self {
        let tools = Toolchains::resolve(&config.toolchains);
        let compiler =
            ToolchainInvoker::new(ProcessRunner::new(config.compile_timeout, config.output_limit));
        let runner = ProcessRunner::new(config.run_timeout, config.output_limit);
        Self {
            config,
            tools,
            compiler,
            runner,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &HarnessConfig {
        &self.config
    }

    #[must_use]
    pub const fn toolchains(&self) -> &Toolchains {
        &self.tools
    }

    /// Build (if needed) and run one program
    ///
    /// A zero exit returns the captured result. A non-zero exit becomes
    /// `RuntimeFailure` carrying stderr; a rejected compile becomes
    /// `CompileFailure` and nothing is run. The workspace is gone by the
    /// time this returns, whatever the outcome, and dropping the future
    /// mid-flight kills the child and removes the workspace too.
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let recipe = recipe_for(request.language);

        // Source checks come before any filesystem work.
        let info = recipe.inspect(&request.source)?;

        let mut workspace = Workspace::acquire(
            &self.config.workspace_root,
            request.language,
            &request.source,
        )?;
        recipe.prepare(&mut workspace, &info)?;

        let artifact = match recipe.compile_command(&self.tools, &mut workspace, &info)? {
            Some(command) => {
                let outcome = self.compiler.compile(command, &workspace).await?;
                if !outcome.succeeded {
                    return Err(StepError::CompileFailure {
                        diagnostics: outcome.diagnostics,
                    });
                }
                outcome.artifact
            }
            None => None,
        };

        let argv = recipe.run_command(&self.tools, &workspace, &info, artifact.as_deref())?;
        let result = self
            .runner
            .run(&argv, &request.stdin, workspace.dir(), Stage::Run)
            .await?;

        if !result.is_success() {
            tracing::info!(
                workspace_id = %workspace.id(),
                language = %request.language,
                exit_code = result.exit_code,
                "program exited with failure"
            );
            return Err(StepError::RuntimeFailure {
                exit_code: result.exit_code,
                stderr: result.stderr,
            });
        }

        Ok(result)
    }

    /// Serve one debug request: run the code, trace it, ask for questions
    ///
    /// Never fails; every problem is described in the response.
    pub async fn debug(&self, request: &DebugRequest, assistant: &dyn Assistant) -> DebugResponse {
        if request.code.is_empty() || request.language.is_empty() {
            return DebugResponse::rejected("Code or language missing");
        }
        let language = match request.language.parse::<Language>() {
            Ok(language) => language,
            Err(e) => {
                tracing::info!(language = %request.language, "unsupported language requested");
                return DebugResponse::rejected(e.user_message());
            }
        };

        let execution = ExecutionRequest {
            language,
            source: request.code.clone(),
            stdin: request.user_input.clone(),
        };
        let questions = async {
            if assistant.is_enabled() {
                Some(assistant.generate_questions(&request.code).await)
            } else {
                None
            }
        };
        let (outcome, questions) = tokio::join!(self.execute(&execution), questions);

        let (output, error) = match outcome {
            Ok(result) => (result.stdout, String::new()),
            Err(e) => {
                tracing::info!(%language, kind = e.kind(), "execution failed");
                (String::new(), e.user_message())
            }
        };

        // Tracing is independent of how the run went.
        let (trace, trace_error) = match tracer::trace(&request.code) {
            Ok(steps) => (Some(steps), None),
            Err(e) => (None, Some(e.to_string())),
        };

        DebugResponse {
            output: Some(output),
            error,
            trace,
            trace_error,
            questions,
        }
    }
}
