//! Process runner
//!
//! Spawns one process from an argument vector (no shell), feeds it stdin,
//! drains stdout/stderr concurrently and waits under a wall-clock budget.

use crate::{ExecutionResult, Result, StepError};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

/// Pipeline stage a process belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Compile,
    Run,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile => f.write_str("compile"),
            Self::Run => f.write_str("run"),
        }
    }
}

/// Runs processes with a fixed time budget and capture limit
#[derive(Debug, Clone, Copy)]
pub struct ProcessRunner {
    timeout: Duration,
    output_limit: usize,
}

impl ProcessRunner {
    #[must_use]
    pub const fn new(timeout: Duration, output_limit: usize) -> Self {
        Self {
            timeout,
            output_limit,
        }
    }

    /// Run `argv` in `cwd` to completion
    ///
    /// A non-zero exit is not an error here: the result carries the real exit
    /// code together with everything the process printed.
    pub async fn run(
        &self,
        argv: &[OsString],
        stdin: &str,
        cwd: &Path,
        stage: Stage,
    ) -> Result<ExecutionResult> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| StepError::Config("empty argument vector".into()))?;

        tracing::debug!(%stage, ?argv, "spawning process");

        let start = Instant::now();
        let mut child = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    StepError::ToolchainMissing {
                        binary: program.to_string_lossy().into_owned(),
                    }
                } else {
                    StepError::Io(e)
                }
            })?;

        // Killed on every way out of this function, including cancellation.
        let group = ProcessGroup::new(child.id());

        let stdin_task = child.stdin.take().map(|mut pipe| {
            let data = stdin.as_bytes().to_vec();
            tokio::spawn(async move {
                // The program may exit without reading its input; EPIPE is expected then.
                if let Err(e) = pipe.write_all(&data).await {
                    tracing::debug!(error = %e, "stdin not fully consumed");
                }
            })
        });
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        // One budget covers the wait and draining both pipes.
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut stdout = Capture::default();
        let mut stderr = Capture::default();
        let mut exited = None;
        let finished = tokio::time::timeout_at(deadline, async {
            let waiting = async {
                let status = child.wait().await;
                // Leftover descendants would otherwise keep the pipes open.
                group.kill();
                exited = Some(status);
            };
            tokio::join!(
                waiting,
                drain(stdout_pipe, self.output_limit, &mut stdout),
                drain(stderr_pipe, self.output_limit, &mut stderr),
            );
        })
        .await;
        let duration = start.elapsed();
        if let Some(task) = stdin_task {
            task.abort();
        }

        let status = match (finished, exited) {
            (Ok(()), Some(status)) => status?,
            (Err(_), Some(status)) => {
                // The program is done but something that left its process
                // group still holds the pipes; keep what was read so far.
                tracing::warn!(
                    %stage,
                    limit_ms = self.timeout.as_millis() as u64,
                    "output still open after the program exited; capture cut short"
                );
                stdout.truncated = true;
                stderr.truncated = true;
                status?
            }
            (_, None) => {
                group.kill();
                if let Err(e) = child.kill().await {
                    tracing::debug!(error = %e, "child already gone");
                }

                tracing::warn!(
                    %stage,
                    limit_ms = self.timeout.as_millis() as u64,
                    "process exceeded its time budget and was killed"
                );
                return Err(StepError::ExecutionTimeout {
                    stage,
                    limit: self.timeout,
                });
            }
        };

        let exit_code = status
            .code()
            .or_else(|| status.signal().map(|signal| 128 + signal))
            .unwrap_or(-1);

        tracing::info!(
            %stage,
            exit_code,
            elapsed_ms = duration.as_millis() as u64,
            "process finished"
        );

        Ok(ExecutionResult {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout.bytes).into_owned(),
            stderr: String::from_utf8_lossy(&stderr.bytes).into_owned(),
            duration,
            truncated: stdout.truncated || stderr.truncated,
        })
    }
}

/// SIGKILLs the child's process group when dropped
struct ProcessGroup {
    pgid: Option<Pid>,
}

impl ProcessGroup {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.and_then(|pid| i32::try_from(pid).ok()).map(Pid::from_raw),
        }
    }

    fn kill(&self) {
        let Some(pgid) = self.pgid else { return };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pgid = pgid.as_raw(), error = %e, "failed to kill process group"),
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Bytes kept from one output stream
#[derive(Debug, Default)]
struct Capture {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Drain `reader` into `capture`, keeping at most `limit` bytes
///
/// Whatever was read stays in `capture` if this future is dropped early.
async fn drain<R: AsyncRead + Unpin>(reader: Option<R>, limit: usize, capture: &mut Capture) {
    let Some(mut reader) = reader else { return };
    let mut chunk = [0u8; 8192];

    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read process output");
                break;
            }
        };
        let room = limit.saturating_sub(capture.bytes.len());
        if n > room {
            capture.truncated = true;
        }
        capture.bytes.extend_from_slice(&chunk[..n.min(room)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<OsString> {
        parts.iter().map(OsString::from).collect()
    }

    fn runner() -> ProcessRunner {
        ProcessRunner::new(Duration::from_secs(5), 1024)
    }

    #[tokio::test]
    async fn feeds_stdin_and_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let result = runner()
            .run(&argv(&["cat"]), "hello\n", dir.path(), Stage::Run)
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.stderr, "");
        assert!(!result.truncated);
    }

    #[tokio::test]
    async fn non_zero_exit_keeps_both_streams() {
        let dir = tempfile::tempdir().unwrap();
        let result = runner()
            .run(
                &argv(&["sh", "-c", "echo out; echo err >&2; exit 3"]),
                "",
                dir.path(),
                Stage::Run,
            )
            .await
            .unwrap();

        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn output_beyond_limit_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let result = ProcessRunner::new(Duration::from_secs(5), 4)
            .run(&argv(&["sh", "-c", "echo 0123456789"]), "", dir.path(), Stage::Run)
            .await
            .unwrap();

        assert_eq!(result.stdout, "0123");
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn runaway_process_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let start = Instant::now();
        let err = ProcessRunner::new(Duration::from_millis(200), 1024)
            .run(&argv(&["sleep", "30"]), "", dir.path(), Stage::Run)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StepError::ExecutionTimeout {
                stage: Stage::Run,
                ..
            }
        ));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn background_children_do_not_hold_the_pipes() {
        let dir = tempfile::tempdir().unwrap();
        let start = Instant::now();
        let result = runner()
            .run(
                &argv(&["sh", "-c", "sleep 30 & echo done"]),
                "",
                dir.path(),
                Stage::Run,
            )
            .await
            .unwrap();

        assert_eq!(result.stdout, "done\n");
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn detached_descendants_cannot_outlast_the_budget() {
        let dir = tempfile::tempdir().unwrap();
        let start = Instant::now();
        let result = ProcessRunner::new(Duration::from_millis(500), 1024)
            .run(
                &argv(&["sh", "-c", "setsid sleep 30 & echo done"]),
                "",
                dir.path(),
                Stage::Run,
            )
            .await
            .unwrap();

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "done\n");
        assert!(result.truncated);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_binary_is_reported_as_toolchain_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = runner()
            .run(&argv(&["steprun-no-such-binary"]), "", dir.path(), Stage::Compile)
            .await
            .unwrap_err();

        assert!(matches!(err, StepError::ToolchainMissing { binary } if binary == "steprun-no-such-binary"));
    }

    #[tokio::test]
    async fn empty_argv_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(runner().run(&[], "", dir.path(), Stage::Run).await.is_err());
    }
}
