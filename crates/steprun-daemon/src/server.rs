//! Unix socket server

use crate::pool::ExecutionPool;
use std::future::Future;
use std::sync::Arc;
use steprun_core::assist::Assistant;
use steprun_core::protocol::{self, AutocorrectResponse, Request, Response};
use steprun_core::{Result, StepError};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::{UnixListener, UnixStream};

/// Everything a connection needs to serve requests
pub struct State {
    pub pool: ExecutionPool,
    pub assistant: Box<dyn Assistant>,
}

/// Run the daemon server until `shutdown` resolves
pub async fn run(
    listener: UnixListener,
    state: State,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let state = Arc::new(state);
    tokio::pin!(shutdown);

    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => accepted?.0,
            () = &mut shutdown => {
                tracing::info!("shutting down");
                return Ok(());
            }
        };
        let state = Arc::clone(&state);

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                tracing::error!(error = %e, "connection error");
            }
        });
    }
}

/// Handle a single client connection
///
/// Requests are answered in order. When the client hangs up while a request
/// is running, the request is dropped, which stops its program and removes
/// its workspace.
async fn handle_connection(stream: UnixStream, state: Arc<State>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let request: Request = match protocol::read_frame(&mut reader).await {
            Ok(Some(request)) => request,
            Ok(None) => break, // Client disconnected
            Err(StepError::Protocol(message)) => {
                // The stream may be out of step now, so answer and hang up.
                tracing::warn!(%message, "malformed request");
                protocol::write_frame(&mut writer, &Response::Error { message }).await?;
                break;
            }
            Err(e) => return Err(e),
        };
        tracing::debug!(?request, "received request");

        let response = tokio::select! {
            response = handle_request(request, &state) => response,
            () = closed(&mut reader) => {
                tracing::info!("client went away, cancelling request");
                break;
            }
        };

        protocol::write_frame(&mut writer, &response).await?;
    }

    Ok(())
}

/// Resolves once the peer has closed its end.
///
/// Bytes that arrive meanwhile stay buffered for the next frame.
async fn closed<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) {
    match reader.fill_buf().await {
        Ok([]) | Err(_) => {}
        // A pipelined request; the peer is still there.
        Ok(_) => std::future::pending().await,
    }
}

/// Handle a single request
async fn handle_request(request: Request, state: &State) -> Response {
    match request {
        Request::Debug(req) => {
            Response::Debug(state.pool.debug(&req, state.assistant.as_ref()).await)
        }
        Request::Autocorrect(req) => {
            if req.code.is_empty() {
                return Response::Autocorrect(AutocorrectResponse::failed("Code missing"));
            }
            Response::Autocorrect(state.assistant.autocorrect(&req.code).await)
        }
        Request::Status => {
            let status = state.pool.status();
            Response::Status {
                in_flight: status.in_flight,
                completed: status.completed,
                failed: status.failed,
                max_concurrent: status.max_concurrent,
            }
        }
        Request::Ping => Response::Pong,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::time::Duration;
    use steprun_core::assist::NoAssistant;
    use steprun_core::config::ToolchainConfig;
    use steprun_core::protocol::{AutocorrectRequest, DebugRequest};
    use steprun_core::{Harness, HarnessConfig};
    use tokio::io::AsyncWriteExt;
    use tokio::sync::oneshot;

    struct Daemon {
        socket: PathBuf,
        stop: Option<oneshot::Sender<()>>,
        task: tokio::task::JoinHandle<Result<()>>,
    }

    impl Daemon {
        fn start(dir: &Path, workspaces: &Path) -> Self {
            let socket = dir.join("steprun.sock");
            let listener = UnixListener::bind(&socket).unwrap();
            let harness = Harness::new(
                HarnessConfig::builder()
                    .workspace_root(workspaces)
                    .run_timeout(Duration::from_secs(10))
                    .toolchains(ToolchainConfig {
                        python: "sh".into(),
                        ..ToolchainConfig::default()
                    })
                    .build(),
            );
            let state = State {
                pool: ExecutionPool::new(harness, 2),
                assistant: Box::new(NoAssistant),
            };
            let (stop, stopped) = oneshot::channel::<()>();
            let task = tokio::spawn(run(listener, state, async {
                let _ = stopped.await;
            }));
            Self {
                socket,
                stop: Some(stop),
                task,
            }
        }

        async fn connect(&self) -> UnixStream {
            UnixStream::connect(&self.socket).await.unwrap()
        }

        async fn stop(mut self) {
            if let Some(stop) = self.stop.take() {
                let _ = stop.send(());
            }
            self.task.await.unwrap().unwrap();
        }
    }

    async fn call(stream: &mut UnixStream, request: &Request) -> Response {
        protocol::write_frame(stream, request).await.unwrap();
        protocol::read_frame(stream).await.unwrap().unwrap()
    }

    fn debug(code: &str) -> Request {
        Request::Debug(DebugRequest {
            code: code.into(),
            language: "python".into(),
            user_input: String::new(),
        })
    }

    #[tokio::test]
    async fn answers_requests_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let workspaces = tempfile::tempdir().unwrap();
        let daemon = Daemon::start(dir.path(), workspaces.path());
        let mut client = daemon.connect().await;

        assert_eq!(call(&mut client, &Request::Ping).await, Response::Pong);

        let Response::Debug(response) = call(&mut client, &debug("echo hi")).await else {
            panic!("expected a debug response");
        };
        assert_eq!(response.output.as_deref(), Some("hi\n"));
        assert_eq!(response.error, "");

        assert_eq!(
            call(&mut client, &Request::Status).await,
            Response::Status {
                in_flight: 0,
                completed: 1,
                failed: 0,
                max_concurrent: 2,
            }
        );

        daemon.stop().await;
    }

    #[tokio::test]
    async fn autocorrect_needs_code_and_an_assistant() {
        let dir = tempfile::tempdir().unwrap();
        let workspaces = tempfile::tempdir().unwrap();
        let daemon = Daemon::start(dir.path(), workspaces.path());
        let mut client = daemon.connect().await;

        let empty = Request::Autocorrect(AutocorrectRequest { code: String::new() });
        assert_eq!(
            call(&mut client, &empty).await,
            Response::Autocorrect(AutocorrectResponse::failed("Code missing"))
        );

        let code = Request::Autocorrect(AutocorrectRequest { code: "x = ".into() });
        assert_eq!(
            call(&mut client, &code).await,
            Response::Autocorrect(AutocorrectResponse::failed("Assistant not configured"))
        );

        daemon.stop().await;
    }

    #[tokio::test]
    async fn garbage_gets_an_error_response() {
        let dir = tempfile::tempdir().unwrap();
        let workspaces = tempfile::tempdir().unwrap();
        let daemon = Daemon::start(dir.path(), workspaces.path());
        let mut client = daemon.connect().await;

        client.write_all(&3u32.to_be_bytes()).await.unwrap();
        client.write_all(&[0xc1, 0xc1, 0xc1]).await.unwrap();

        let response: Response = protocol::read_frame(&mut client).await.unwrap().unwrap();
        assert!(matches!(response, Response::Error { .. }));

        daemon.stop().await;
    }

    #[tokio::test]
    async fn hanging_up_cancels_the_running_request() {
        let dir = tempfile::tempdir().unwrap();
        let workspaces = tempfile::tempdir().unwrap();
        let daemon = Daemon::start(dir.path(), workspaces.path());

        let mut client = daemon.connect().await;
        protocol::write_frame(&mut client, &debug("sleep 30"))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(client);

        let mut observer = daemon.connect().await;
        let mut in_flight = usize::MAX;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Response::Status { in_flight: n, .. } = call(&mut observer, &Request::Status).await
            {
                in_flight = n;
                if n == 0 {
                    break;
                }
            }
        }
        assert_eq!(in_flight, 0);
        assert!(std::fs::read_dir(workspaces.path()).unwrap().next().is_none());

        daemon.stop().await;
    }
}
