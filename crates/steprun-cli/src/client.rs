//! Daemon client

use std::path::Path;
use steprun_core::protocol::{self, Request, Response};
use steprun_core::{Result, StepError};
use tokio::net::UnixStream;

/// One connection to the daemon
pub struct Client {
    stream: UnixStream,
}

impl Client {
    pub async fn connect(socket: &Path) -> Result<Self> {
        tracing::debug!(socket = %socket.display(), "connecting to daemon");
        let stream = UnixStream::connect(socket).await.map_err(|e| {
            StepError::Protocol(format!("cannot reach daemon at {}: {e}", socket.display()))
        })?;
        Ok(Self { stream })
    }

    /// Send one request and wait for its response
    pub async fn call(&mut self, request: &Request) -> Result<Response> {
        tracing::debug!(request = request_kind(request), "sending request");
        protocol::write_frame(&mut self.stream, request).await?;
        match protocol::read_frame(&mut self.stream).await? {
            Some(Response::Error { message }) => {
                tracing::warn!(%message, "daemon refused the request");
                Err(StepError::Protocol(message))
            }
            Some(response) => Ok(response),
            None => Err(StepError::Protocol("daemon closed the connection".into())),
        }
    }
}

const fn request_kind(request: &Request) -> &'static str {
    match request {
        Request::Debug(_) => "debug",
        Request::Autocorrect(_) => "autocorrect",
        Request::Status => "status",
        Request::Ping => "ping",
    }
}
