//! Wire protocol for daemon communication
//!
//! Every message is a 4-byte big-endian length followed by a MessagePack
//! body. Bodies are encoded with field names so optional fields can be left
//! out and tagged enums decode.

use crate::tracer::TraceStep;
use crate::{Result, StepError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame body either side will accept
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Run a program and trace it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugRequest {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub language: String,
    /// Fed to the program's standard input
    #[serde(default)]
    pub user_input: String,
}

/// Result of a debug request
///
/// `output` is absent when the request was rejected before anything ran.
/// `trace` is present only when the code parsed as Python; otherwise
/// `trace_error` says why.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default)]
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Vec<TraceStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<String>>,
}

impl DebugResponse {
    /// A request refused before any work, e.g. `Unsupported language`
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            ..Self::default()
        }
    }
}

/// Ask the assistant to fix a program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutocorrectRequest {
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutocorrectResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AutocorrectResponse {
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Request types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Run and trace code
    Debug(DebugRequest),
    /// Correct code with the assistant
    Autocorrect(AutocorrectRequest),
    /// Get execution pool status
    Status,
    /// Ping
    Ping,
}

/// Response types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Response {
    Debug(DebugResponse),
    Autocorrect(AutocorrectResponse),
    Status {
        in_flight: usize,
        completed: u64,
        failed: u64,
        max_concurrent: usize,
    },
    Pong,
    /// The request itself could not be handled
    Error { message: String },
}

/// Encode a message to msgpack
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    rmp_serde::to_vec_named(msg).map_err(|e| StepError::Protocol(e.to_string()))
}

/// Decode a message from msgpack
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    rmp_serde::from_slice(data).map_err(|e| StepError::Protocol(e.to_string()))
}

/// Write one length-prefixed frame
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = encode(msg)?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|_| body.len() <= MAX_FRAME_LEN)
        .ok_or_else(|| {
            StepError::Protocol(format!("frame of {} bytes exceeds limit", body.len()))
        })?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame.
///
/// Returns `Ok(None)` when the peer closed the stream between frames.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(StepError::Protocol(format!(
            "frame of {len} bytes exceeds limit"
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    decode(&body).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_a_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let request = Request::Debug(DebugRequest {
            code: "print(input())".into(),
            language: "python".into(),
            user_input: "hi\n".into(),
        });

        write_frame(&mut client, &request).await.unwrap();
        write_frame(&mut client, &Request::Ping).await.unwrap();
        drop(client);

        let first: Option<Request> = read_frame(&mut server).await.unwrap();
        assert_eq!(first, Some(request));
        let second: Option<Request> = read_frame(&mut server).await.unwrap();
        assert_eq!(second, Some(Request::Ping));
        let end: Option<Request> = read_frame(&mut server).await.unwrap();
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn oversized_frames_are_refused() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let len = u32::try_from(MAX_FRAME_LEN + 1).unwrap();
        client.write_all(&len.to_be_bytes()).await.unwrap();

        let err = read_frame::<_, Request>(&mut server).await.unwrap_err();
        assert!(matches!(err, StepError::Protocol(_)));
    }

    #[test]
    fn user_input_defaults_to_empty() {
        let request: DebugRequest =
            serde_json::from_str(r#"{"code": "x = 1", "language": "python"}"#).unwrap();
        assert_eq!(request.user_input, "");
    }

    #[test]
    fn rejected_response_carries_only_the_error() {
        let json = serde_json::to_value(DebugResponse::rejected("Unsupported language")).unwrap();
        assert_eq!(json, serde_json::json!({"error": "Unsupported language"}));
    }

    #[test]
    fn traced_response_uses_camel_case() {
        let response = DebugResponse {
            output: Some("1\n".into()),
            error: String::new(),
            trace: Some(vec![TraceStep {
                line_number: 0,
                description: "print(1)".into(),
            }]),
            trace_error: None,
            questions: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["trace"][0]["lineNumber"], 0);
        assert_eq!(json["error"], "");
        assert!(json.get("traceError").is_none());

        let decoded: Response = decode(&encode(&Response::Debug(response.clone())).unwrap()).unwrap();
        assert_eq!(decoded, Response::Debug(response));
    }
}
