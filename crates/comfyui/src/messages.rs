//! Event-stream frames and their typed decoding.
//!
//! Text frames on `/ws` are JSON envelopes, `{"type": "<kind>", "data": {...}}`.
//! Binary frames carry sampler previews and are passed through untouched.
//! Subscribers receive both as [`Frame`]s.

use serde::de::DeserializeOwned;
use serde::Deserialize;

/// One item on a connection's inbound event stream.
#[derive(Debug, Clone)]
pub enum Frame {
    /// A parsed JSON text frame.
    Message(ComfyUIMessage),
    /// A binary frame (sampler preview). Not decoded.
    Preview(Vec<u8>),
    /// The channel has closed. Nothing follows this frame.
    Closed,
}

/// A decoded text frame.
///
/// Kinds this client has no struct for (custom nodes, newer servers)
/// decode as [`ComfyUIMessage::Other`].
#[derive(Debug, Clone)]
pub enum ComfyUIMessage {
    /// Queue depth broadcast; also sent once right after the handshake.
    Status(StatusData),

    /// The server picked the prompt off the queue.
    ExecutionStart(ExecutionStartData),

    /// Nodes whose outputs were reused from an earlier run.
    ExecutionCached(ExecutionCachedData),

    /// Node-level progress marker. A null node ends the prompt.
    Executing(ExecutingData),

    /// Step counter inside a single node.
    Progress(ProgressData),

    /// A node finished and reported its UI output.
    Executed(ExecutedData),

    /// A node raised during execution.
    ExecutionError(ErrorData),

    /// Execution was interrupted via `POST /interrupt`.
    ExecutionInterrupted(InterruptedData),

    /// All nodes of a prompt finished without error.
    ExecutionSuccess(ExecutionStartData),

    /// Any other message type, kept verbatim.
    Other {
        kind: String,
        data: serde_json::Value,
    },
}

impl ComfyUIMessage {
    /// The prompt this message is about, when it carries one.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            ComfyUIMessage::ExecutionStart(d) | ComfyUIMessage::ExecutionSuccess(d) => {
                Some(&d.prompt_id)
            }
            ComfyUIMessage::ExecutionCached(d) => Some(&d.prompt_id),
            ComfyUIMessage::Executing(d) => d.prompt_id.as_deref(),
            ComfyUIMessage::Progress(d) => d.prompt_id.as_deref(),
            ComfyUIMessage::Executed(d) => Some(&d.prompt_id),
            ComfyUIMessage::ExecutionError(d) => Some(&d.prompt_id),
            ComfyUIMessage::ExecutionInterrupted(d) => Some(&d.prompt_id),
            ComfyUIMessage::Status(_) | ComfyUIMessage::Other { .. } => None,
        }
    }

    /// `true` for the `executing` frame with a null node for `prompt_id`,
    /// which ComfyUI sends once the whole graph has run.
    pub fn is_completion_of(&self, prompt_id: &str) -> bool {
        match self {
            ComfyUIMessage::Executing(data) => {
                data.node.is_none() && data.prompt_id.as_deref() == Some(prompt_id)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
    /// Session id ComfyUI assigned (echoes `clientId` when one was sent).
    #[serde(default)]
    pub sid: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

/// `execution_start` / `execution_success` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStartData {
    pub prompt_id: String,
}

/// `execution_cached` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// `executing` payload. `node` is null once the prompt's graph is done.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// `progress` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    pub value: i32,
    pub max: i32,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

impl ProgressData {
    /// Completion percentage (0-100).
    pub fn percent(&self) -> i16 {
        if self.max > 0 {
            ((self.value as f64 / self.max as f64) * 100.0) as i16
        } else {
            0
        }
    }
}

/// `executed` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    pub node: String,
    /// UI output as sent, e.g. `{"images": [...]}`.
    pub output: serde_json::Value,
    pub prompt_id: String,
}

/// `execution_error` payload. Tracebacks and input snapshots are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    pub node_id: String,
    #[serde(default)]
    pub node_type: Option<String>,
    pub exception_message: String,
    pub exception_type: String,
}

/// `execution_interrupted` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InterruptedData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Decode one text frame.
///
/// Fails on malformed JSON, on a missing `type`, or when a known kind's
/// `data` has the wrong shape. The connection reader logs and drops
/// such frames.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    let Envelope { kind, data } = serde_json::from_str(text)?;

    let msg = match kind.as_str() {
        "status" => ComfyUIMessage::Status(decode(data)?),
        "execution_start" => ComfyUIMessage::ExecutionStart(decode(data)?),
        "execution_cached" => ComfyUIMessage::ExecutionCached(decode(data)?),
        "executing" => ComfyUIMessage::Executing(decode(data)?),
        "progress" => ComfyUIMessage::Progress(decode(data)?),
        "executed" => ComfyUIMessage::Executed(decode(data)?),
        "execution_error" => ComfyUIMessage::ExecutionError(decode(data)?),
        "execution_interrupted" => ComfyUIMessage::ExecutionInterrupted(decode(data)?),
        "execution_success" => ComfyUIMessage::ExecutionSuccess(decode(data)?),
        _ => ComfyUIMessage::Other { kind, data },
    };
    Ok(msg)
}

fn decode<T: DeserializeOwned>(data: serde_json::Value) -> Result<T, serde_json::Error> {
    serde_json::from_value(data)
}
