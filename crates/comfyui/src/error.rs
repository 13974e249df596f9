use std::time::Duration;

use crate::api::ComfyUIApiError;
use crate::config::ConfigError;

/// Errors surfaced by [`ComfyUIClient`](crate::ComfyUIClient).
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIError {
    /// A job was started without an open event channel.
    #[error("WebSocket client is not connected; call connect() first")]
    NotConnected,

    /// The WebSocket handshake failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// No handshake completed within the configured timeout.
    #[error("WebSocket connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The event channel ended before the prompt finished.
    #[error("Connection closed while waiting for prompt {prompt_id}")]
    ConnectionClosed { prompt_id: String },

    /// The server rejected the whole submission.
    #[error("Prompt rejected by server: {error}")]
    Submission {
        error: serde_json::Value,
        node_errors: serde_json::Map<String, serde_json::Value>,
    },

    /// The prompt was accepted but some nodes failed validation.
    #[error("Prompt {prompt_id} has node errors in: {}", node_list(.node_errors))]
    NodeErrors {
        prompt_id: String,
        node_errors: serde_json::Map<String, serde_json::Value>,
    },

    #[error("No history entry for prompt {0}")]
    HistoryNotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ComfyUIApiError),
}

fn node_list(node_errors: &serde_json::Map<String, serde_json::Value>) -> String {
    node_errors.keys().cloned().collect::<Vec<_>>().join(", ")
}
