//! The live WebSocket channel to a ComfyUI server.
//!
//! A [`LiveConnection`] owns a reader task that pulls frames off the
//! socket, parses text frames into [`ComfyUIMessage`]s and fans every
//! frame out on a [`tokio::sync::broadcast`] channel. Subscribers hold a
//! `broadcast::Receiver<Frame>`; dropping it is how a listener goes away.
//!
//! Lifecycle state is published through [`StateCell`], which only
//! applies transitions permitted by [`ConnectionState::can_transition_to`].

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::error::ComfyUIError;
use crate::messages::{parse_message, ComfyUIMessage, Frame};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Broadcast channel capacity for inbound frames.
pub const FRAME_CHANNEL_CAPACITY: usize = 256;

/// How long [`LiveConnection::close`] waits for the reader task.
const READER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle of a client's event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected, or the last attempt failed.
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Frames are flowing.
    Open,
    /// Closed by either side.
    Closed,
}

impl ConnectionState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        matches!(
            (self, next),
            (Disconnected | Closed, Connecting) | (Connecting, Open | Disconnected) | (Open, Closed)
        )
    }
}

/// Shared, watchable connection state.
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<ConnectionState>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::Disconnected);
        Self { tx }
    }

    pub(crate) fn get(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Move to `next` if the transition is legal. Returns whether it was applied.
    pub(crate) fn transition(&self, next: ConnectionState) -> bool {
        self.tx.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                tracing::trace!(from = ?*current, to = ?next, "Skipping connection state transition");
                false
            }
        })
    }
}

/// An open WebSocket plus the task reading from it.
pub(crate) struct LiveConnection {
    frames: broadcast::Sender<Frame>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

impl LiveConnection {
    /// Perform the handshake against `url` and start the reader task.
    ///
    /// On timeout the in-flight handshake future is dropped, which closes
    /// the half-open socket. Moves `state` to `Open` before the reader
    /// starts so that a server-side close is always observed as
    /// `Open -> Closed`.
    pub(crate) async fn open(
        url: &str,
        client_id: &str,
        timeout: Duration,
        state: Arc<StateCell>,
    ) -> Result<Self, ComfyUIError> {
        let ws_stream = match tokio::time::timeout(timeout, connect_async(url)).await {
            Ok(Ok((ws_stream, _response))) => ws_stream,
            Ok(Err(e)) => {
                return Err(ComfyUIError::Connection(format!(
                    "Failed to connect to ComfyUI at {url}: {e}"
                )))
            }
            Err(_) => return Err(ComfyUIError::ConnectTimeout(timeout)),
        };

        let (frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        state.transition(ConnectionState::Open);

        let reader = tokio::spawn(read_frames(
            ws_stream,
            frames.clone(),
            cancel.clone(),
            state,
            client_id.to_string(),
        ));

        Ok(Self {
            frames,
            cancel,
            reader,
        })
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Frame> {
        self.frames.subscribe()
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.frames.receiver_count()
    }

    /// Send a Close frame and stop the reader task.
    ///
    /// Waits up to 5 seconds for the reader to exit on its own before
    /// aborting it. Subscribers always see a final [`Frame::Closed`].
    pub(crate) async fn close(mut self) {
        self.cancel.cancel();

        if tokio::time::timeout(READER_SHUTDOWN_TIMEOUT, &mut self.reader)
            .await
            .is_err()
        {
            tracing::warn!("WebSocket reader did not stop in time, aborting");
            self.reader.abort();
            let _ = (&mut self.reader).await;
            let _ = self.frames.send(Frame::Closed);
        }
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Read frames until the socket closes, errors, or `cancel` fires.
///
/// Text frames are parsed and broadcast; frames that fail to parse are
/// logged and dropped. Binary frames (preview images) are broadcast
/// undecoded.
async fn read_frames(
    mut ws_stream: WsStream,
    frames: broadcast::Sender<Frame>,
    cancel: CancellationToken,
    state: Arc<StateCell>,
    client_id: String,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = ws_stream.close(None).await {
                    tracing::debug!(client_id = %client_id, error = %e, "Close handshake failed");
                }
                tracing::info!(client_id = %client_id, "Connection closed");
                break;
            }
            next = ws_stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                dispatch_text(&text, &frames, &client_id);
            }
            Some(Ok(Message::Binary(data))) => {
                tracing::trace!(client_id = %client_id, bytes = data.len(), "Received binary frame");
                let _ = frames.send(Frame::Preview(data));
            }
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // Handled automatically by tungstenite.
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(client_id = %client_id, ?frame, "ComfyUI WebSocket closed");
                break;
            }
            Some(Ok(Message::Frame(_))) => {}
            Some(Err(e)) => {
                tracing::error!(client_id = %client_id, error = %e, "WebSocket receive error");
                break;
            }
            None => {
                tracing::info!(client_id = %client_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // State first, then the frame: a subscriber that misses `Closed`
    // is guaranteed to see the state change.
    state.transition(ConnectionState::Closed);
    let _ = frames.send(Frame::Closed);
}

fn dispatch_text(text: &str, frames: &broadcast::Sender<Frame>, client_id: &str) {
    match parse_message(text) {
        Ok(msg) => {
            log_message(&msg, client_id);
            let _ = frames.send(Frame::Message(msg));
        }
        Err(e) => {
            tracing::warn!(
                client_id = %client_id,
                error = %e,
                raw_message = %text,
                "Failed to parse ComfyUI message",
            );
        }
    }
}

fn log_message(msg: &ComfyUIMessage, client_id: &str) {
    match msg {
        ComfyUIMessage::Executing(data) => match &data.node {
            Some(node) => tracing::debug!(
                client_id = %client_id,
                prompt_id = ?data.prompt_id,
                node = %node,
                "Executing node",
            ),
            None => tracing::info!(
                client_id = %client_id,
                prompt_id = ?data.prompt_id,
                "Done executing prompt",
            ),
        },
        ComfyUIMessage::Progress(data) => tracing::debug!(
            client_id = %client_id,
            value = data.value,
            max = data.max,
            percent = data.percent(),
            "Generation progress",
        ),
        ComfyUIMessage::ExecutionError(data) => tracing::error!(
            client_id = %client_id,
            prompt_id = %data.prompt_id,
            node_id = %data.node_id,
            error_type = %data.exception_type,
            error_message = %data.exception_message,
            "Execution error",
        ),
        ComfyUIMessage::Status(data) => tracing::debug!(
            client_id = %client_id,
            queue_remaining = data.status.exec_info.queue_remaining,
            "ComfyUI queue status",
        ),
        ComfyUIMessage::Other { kind, .. } => {
            tracing::trace!(client_id = %client_id, kind = %kind, "Received unhandled message type");
        }
        other => tracing::debug!(
            client_id = %client_id,
            prompt_id = ?other.prompt_id(),
            "Received {other:?}",
        ),
    }
}
