//! Correlating a submitted prompt with the event stream.
//!
//! [`await_completion`] takes ownership of a frame receiver and returns
//! once the `executing`/`node: null` frame for the given prompt arrives.
//! Because the receiver is moved in, the listener is gone by the time the
//! caller does anything else. If the receiver falls behind, the history
//! endpoint decides whether the completion was among the dropped frames. [`fetch_images`] then resolves the history
//! manifest into downloaded artifacts.

use tokio::sync::broadcast::{self, error::RecvError};

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::error::ComfyUIError;
use crate::messages::{ComfyUIMessage, Frame};
use crate::types::{HistoryEntry, ImageContainer, ImagesResponse};

/// Wait until `prompt_id` has finished executing.
///
/// Every other frame (progress, previews, other prompts' completions,
/// node-level `executing`) is skipped. Fails with
/// [`ComfyUIError::ConnectionClosed`] if the channel ends first.
///
/// ComfyUI writes the history entry when a prompt finishes, so after a
/// lag an entry for `prompt_id` counts as completion.
pub async fn await_completion(
    api: &ComfyUIApi,
    mut frames: broadcast::Receiver<Frame>,
    prompt_id: &str,
) -> Result<(), ComfyUIError> {
    loop {
        match frames.recv().await {
            Ok(Frame::Message(msg)) => {
                if msg.is_completion_of(prompt_id) {
                    tracing::info!(prompt_id, "Prompt finished executing");
                    return Ok(());
                }
                if let ComfyUIMessage::ExecutionError(data) = &msg {
                    if data.prompt_id == prompt_id {
                        tracing::warn!(
                            prompt_id,
                            node_id = %data.node_id,
                            error_message = %data.exception_message,
                            "Prompt reported an execution error; waiting for completion",
                        );
                    }
                }
            }
            Ok(Frame::Preview(_)) => {}
            Ok(Frame::Closed) | Err(RecvError::Closed) => {
                return Err(ComfyUIError::ConnectionClosed {
                    prompt_id: prompt_id.to_string(),
                });
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(prompt_id, skipped, "Event stream lagged, checking history");
                if api.get_history(Some(prompt_id)).await?.contains_key(prompt_id) {
                    tracing::info!(prompt_id, "Prompt finished while the stream lagged");
                    return Ok(());
                }
            }
        }
    }
}

/// Download every image declared in `entry`, grouped by node id.
///
/// Nodes without an `images` output are left out. Fetches run one at a
/// time in node-id order, then declaration order within a node.
pub async fn fetch_images(
    api: &ComfyUIApi,
    entry: &HistoryEntry,
) -> Result<ImagesResponse, ComfyUIApiError> {
    let mut output_images = ImagesResponse::new();

    for (node_id, output) in &entry.outputs {
        let Some(images) = &output.images else {
            continue;
        };

        let mut fetched = Vec::with_capacity(images.len());
        for image in images {
            let blob = api.get_image(image).await?;
            tracing::debug!(
                node = %node_id,
                filename = %image.filename,
                bytes = blob.len(),
                "Fetched output image",
            );
            fetched.push(ImageContainer {
                image: image.clone(),
                blob,
            });
        }
        output_images.insert(node_id.clone(), fetched);
    }

    Ok(output_images)
}
