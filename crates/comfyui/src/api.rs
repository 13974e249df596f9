//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (prompt submission, history, image
//! download, uploads, queue control and the read-only metadata
//! endpoints) using [`reqwest`]. Every call is stateless.

use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::{
    EditHistoryRequest, HistoryResponse, ImageRef, ObjectInfoResponse, PromptQueueResponse,
    QueuePromptResponse, QueueResponse, SystemStatsResponse, UploadImageResponse,
    ViewMetadataResponse,
};

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The response body carried an `error` object.
    #[error("ComfyUI reported an error: {error}")]
    Server {
        error: serde_json::Value,
        /// Per-node validation errors sent alongside `error`, if any.
        node_errors: serde_json::Map<String, serde_json::Value>,
    },

    /// The body was not the JSON shape this endpoint returns.
    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct SubmitBody<'a, P: ?Sized> {
    prompt: &'a P,
    client_id: &'a str,
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Queue a prompt for execution.
    ///
    /// Sends `POST /prompt` with `{prompt, client_id}`. Events for the
    /// prompt are delivered to the WebSocket session with the same
    /// `client_id`. Validation failures come back as
    /// [`ComfyUIApiError::Server`]; a nominal success may still carry
    /// `node_errors`, which the caller must check.
    pub async fn submit_prompt<P: Serialize + ?Sized>(
        &self,
        prompt: &P,
        client_id: &str,
    ) -> Result<QueuePromptResponse, ComfyUIApiError> {
        let response = self
            .client
            .post(self.url("/prompt"))
            .json(&SubmitBody { prompt, client_id })
            .send()
            .await?;

        Self::parse_json(response).await
    }

    /// Current queue depth (`GET /prompt`).
    pub async fn get_prompt(&self) -> Result<PromptQueueResponse, ComfyUIApiError> {
        self.get_json("/prompt").await
    }

    /// Retrieve execution history, for one prompt or for all of them.
    pub async fn get_history(
        &self,
        prompt_id: Option<&str>,
    ) -> Result<HistoryResponse, ComfyUIApiError> {
        match prompt_id {
            Some(id) => self.get_json(&format!("/history/{id}")).await,
            None => self.get_json("/history").await,
        }
    }

    /// Clear or delete history entries (`POST /history`).
    pub async fn edit_history(&self, request: &EditHistoryRequest) -> Result<(), ComfyUIApiError> {
        let response = self
            .client
            .post(self.url("/history"))
            .json(request)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Running and pending queue items (`GET /queue`).
    pub async fn get_queue(&self) -> Result<QueueResponse, ComfyUIApiError> {
        self.get_json("/queue").await
    }

    /// Remove a pending prompt from the queue (`POST /queue`).
    pub async fn cancel_prompt(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let body = serde_json::json!({
            "delete": [prompt_id],
        });

        let response = self
            .client
            .post(self.url("/queue"))
            .json(&body)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Interrupt the currently running execution immediately.
    ///
    /// This does not target a specific prompt -- it interrupts whatever
    /// is executing right now.
    pub async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        let response = self.client.post(self.url("/interrupt")).send().await?;

        Self::check_status(response).await
    }

    /// Download a stored file (`GET /view`).
    pub async fn get_image(&self, image: &ImageRef) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self
            .client
            .get(self.url("/view"))
            .query(&[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.folder_type.as_str()),
            ])
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Safetensors header metadata for a model file.
    ///
    /// * `folder_name` - model folder, e.g. `checkpoints` or `loras`.
    pub async fn view_metadata(
        &self,
        folder_name: &str,
        filename: &str,
    ) -> Result<ViewMetadataResponse, ComfyUIApiError> {
        let response = self
            .client
            .get(self.url(&format!("/view_metadata/{folder_name}")))
            .query(&[("filename", filename)])
            .send()
            .await?;

        Self::parse_json(response).await
    }

    pub async fn get_system_stats(&self) -> Result<SystemStatsResponse, ComfyUIApiError> {
        self.get_json("/system_stats").await
    }

    /// Node class catalog, or a single class definition.
    pub async fn get_object_info(
        &self,
        node_class: Option<&str>,
    ) -> Result<ObjectInfoResponse, ComfyUIApiError> {
        match node_class {
            Some(class) => self.get_json(&format!("/object_info/{class}")).await,
            None => self.get_json("/object_info").await,
        }
    }

    pub async fn get_embeddings(&self) -> Result<Vec<String>, ComfyUIApiError> {
        self.get_json("/embeddings").await
    }

    pub async fn get_extensions(&self) -> Result<Vec<String>, ComfyUIApiError> {
        self.get_json("/extensions").await
    }

    /// Upload an input image (`POST /upload/image`).
    pub async fn upload_image(
        &self,
        image: Vec<u8>,
        filename: &str,
        overwrite: Option<bool>,
    ) -> Result<UploadImageResponse, ComfyUIApiError> {
        let mut form = Form::new().part("image", image_part(image, filename)?);
        if let Some(overwrite) = overwrite {
            form = form.text("overwrite", overwrite.to_string());
        }

        let response = self
            .client
            .post(self.url("/upload/image"))
            .multipart(form)
            .send()
            .await?;

        Self::parse_json(response).await
    }

    /// Upload a mask to be applied to an already uploaded image
    /// (`POST /upload/mask`).
    pub async fn upload_mask(
        &self,
        image: Vec<u8>,
        filename: &str,
        original_ref: &ImageRef,
        overwrite: Option<bool>,
    ) -> Result<UploadImageResponse, ComfyUIApiError> {
        let mut form = Form::new()
            .part("image", image_part(image, filename)?)
            .text("original_ref", serde_json::to_string(original_ref)?);
        if let Some(overwrite) = overwrite {
            form = form.text("overwrite", overwrite.to_string());
        }

        let response = self
            .client
            .post(self.url("/upload/mask"))
            .multipart(form)
            .send()
            .await?;

        Self::parse_json(response).await
    }

    // ---- private helpers ----

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ComfyUIApiError> {
        let response = self.client.get(self.url(path)).send().await?;
        Self::parse_json(response).await
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Decode a JSON body, surfacing a server-reported `error` object
    /// before the status code so that validation failures keep their
    /// structure.
    async fn parse_json<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let status = response.status();
        let body = response.text().await?;

        let value: serde_json::Value = match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(_) if !status.is_success() => {
                return Err(ComfyUIApiError::ApiError {
                    status: status.as_u16(),
                    body,
                })
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(err) = server_error(&value) {
            return Err(err);
        }
        if !status.is_success() {
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_value(value)?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

fn server_error(value: &serde_json::Value) -> Option<ComfyUIApiError> {
    let object = value.as_object()?;
    let error = object.get("error")?;
    let node_errors = object
        .get("node_errors")
        .and_then(serde_json::Value::as_object)
        .cloned()
        .unwrap_or_default();

    Some(ComfyUIApiError::Server {
        error: error.clone(),
        node_errors,
    })
}

fn image_part(image: Vec<u8>, filename: &str) -> Result<Part, ComfyUIApiError> {
    Ok(Part::bytes(image)
        .file_name(filename.to_string())
        .mime_str(image_mime_type(filename))?)
}

/// Content type for an upload, from the filename extension.
pub fn image_mime_type(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => "application/octet-stream",
    }
}
