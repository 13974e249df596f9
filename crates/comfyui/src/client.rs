//! The ComfyUI client: one session, one event channel, many jobs.
//!
//! [`ComfyUIClient`] binds a [`ClientConfig`] to a REST collaborator and
//! at most one live WebSocket. Call [`connect`](ComfyUIClient::connect)
//! once, then [`run_job`](ComfyUIClient::run_job) as often as needed.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::config::ClientConfig;
use crate::connection::{ConnectionState, LiveConnection, StateCell};
use crate::error::ComfyUIError;
use crate::execution::{await_completion, fetch_images};
use crate::messages::Frame;
use crate::types::{ImagesResponse, QueuePromptResponse};

/// A client session against one ComfyUI server.
///
/// All methods take `&self`; wrap the client in an `Arc` to share it
/// between tasks (e.g. to race [`run_job`](Self::run_job) against a
/// timer that calls [`disconnect`](Self::disconnect)).
pub struct ComfyUIClient {
    config: ClientConfig,
    api: ComfyUIApi,
    state: Arc<StateCell>,
    connection: Mutex<Option<LiveConnection>>,
}

impl ComfyUIClient {
    pub fn new(config: ClientConfig) -> Self {
        let api = ComfyUIApi::new(config.api_url());
        Self::with_api(config, api)
    }

    /// Build a client around an existing [`reqwest::Client`].
    pub fn with_http_client(config: ClientConfig, http: reqwest::Client) -> Self {
        let api = ComfyUIApi::with_client(http, config.api_url());
        Self::with_api(config, api)
    }

    fn with_api(config: ClientConfig, api: ComfyUIApi) -> Self {
        Self {
            config,
            api,
            state: Arc::new(StateCell::new()),
            connection: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// The stateless REST collaborator (uploads, queue, metadata, ...).
    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    /// Watch connection state changes.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.watch()
    }

    /// Open the event channel.
    ///
    /// Any existing channel is closed first, so calling this again is a
    /// reconnect. Fails with [`ComfyUIError::ConnectTimeout`] when the
    /// handshake does not finish within
    /// [`ClientConfig::connect_timeout`]; there is no retry.
    pub async fn connect(&self) -> Result<(), ComfyUIError> {
        let url = self.config.event_stream_url()?;
        let mut slot = self.connection.lock().await;

        if let Some(previous) = slot.take() {
            tracing::info!(client_id = %self.client_id(), "Closing existing connection before reconnecting");
            self.state.transition(ConnectionState::Closed);
            previous.close().await;
        }

        self.state.transition(ConnectionState::Connecting);
        tracing::info!(client_id = %self.client_id(), url = %url, "Connecting to ComfyUI");

        match LiveConnection::open(
            url.as_str(),
            self.client_id(),
            self.config.connect_timeout,
            Arc::clone(&self.state),
        )
        .await
        {
            Ok(conn) => {
                *slot = Some(conn);
                tracing::info!(client_id = %self.client_id(), "Connection open");
                Ok(())
            }
            Err(e) => {
                self.state.transition(ConnectionState::Disconnected);
                tracing::error!(client_id = %self.client_id(), error = %e, "WebSocket connect failed");
                Err(e)
            }
        }
    }

    /// Close the event channel if one is open. Never fails.
    ///
    /// Jobs still waiting on the channel fail with
    /// [`ComfyUIError::ConnectionClosed`].
    pub async fn disconnect(&self) {
        let mut slot = self.connection.lock().await;
        let Some(conn) = slot.take() else {
            return;
        };

        self.state.transition(ConnectionState::Closed);
        conn.close().await;
    }

    /// Subscribe to inbound frames (progress, previews, status).
    ///
    /// The subscription ends with [`Frame::Closed`] when the channel goes
    /// away. Dropping the receiver unsubscribes.
    pub async fn subscribe(&self) -> Result<broadcast::Receiver<Frame>, ComfyUIError> {
        if self.state.get() != ConnectionState::Open {
            return Err(ComfyUIError::NotConnected);
        }

        let slot = self.connection.lock().await;
        let frames = slot
            .as_ref()
            .map(LiveConnection::subscribe)
            .ok_or(ComfyUIError::NotConnected)?;

        // The reader publishes `Closed` state before its final frame, so a
        // receiver created after that frame is caught here.
        if self.state.get() != ConnectionState::Open {
            return Err(ComfyUIError::NotConnected);
        }
        Ok(frames)
    }

    /// Number of live frame subscriptions on the current channel.
    pub async fn listener_count(&self) -> usize {
        self.connection
            .lock()
            .await
            .as_ref()
            .map_or(0, LiveConnection::listener_count)
    }

    /// Queue a prompt under this client's id without waiting for it.
    ///
    /// A server-reported `error` becomes [`ComfyUIError::Submission`];
    /// non-empty `node_errors` become [`ComfyUIError::NodeErrors`].
    pub async fn queue_prompt<P: Serialize + ?Sized>(
        &self,
        prompt: &P,
    ) -> Result<QueuePromptResponse, ComfyUIError> {
        let queued = match self.api.submit_prompt(prompt, self.client_id()).await {
            Ok(queued) => queued,
            Err(ComfyUIApiError::Server { error, node_errors }) => {
                tracing::warn!(client_id = %self.client_id(), %error, "Prompt rejected");
                return Err(ComfyUIError::Submission { error, node_errors });
            }
            Err(e) => return Err(e.into()),
        };

        if !queued.node_errors.is_empty() {
            tracing::warn!(
                client_id = %self.client_id(),
                prompt_id = %queued.prompt_id,
                nodes = queued.node_errors.len(),
                "Prompt queued with node errors",
            );
            return Err(ComfyUIError::NodeErrors {
                prompt_id: queued.prompt_id,
                node_errors: queued.node_errors,
            });
        }

        tracing::info!(
            client_id = %self.client_id(),
            prompt_id = %queued.prompt_id,
            number = queued.number,
            "Prompt queued",
        );
        Ok(queued)
    }

    /// Submit `prompt`, wait for it to finish, and download its images.
    ///
    /// Requires an open connection; never connects implicitly. The frame
    /// subscription is taken before submission so a fast completion
    /// cannot be missed, and is released before the history fetch.
    /// Either every declared image is returned or the call fails.
    pub async fn run_job<P: Serialize + ?Sized>(
        &self,
        prompt: &P,
    ) -> Result<ImagesResponse, ComfyUIError> {
        // Subscribed before POST /prompt: the completion can arrive ahead of the response.
        let frames = self.subscribe().await?;
        let prompt_id = self.queue_prompt(prompt).await?.prompt_id;

        await_completion(&self.api, frames, &prompt_id).await?;

        let mut history = self.api.get_history(Some(&prompt_id)).await?;
        let entry = history
            .remove(&prompt_id)
            .ok_or_else(|| ComfyUIError::HistoryNotFound(prompt_id.clone()))?;

        let images = fetch_images(&self.api, &entry).await?;
        tracing::info!(
            client_id = %self.client_id(),
            prompt_id = %prompt_id,
            nodes = images.len(),
            "Fetched prompt outputs",
        );
        Ok(images)
    }
}
