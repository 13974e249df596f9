//! ComfyUI WebSocket and REST client library.
//!
//! Submits prompts to a ComfyUI server, follows their execution over the
//! server's WebSocket event stream and downloads the resulting images.
//!
//! ```no_run
//! use comfyui_client::{ClientConfig, ComfyUIClient};
//!
//! # async fn run(prompt: serde_json::Value) -> Result<(), comfyui_client::ComfyUIError> {
//! let client = ComfyUIClient::new(ClientConfig::with_random_client_id("127.0.0.1:8188"));
//! client.connect().await?;
//!
//! let images = client.run_job(&prompt).await?;
//! for (node_id, outputs) in &images {
//!     println!("node {node_id}: {} image(s)", outputs.len());
//! }
//!
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod execution;
pub mod messages;
pub mod types;

pub use api::{ComfyUIApi, ComfyUIApiError};
pub use client::ComfyUIClient;
pub use config::{ClientConfig, ConfigError, Scheme};
pub use connection::ConnectionState;
pub use error::ComfyUIError;
pub use messages::{ComfyUIMessage, Frame};
pub use types::{ImageContainer, ImageRef, ImagesResponse, Prompt, PromptNode};
