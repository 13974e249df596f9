//! Request and response shapes for the ComfyUI HTTP API.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::messages::ExecInfo;

/// A job graph keyed by node id.
///
/// The client never inspects the graph; any `Serialize` value can be
/// submitted in its place (e.g. a workflow exported as raw JSON).
pub type Prompt = BTreeMap<String, PromptNode>;

/// One node of a [`Prompt`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptNode {
    pub class_type: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, NodeInput>,
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

impl PromptNode {
    pub fn new(class_type: impl Into<String>) -> Self {
        Self {
            class_type: class_type.into(),
            inputs: BTreeMap::new(),
            meta: None,
        }
    }

    /// Add a literal input.
    pub fn input(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.inputs
            .insert(name.into(), NodeInput::Value(value.into()));
        self
    }

    /// Wire `name` to output `slot` of node `node_id`.
    pub fn link(mut self, name: impl Into<String>, node_id: impl Into<String>, slot: u32) -> Self {
        self.inputs
            .insert(name.into(), NodeInput::Link(node_id.into(), slot));
        self
    }
}

/// A node input: either a reference to another node's output slot
/// (serialized as `["4", 0]`) or a literal value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeInput {
    Link(String, u32),
    Value(serde_json::Value),
}

/// Response of `POST /prompt`.
#[derive(Debug, Clone, Deserialize)]
pub struct QueuePromptResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
    /// Per-node validation errors. Non-empty means the prompt will not run.
    #[serde(default)]
    pub node_errors: serde_json::Map<String, serde_json::Value>,
}

/// Response of `GET /prompt`.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptQueueResponse {
    pub exec_info: ExecInfo,
}

/// Response of `GET /history[/{prompt_id}]`, keyed by prompt id.
pub type HistoryResponse = BTreeMap<String, HistoryEntry>;

/// Execution record of one prompt: the result manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    /// The queued prompt as echoed back by the server.
    #[serde(default)]
    pub prompt: serde_json::Value,
    /// Declared outputs keyed by node id.
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
    #[serde(default)]
    pub status: Option<HistoryStatus>,
}

/// Final status block of a history entry.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryStatus {
    pub status_str: String,
    pub completed: bool,
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
}

/// Outputs declared by one node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    /// Image artifacts, when the node produced any.
    #[serde(default)]
    pub images: Option<Vec<ImageRef>>,
    /// Other output kinds (`gifs`, `text`, ...), kept verbatim.
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

/// Location of a stored file on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Storage location tag: `output`, `input` or `temp`.
    #[serde(rename = "type", default = "default_folder_type")]
    pub folder_type: String,
}

fn default_folder_type() -> String {
    "output".to_string()
}

/// A fetched artifact together with where it came from.
#[derive(Debug, Clone)]
pub struct ImageContainer {
    pub image: ImageRef,
    pub blob: Vec<u8>,
}

/// Fetched image artifacts keyed by the node id that produced them.
pub type ImagesResponse = BTreeMap<String, Vec<ImageContainer>>;

/// Response of `/upload/image` and `/upload/mask`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadImageResponse {
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type")]
    pub folder_type: String,
}

impl UploadImageResponse {
    /// Reference usable as a `LoadImage` input or a mask's `original_ref`.
    pub fn as_image_ref(&self) -> ImageRef {
        ImageRef {
            filename: self.name.clone(),
            subfolder: self.subfolder.clone(),
            folder_type: self.folder_type.clone(),
        }
    }
}

/// Body of `POST /history`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EditHistoryRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clear: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delete: Option<Vec<String>>,
}

/// Response of `GET /queue`. Queue items are `[number, prompt_id, prompt,
/// extra_data, outputs_to_execute]` tuples and are kept as raw JSON.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueResponse {
    #[serde(default)]
    pub queue_running: Vec<serde_json::Value>,
    #[serde(default)]
    pub queue_pending: Vec<serde_json::Value>,
}

/// Response of `GET /system_stats`.
#[derive(Debug, Clone, Deserialize)]
pub struct SystemStatsResponse {
    pub system: SystemInfo,
    #[serde(default)]
    pub devices: Vec<DeviceStats>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub python_version: String,
    #[serde(default)]
    pub embedded_python: bool,
    #[serde(default)]
    pub comfyui_version: Option<String>,
    #[serde(default)]
    pub pytorch_version: Option<String>,
    #[serde(default)]
    pub ram_total: Option<u64>,
    #[serde(default)]
    pub ram_free: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceStats {
    pub name: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(default)]
    pub index: Option<i64>,
    #[serde(default)]
    pub vram_total: u64,
    #[serde(default)]
    pub vram_free: u64,
    #[serde(default)]
    pub torch_vram_total: u64,
    #[serde(default)]
    pub torch_vram_free: u64,
}

/// Response of `GET /object_info[/{class}]`: node class → definition.
pub type ObjectInfoResponse = BTreeMap<String, serde_json::Value>;

/// Response of `GET /view_metadata/{folder}`: safetensors header metadata.
pub type ViewMetadataResponse = serde_json::Map<String, serde_json::Value>;
