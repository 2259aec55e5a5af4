//! Adapter contract and registry
//!
//! An adapter performs the actual image transformation for one node type,
//! usually by calling an external service. The engine builds a typed
//! [`AdapterInput`] from the node's params and resolved input images, hands
//! it to the adapter registered for the node's type, and turns the
//! [`AdapterOutput`] into the node's stored result.
//!
//! Source and compare nodes never reach an adapter.
//!
//! # Usage
//!
//! ```ignore
//! let mut registry = AdapterRegistry::new();
//! registry.register(NodeType::Render, Arc::new(MyRenderAdapter::new()));
//! registry.register_callback(NodeType::Upscale, |input, _cancel| async move {
//!     Ok(AdapterOutput::new(format!("{}@2x", input.image().unwrap_or_default())))
//! });
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::error::{AdapterError, PipelineError, Result};
use crate::types::{NodeId, NodeResult, NodeType, PipelineNode};

/// Params of a render node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RenderParams {
    /// Render engine/model preset
    pub engine: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Fields the engine does not interpret, forwarded as-is
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Params of a modifier (masked detail edit) node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModifierParams {
    pub prompt: String,
    /// Mask image reference; None edits the whole image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Params of an upscale node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UpscaleParams {
    pub scale: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creativity: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for UpscaleParams {
    fn default() -> Self {
        Self {
            scale: 2.0,
            creativity: None,
            extra: Map::new(),
        }
    }
}

/// Params of a video node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoParams {
    pub prompt: String,
    /// Clip length in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Typed input handed to an adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AdapterInput {
    Render {
        image: Option<String>,
        params: RenderParams,
    },
    Modifier {
        image: Option<String>,
        params: ModifierParams,
    },
    Upscale {
        image: Option<String>,
        params: UpscaleParams,
    },
    #[serde(rename_all = "camelCase")]
    Video {
        image: Option<String>,
        end_frame: Option<String>,
        params: VideoParams,
    },
}

impl AdapterInput {
    /// Build the input for `node` from its params and resolved images.
    ///
    /// `image` is the primary input; `secondary` is the video end frame and
    /// is ignored for the other types. Fails for types without an adapter
    /// and for params that do not fit the type's parameter record.
    pub fn from_node(node: &PipelineNode, image: Option<String>, secondary: Option<String>) -> Result<Self> {
        let params = if node.params.is_null() {
            Value::Object(Map::new())
        } else {
            node.params.clone()
        };
        let invalid = |e: serde_json::Error| PipelineError::invalid_params(&node.id, e.to_string());

        Ok(match node.node_type {
            NodeType::Render => AdapterInput::Render {
                image,
                params: serde_json::from_value(params).map_err(invalid)?,
            },
            NodeType::Modifier => AdapterInput::Modifier {
                image,
                params: serde_json::from_value(params).map_err(invalid)?,
            },
            NodeType::Upscale => AdapterInput::Upscale {
                image,
                params: serde_json::from_value(params).map_err(invalid)?,
            },
            NodeType::Video => AdapterInput::Video {
                image,
                end_frame: secondary,
                params: serde_json::from_value(params).map_err(invalid)?,
            },
            NodeType::Source | NodeType::Compare => {
                return Err(PipelineError::NoAdapter(node.node_type.to_string()))
            }
        })
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            AdapterInput::Render { .. } => NodeType::Render,
            AdapterInput::Modifier { .. } => NodeType::Modifier,
            AdapterInput::Upscale { .. } => NodeType::Upscale,
            AdapterInput::Video { .. } => NodeType::Video,
        }
    }

    /// Primary input image, if one was resolved
    pub fn image(&self) -> Option<&str> {
        match self {
            AdapterInput::Render { image, .. }
            | AdapterInput::Modifier { image, .. }
            | AdapterInput::Upscale { image, .. }
            | AdapterInput::Video { image, .. } => image.as_deref(),
        }
    }
}

/// What an adapter returns on success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdapterOutput {
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    /// RFC 3339 timestamp of when the output was produced
    pub timestamp: String,
}

impl AdapterOutput {
    /// Output holding only an image, stamped with the current time
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            resolution: None,
            video: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn with_resolution(mut self, resolution: impl Into<String>) -> Self {
        self.resolution = Some(resolution.into());
        self
    }

    pub fn with_video(mut self, video: impl Into<String>) -> Self {
        self.video = Some(video.into());
        self
    }

    /// Convert into a stored node result stamped with `cache_key`
    pub fn into_result(self, cache_key: String) -> NodeResult {
        NodeResult {
            image: self.image,
            resolution: self.resolution,
            video: self.video,
            compare_with: None,
            timestamp: self.timestamp,
            cache_key,
        }
    }
}

/// Performs the transformation for one node type
///
/// Implementations should retry transient failures themselves; the engine
/// treats every returned error as the node's final failure. `cancel` fires
/// when the run is cancelled and may be used to abort in-flight requests.
#[async_trait]
pub trait NodeAdapter: Send + Sync {
    async fn run(
        &self,
        node_id: &str,
        input: AdapterInput,
        cancel: &CancellationToken,
    ) -> std::result::Result<AdapterOutput, AdapterError>;
}

type AdapterFuture = Pin<Box<dyn Future<Output = std::result::Result<AdapterOutput, AdapterError>> + Send>>;

/// Async callback-based adapter
///
/// Wraps an async closure as a NodeAdapter, for hosts that bridge adapters
/// from another runtime and for tests.
pub struct CallbackAdapter {
    callback: Box<dyn Fn(AdapterInput, CancellationToken) -> AdapterFuture + Send + Sync>,
}

impl CallbackAdapter {
    pub fn new<F, Fut>(callback: F) -> Self
    where
        F: Fn(AdapterInput, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<AdapterOutput, AdapterError>> + Send + 'static,
    {
        Self {
            callback: Box::new(move |input, cancel| Box::pin(callback(input, cancel)) as AdapterFuture),
        }
    }
}

#[async_trait]
impl NodeAdapter for CallbackAdapter {
    async fn run(
        &self,
        _node_id: &str,
        input: AdapterInput,
        cancel: &CancellationToken,
    ) -> std::result::Result<AdapterOutput, AdapterError> {
        (self.callback)(input, cancel.clone()).await
    }
}

/// Registry mapping node types to their adapters
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<NodeType, Arc<dyn NodeAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the adapter for a node type, replacing any previous one
    pub fn register(&mut self, node_type: NodeType, adapter: Arc<dyn NodeAdapter>) {
        if !node_type.uses_adapter() {
            log::warn!("Registering adapter for '{}', which never dispatches to one", node_type);
        }
        self.adapters.insert(node_type, adapter);
    }

    /// Register an async closure as the adapter for a node type
    pub fn register_callback<F, Fut>(&mut self, node_type: NodeType, callback: F)
    where
        F: Fn(AdapterInput, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<AdapterOutput, AdapterError>> + Send + 'static,
    {
        self.register(node_type, Arc::new(CallbackAdapter::new(callback)));
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, node_type: NodeType, adapter: Arc<dyn NodeAdapter>) -> Self {
        self.register(node_type, adapter);
        self
    }

    pub fn get(&self, node_type: NodeType) -> Option<Arc<dyn NodeAdapter>> {
        self.adapters.get(&node_type).cloned()
    }

    pub fn has(&self, node_type: NodeType) -> bool {
        self.adapters.contains_key(&node_type)
    }

    /// Adapter-backed types that have nothing registered
    pub fn missing_types(&self) -> Vec<NodeType> {
        NodeType::ALL
            .into_iter()
            .filter(|t| t.uses_adapter() && !self.has(*t))
            .collect()
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` for the same type.
    pub fn merge(&mut self, other: AdapterRegistry) {
        self.adapters.extend(other.adapters);
    }
}

/// Run `adapter` for `node_id`, failing with [`AdapterError::Cancelled`] as
/// soon as `cancel` fires
pub async fn run_cancellable(
    adapter: &dyn NodeAdapter,
    node_id: &NodeId,
    input: AdapterInput,
    cancel: &CancellationToken,
) -> std::result::Result<AdapterOutput, AdapterError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AdapterError::Cancelled),
        output = adapter.run(node_id, input, cancel) => output,
    }
}
