//! Core types for pipeline graphs
//!
//! These types define the structure of a pipeline graph: typed nodes with
//! their params, status and last result, and the port-to-port edges that
//! feed one node's output into another.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a node
pub type NodeId = String;

/// Unique identifier for an edge
pub type EdgeId = String;

/// Unique identifier for a port
pub type PortId = String;

/// Well-known port names
pub mod ports {
    /// Main image input of render, modifier, upscale and video nodes
    pub const IMAGE: &str = "image";
    /// "Before" side of a compare node
    pub const IMAGE_A: &str = "imageA";
    /// "After" side of a compare node
    pub const IMAGE_B: &str = "imageB";
    /// Optional last frame of a video node
    pub const END_FRAME: &str = "endFrame";
    /// Output port every node exposes
    pub const OUTPUT: &str = "output";
}

/// The kind of step a node performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Captured input image (canvas or CAD viewport capture)
    Source,
    /// AI render of the input image
    Render,
    /// Masked detail edit
    Modifier,
    /// Resolution upscale
    Upscale,
    /// Image-to-video generation
    Video,
    /// Side-by-side comparison, no transformation
    Compare,
}

impl NodeType {
    pub const ALL: [NodeType; 6] = [
        NodeType::Source,
        NodeType::Render,
        NodeType::Modifier,
        NodeType::Upscale,
        NodeType::Video,
        NodeType::Compare,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Source => "source",
            NodeType::Render => "render",
            NodeType::Modifier => "modifier",
            NodeType::Upscale => "upscale",
            NodeType::Video => "video",
            NodeType::Compare => "compare",
        }
    }

    /// Catalog cost in credits for one execution of this type
    pub fn default_cost(&self) -> u32 {
        match self {
            NodeType::Source | NodeType::Compare => 0,
            NodeType::Render | NodeType::Modifier => 1,
            NodeType::Upscale => 2,
            NodeType::Video => 5,
        }
    }

    /// Port read as this node's main input image
    pub fn primary_port(&self) -> Option<&'static str> {
        match self {
            NodeType::Source => None,
            NodeType::Render | NodeType::Modifier | NodeType::Upscale | NodeType::Video => {
                Some(ports::IMAGE)
            }
            NodeType::Compare => Some(ports::IMAGE_A),
        }
    }

    /// Whether executing this type goes through an external adapter
    pub fn uses_adapter(&self) -> bool {
        !matches!(self, NodeType::Source | NodeType::Compare)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution status of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Idle,
    Queued,
    Running,
    Done,
    Error,
    Cancelled,
    /// An ancestor failed, so this node's input is unavailable
    Blocked,
}

impl NodeStatus {
    /// Whether a node in this status has finished for the current run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Done | NodeStatus::Error | NodeStatus::Cancelled | NodeStatus::Blocked
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Idle => "idle",
            NodeStatus::Queued => "queued",
            NodeStatus::Running => "running",
            NodeStatus::Done => "done",
            NodeStatus::Error => "error",
            NodeStatus::Cancelled => "cancelled",
            NodeStatus::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Output of a node's last successful execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeResult {
    /// Output image reference (URL, data URI or storage key)
    pub image: String,
    /// Output resolution, e.g. "2048x2048"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    /// Output video reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
    /// For compare nodes, the "before" image shown against `image`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare_with: Option<String>,
    /// RFC 3339 completion timestamp
    pub timestamp: String,
    /// Fingerprint of the configuration this result was produced under
    #[serde(default)]
    pub cache_key: String,
}

impl NodeResult {
    /// Result holding only an image, stamped with the current time
    pub fn image(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            resolution: None,
            video: None,
            compare_with: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
            cache_key: String::new(),
        }
    }
}

/// A node instance in a pipeline graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineNode {
    /// Unique identifier for this node instance
    pub id: NodeId,
    /// Step this node performs
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Type-specific configuration
    #[serde(default = "empty_params")]
    pub params: serde_json::Value,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub result: Option<NodeResult>,
    /// Credits charged per successful execution
    #[serde(default)]
    pub cost: u32,
    /// Position on the canvas (x, y); never read by the engine
    #[serde(default)]
    pub position: (f64, f64),
}

fn empty_params() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl PipelineNode {
    /// Create an idle node with empty params and the type's catalog cost
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            params: empty_params(),
            status: NodeStatus::Idle,
            result: None,
            cost: node_type.default_cost(),
            position: (0.0, 0.0),
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    /// Image of the last stored result, if any
    pub fn result_image(&self) -> Option<&str> {
        self.result.as_ref().map(|r| r.image.as_str())
    }

    /// Cache key of the last stored result, if any
    pub fn stored_cache_key(&self) -> Option<&str> {
        self.result.as_ref().map(|r| r.cache_key.as_str())
    }
}

/// An edge connecting one node's output port to another node's input port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEdge {
    pub id: EdgeId,
    /// Source node ID
    pub from: NodeId,
    pub from_port: PortId,
    /// Target node ID
    pub to: NodeId,
    pub to_port: PortId,
}

impl PipelineEdge {
    pub fn new(
        id: impl Into<String>,
        from: impl Into<String>,
        from_port: impl Into<String>,
        to: impl Into<String>,
        to_port: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            from_port: from_port.into(),
            to: to.into(),
            to_port: to_port.into(),
        }
    }
}

/// A complete pipeline graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineGraph {
    pub nodes: Vec<PipelineNode>,
    pub edges: Vec<PipelineEdge>,
}

impl PipelineGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a node by ID
    pub fn find_node(&self, id: &str) -> Option<&PipelineNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Find a node by ID (mutable)
    pub fn find_node_mut(&mut self, id: &str) -> Option<&mut PipelineNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Get edges coming into a node
    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a PipelineEdge> + 'a {
        self.edges.iter().filter(move |e| e.to == node_id)
    }

    /// Get edges going out of a node
    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a PipelineEdge> + 'a {
        self.edges.iter().filter(move |e| e.from == node_id)
    }

    /// Get the IDs of nodes that this node depends on (upstream nodes)
    pub fn get_dependencies(&self, node_id: &str) -> Vec<NodeId> {
        self.incoming_edges(node_id).map(|e| e.from.clone()).collect()
    }

    /// Get the IDs of nodes that depend on this node (downstream nodes)
    pub fn get_dependents(&self, node_id: &str) -> Vec<NodeId> {
        self.outgoing_edges(node_id).map(|e| e.to.clone()).collect()
    }

    /// Edges whose source or target is not a node of this graph
    pub fn dangling_edges(&self) -> Vec<&PipelineEdge> {
        self.edges
            .iter()
            .filter(|e| self.find_node(&e.from).is_none() || self.find_node(&e.to).is_none())
            .collect()
    }
}

/// First incoming edge into `node_id`, on any port
pub fn first_incoming_edge<'a>(node_id: &str, edges: &'a [PipelineEdge]) -> Option<&'a PipelineEdge> {
    edges.iter().find(|e| e.to == node_id)
}

/// First incoming edge into `node_id` on `port`
pub fn input_edge<'a>(node_id: &str, port: &str, edges: &'a [PipelineEdge]) -> Option<&'a PipelineEdge> {
    edges.iter().find(|e| e.to == node_id && e.to_port == port)
}
