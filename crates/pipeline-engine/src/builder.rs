//! Fluent builder for pipeline graphs
//!
//! Provides a fluent API for constructing graphs programmatically.

use crate::types::{ports, NodeResult, NodeType, PipelineEdge, PipelineGraph, PipelineNode};

/// Fluent builder for constructing pipeline graphs
///
/// # Example
///
/// ```ignore
/// let graph = PipelineBuilder::new()
///     .add_node("capture", NodeType::Source, (0.0, 0.0))
///     .with_result("data:image/png;base64,...")
///     .add_node("render", NodeType::Render, (200.0, 0.0))
///     .with_params(serde_json::json!({"engine": "main", "prompt": "brick facade"}))
///     .connect("capture", "render")
///     .build();
/// ```
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    nodes: Vec<PipelineNode>,
    edges: Vec<PipelineEdge>,
    edge_counter: usize,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an idle node with the type's catalog cost
    pub fn add_node(mut self, id: impl Into<String>, node_type: NodeType, position: (f64, f64)) -> Self {
        let mut node = PipelineNode::new(id, node_type);
        node.position = position;
        self.nodes.push(node);
        self
    }

    /// Set params on the most recently added node
    ///
    /// Must be called immediately after `add_node`.
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.params = params;
        }
        self
    }

    /// Override the cost of the most recently added node
    pub fn with_cost(mut self, cost: u32) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.cost = cost;
        }
        self
    }

    /// Give the most recently added node a stored result image
    ///
    /// Used for captured sources; the result carries no cache key.
    pub fn with_result(mut self, image: impl Into<String>) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.result = Some(NodeResult::image(image));
        }
        self
    }

    /// Connect `from`'s output to `to_port` of `to` (auto-generates edge ID)
    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>, to_port: impl Into<String>) -> Self {
        self.edge_counter += 1;
        self.edges.push(PipelineEdge::new(
            format!("edge-{}", self.edge_counter),
            from,
            ports::OUTPUT,
            to,
            to_port,
        ));
        self
    }

    /// Add an edge with an explicit ID
    pub fn add_edge_with_id(
        mut self,
        edge_id: impl Into<String>,
        from: impl Into<String>,
        from_port: impl Into<String>,
        to: impl Into<String>,
        to_port: impl Into<String>,
    ) -> Self {
        self.edges.push(PipelineEdge::new(edge_id, from, from_port, to, to_port));
        self
    }

    /// Connect `from` to the primary input port of `to`
    ///
    /// `to` must already be added; otherwise the `image` port is used.
    pub fn connect(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        let to = to.into();
        let port = self
            .nodes
            .iter()
            .find(|n| n.id == to)
            .and_then(|n| n.node_type.primary_port())
            .unwrap_or(ports::IMAGE);
        self.add_edge(from, to, port)
    }

    /// Build the graph without validation
    pub fn build(self) -> PipelineGraph {
        PipelineGraph {
            nodes: self.nodes,
            edges: self.edges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_chain() {
        let graph = PipelineBuilder::new()
            .add_node("s", NodeType::Source, (0.0, 0.0))
            .with_result("img://capture")
            .add_node("r", NodeType::Render, (200.0, 0.0))
            .with_params(json!({"engine": "main", "prompt": "p"}))
            .add_node("v", NodeType::Video, (400.0, 0.0))
            .with_cost(8)
            .connect("s", "r")
            .connect("r", "v")
            .add_edge("s", "v", ports::END_FRAME)
            .build();

        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.find_node("s").unwrap().result_image(), Some("img://capture"));
        assert_eq!(graph.find_node("r").unwrap().cost, 1);
        assert_eq!(graph.find_node("v").unwrap().cost, 8);

        let ids: Vec<&str> = graph.edges.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["edge-1", "edge-2", "edge-3"]);
        assert_eq!(graph.edges[2].to_port, ports::END_FRAME);
        assert!(graph.dangling_edges().is_empty());
    }

    #[test]
    fn test_connect_uses_primary_port() {
        let graph = PipelineBuilder::new()
            .add_node("a", NodeType::Source, (0.0, 0.0))
            .add_node("b", NodeType::Source, (0.0, 100.0))
            .add_node("c", NodeType::Compare, (200.0, 0.0))
            .connect("a", "c")
            .add_edge_with_id("after", "b", ports::OUTPUT, "c", ports::IMAGE_B)
            .build();

        assert_eq!(graph.edges[0].to_port, ports::IMAGE_A);
        assert_eq!(graph.edges[1].id, "after");
    }
}
