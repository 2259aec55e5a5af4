//! Graph store interface and in-memory implementation.
//!
//! The engine never owns the graph. It reads a copy of the nodes and edges
//! when it needs them and writes back through the discrete mutators below.

use parking_lot::RwLock;

use crate::types::{NodeId, NodeResult, NodeStatus, PipelineEdge, PipelineGraph, PipelineNode};

/// Read access to the graph plus the mutations the engine performs.
pub trait GraphStore: Send + Sync {
    /// Copy of every node
    fn nodes(&self) -> Vec<PipelineNode>;

    /// Copy of every edge
    fn edges(&self) -> Vec<PipelineEdge>;

    /// Copy of a single node
    fn node(&self, id: &str) -> Option<PipelineNode> {
        self.nodes().into_iter().find(|n| n.id == id)
    }

    /// Copy of the whole graph
    fn graph(&self) -> PipelineGraph {
        PipelineGraph {
            nodes: self.nodes(),
            edges: self.edges(),
        }
    }

    /// Set a node's status. Returns false if the node does not exist.
    fn set_status(&self, id: &str, status: NodeStatus) -> bool;

    /// Store a node's result. Returns false if the node does not exist.
    fn set_result(&self, id: &str, result: NodeResult) -> bool;

    /// Move a node on the canvas. Returns false if the node does not exist.
    fn set_position(&self, id: &str, position: (f64, f64)) -> bool;

    /// Swap the whole graph, e.g. when restoring a history snapshot
    fn replace(&self, graph: PipelineGraph);
}

/// Graph store holding one graph behind a read-write lock
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    graph: RwLock<PipelineGraph>,
}

impl InMemoryGraphStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `graph`
    pub fn with_graph(graph: PipelineGraph) -> Self {
        Self {
            graph: RwLock::new(graph),
        }
    }

    /// Insert a node, replacing any node with the same ID
    pub fn upsert_node(&self, node: PipelineNode) {
        let mut graph = self.graph.write();
        match graph.find_node_mut(&node.id) {
            Some(existing) => *existing = node,
            None => graph.nodes.push(node),
        }
    }

    /// Replace a node's params. Returns false if the node does not exist.
    pub fn set_params(&self, id: &str, params: serde_json::Value) -> bool {
        self.update(id, |node| node.params = params)
    }

    /// Add an edge
    pub fn add_edge(&self, edge: PipelineEdge) {
        self.graph.write().edges.push(edge);
    }

    /// Remove a node and every edge touching it
    pub fn remove_node(&self, id: &str) -> Option<PipelineNode> {
        let mut graph = self.graph.write();
        let pos = graph.nodes.iter().position(|n| n.id == id)?;
        graph.edges.retain(|e| e.from != id && e.to != id);
        Some(graph.nodes.remove(pos))
    }

    /// IDs of every node currently in the given status
    pub fn ids_with_status(&self, status: NodeStatus) -> Vec<NodeId> {
        self.graph
            .read()
            .nodes
            .iter()
            .filter(|n| n.status == status)
            .map(|n| n.id.clone())
            .collect()
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut PipelineNode)) -> bool {
        match self.graph.write().find_node_mut(id) {
            Some(node) => {
                f(node);
                true
            }
            None => false,
        }
    }
}

impl GraphStore for InMemoryGraphStore {
    fn nodes(&self) -> Vec<PipelineNode> {
        self.graph.read().nodes.clone()
    }

    fn edges(&self) -> Vec<PipelineEdge> {
        self.graph.read().edges.clone()
    }

    fn node(&self, id: &str) -> Option<PipelineNode> {
        self.graph.read().find_node(id).cloned()
    }

    fn graph(&self) -> PipelineGraph {
        self.graph.read().clone()
    }

    fn set_status(&self, id: &str, status: NodeStatus) -> bool {
        self.update(id, |node| node.status = status)
    }

    fn set_result(&self, id: &str, result: NodeResult) -> bool {
        self.update(id, |node| node.result = Some(result))
    }

    fn set_position(&self, id: &str, position: (f64, f64)) -> bool {
        self.update(id, |node| node.position = position)
    }

    fn replace(&self, graph: PipelineGraph) {
        *self.graph.write() = graph;
    }
}
