//! Single-node execution
//!
//! [`NodeExecutor::execute_node`] runs one node of a planned level and turns
//! every failure into a status transition instead of an error: the node goes
//! to `error`, and every transitive descendant in the full graph goes to
//! `blocked`. Sibling nodes of the same level are unaffected.

use tokio_util::sync::CancellationToken;

use crate::adapter::{run_cancellable, AdapterInput, AdapterRegistry};
use crate::cache_key::compute_cache_key;
use crate::credits::CreditLedger;
use crate::error::{AdapterError, PipelineError, Result};
use crate::events::{EventSink, PipelineEvent};
use crate::graph::descendants;
use crate::status::ExecutionStatus;
use crate::store::GraphStore;
use crate::types::{input_edge, ports, NodeId, NodeResult, NodeStatus, NodeType, PipelineEdge, PipelineNode};

/// How a single node's execution ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Result stored and cost charged
    Completed { credits_charged: u64 },
    /// The node failed; `blocked` lists the descendants marked blocked
    Failed { error: String, blocked: Vec<NodeId> },
    /// The run was cancelled before or during this node
    Cancelled,
    /// Not executed because the node was already in this status
    Skipped(NodeStatus),
}

/// Executes nodes of one run against the engine's collaborators
pub struct NodeExecutor<'a> {
    pub(crate) run_id: &'a str,
    pub(crate) store: &'a dyn GraphStore,
    pub(crate) ledger: &'a dyn CreditLedger,
    pub(crate) adapters: &'a AdapterRegistry,
    pub(crate) events: &'a dyn EventSink,
    pub(crate) status: &'a ExecutionStatus,
    pub(crate) cancel: &'a CancellationToken,
}

impl NodeExecutor<'_> {
    /// Execute `node_id`. Never fails; see [`NodeOutcome`].
    pub async fn execute_node(&self, node_id: &str) -> NodeOutcome {
        let Some(node) = self.store.node(node_id) else {
            return self.fail(node_id, PipelineError::NodeNotFound(node_id.to_string()));
        };

        if matches!(node.status, NodeStatus::Blocked | NodeStatus::Cancelled) {
            log::debug!("Skipping node '{}' ({})", node_id, node.status);
            self.status.dequeue(node_id);
            return NodeOutcome::Skipped(node.status);
        }

        if self.cancel.is_cancelled() {
            return self.mark_cancelled(node_id);
        }

        self.store.set_status(node_id, NodeStatus::Running);
        self.status.node_started(node_id);
        self.emit(PipelineEvent::NodeStarted {
            run_id: self.run_id.to_string(),
            node_id: node_id.to_string(),
        });
        log::debug!("Node '{}' ({}) running", node_id, node.node_type);

        let nodes = self.store.nodes();
        let edges = self.store.edges();
        let cache_key = compute_cache_key(&node, &nodes, &edges);

        match self.produce(&node, &nodes, &edges, cache_key).await {
            Ok(result) => {
                self.store.set_result(node_id, result);
                self.store.set_status(node_id, NodeStatus::Done);
                let credits_charged = self.charge(u64::from(node.cost));
                log::debug!("Node '{}' done, charged {} credits", node_id, credits_charged);
                self.emit(PipelineEvent::NodeCompleted {
                    run_id: self.run_id.to_string(),
                    node_id: node_id.to_string(),
                    credits_charged,
                });
                NodeOutcome::Completed { credits_charged }
            }
            // An adapter reporting `Cancelled` on a live run is an ordinary failure
            Err(PipelineError::Adapter(AdapterError::Cancelled)) if self.cancel.is_cancelled() => {
                self.mark_cancelled(node_id)
            }
            Err(e) => self.fail(node_id, e),
        }
    }

    /// Build the node's new result
    async fn produce(
        &self,
        node: &PipelineNode,
        nodes: &[PipelineNode],
        edges: &[PipelineEdge],
        cache_key: String,
    ) -> Result<NodeResult> {
        match node.node_type {
            NodeType::Source => source_result(node, cache_key),
            NodeType::Compare => {
                let before = upstream_image(&node.id, ports::IMAGE_A, nodes, edges)
                    .ok_or_else(|| PipelineError::missing_input(&node.id, "no image on 'imageA'"))?;
                let after = upstream_image(&node.id, ports::IMAGE_B, nodes, edges)
                    .ok_or_else(|| PipelineError::missing_input(&node.id, "no image on 'imageB'"))?;

                let mut result = NodeResult::image(after);
                result.compare_with = Some(before);
                result.cache_key = cache_key;
                Ok(result)
            }
            node_type => {
                let adapter = self
                    .adapters
                    .get(node_type)
                    .ok_or_else(|| PipelineError::NoAdapter(node_type.to_string()))?;

                let image = node
                    .node_type
                    .primary_port()
                    .and_then(|port| upstream_image(&node.id, port, nodes, edges));
                let end_frame = if node_type == NodeType::Video {
                    upstream_image(&node.id, ports::END_FRAME, nodes, edges)
                } else {
                    None
                };

                let input = AdapterInput::from_node(node, image, end_frame)?;
                let output = run_cancellable(adapter.as_ref(), &node.id, input, self.cancel).await?;
                Ok(output.into_result(cache_key))
            }
        }
    }

    /// Charge the ledger and return what was actually deducted
    fn charge(&self, cost: u64) -> u64 {
        if cost == 0 {
            return 0;
        }
        let before = self.ledger.balance();
        let after = self.ledger.deduct(cost);
        before.saturating_sub(after)
    }

    fn fail(&self, node_id: &str, error: PipelineError) -> NodeOutcome {
        let message = error.to_string();
        log::warn!("Node '{}' failed: {}", node_id, message);

        self.store.set_status(node_id, NodeStatus::Error);
        self.status.dequeue(node_id);
        self.emit(PipelineEvent::NodeFailed {
            run_id: self.run_id.to_string(),
            node_id: node_id.to_string(),
            error: message.clone(),
        });

        let blocked = self.block_descendants(node_id);
        NodeOutcome::Failed {
            error: message,
            blocked,
        }
    }

    /// Mark every transitive descendant of `node_id` blocked
    fn block_descendants(&self, node_id: &str) -> Vec<NodeId> {
        let edges = self.store.edges();
        let mut blocked = Vec::new();

        for id in descendants(node_id, &edges) {
            if self.store.set_status(&id, NodeStatus::Blocked) {
                self.status.dequeue(&id);
                self.emit(PipelineEvent::NodeBlocked {
                    run_id: self.run_id.to_string(),
                    node_id: id.clone(),
                    failed_ancestor: node_id.to_string(),
                });
                blocked.push(id);
            }
        }

        if !blocked.is_empty() {
            log::debug!("Blocked {} descendant(s) of '{}'", blocked.len(), node_id);
        }
        blocked
    }

    pub(crate) fn mark_cancelled(&self, node_id: &str) -> NodeOutcome {
        self.store.set_status(node_id, NodeStatus::Cancelled);
        self.status.dequeue(node_id);
        self.emit(PipelineEvent::NodeCancelled {
            run_id: self.run_id.to_string(),
            node_id: node_id.to_string(),
        });
        log::debug!("Node '{}' cancelled", node_id);
        NodeOutcome::Cancelled
    }

    fn emit(&self, event: PipelineEvent) {
        if let Err(e) = self.events.send(event) {
            log::trace!("Dropped pipeline event: {}", e);
        }
    }
}

/// Result image of the node feeding `node_id` on `port`
fn upstream_image(node_id: &str, port: &str, nodes: &[PipelineNode], edges: &[PipelineEdge]) -> Option<String> {
    let edge = input_edge(node_id, port, edges)?;
    nodes
        .iter()
        .find(|n| n.id == edge.from)
        .and_then(|n| n.result_image())
        .map(str::to_string)
}

/// Sources keep an existing capture, or adopt the one injected in params
fn source_result(node: &PipelineNode, cache_key: String) -> Result<NodeResult> {
    if let Some(existing) = &node.result {
        let mut result = existing.clone();
        result.cache_key = cache_key;
        return Ok(result);
    }

    match node.params.get("image").and_then(|v| v.as_str()) {
        Some(image) if !image.is_empty() => {
            let mut result = NodeResult::image(image);
            result.cache_key = cache_key;
            Ok(result)
        }
        _ => Err(PipelineError::missing_input(&node.id, "source has no captured image")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::AdapterOutput;
    use crate::credits::InMemoryCreditLedger;
    use crate::events::VecEventSink;
    use crate::store::InMemoryGraphStore;
    use crate::types::{PipelineEdge, PipelineGraph};
    use serde_json::json;

    struct Harness {
        store: InMemoryGraphStore,
        ledger: InMemoryCreditLedger,
        adapters: AdapterRegistry,
        events: VecEventSink,
        status: ExecutionStatus,
        cancel: CancellationToken,
    }

    impl Harness {
        fn new(graph: PipelineGraph) -> Self {
            let mut adapters = AdapterRegistry::new();
            adapters.register_callback(NodeType::Render, |input: AdapterInput, _cancel| async move {
                match &input {
                    AdapterInput::Render { params, .. } if params.prompt == "fail" => {
                        Err(AdapterError::Server("boom".into()))
                    }
                    _ => Ok(AdapterOutput::new(format!("{}>render", input.image().unwrap_or("none")))),
                }
            });
            Self {
                store: InMemoryGraphStore::with_graph(graph),
                ledger: InMemoryCreditLedger::new(10),
                adapters,
                events: VecEventSink::new(),
                status: ExecutionStatus::new(),
                cancel: CancellationToken::new(),
            }
        }

        fn executor(&self) -> NodeExecutor<'_> {
            NodeExecutor {
                run_id: "run",
                store: &self.store,
                ledger: &self.ledger,
                adapters: &self.adapters,
                events: &self.events,
                status: &self.status,
                cancel: &self.cancel,
            }
        }
    }

    fn chain(prompt: &str) -> PipelineGraph {
        let mut src = PipelineNode::new("s", NodeType::Source);
        src.result = Some(NodeResult::image("img://capture"));
        PipelineGraph {
            nodes: vec![
                src,
                PipelineNode::new("r", NodeType::Render).with_params(json!({"prompt": prompt})),
                PipelineNode::new("m", NodeType::Modifier),
                PipelineNode::new("u", NodeType::Upscale),
            ],
            edges: vec![
                PipelineEdge::new("e1", "s", ports::OUTPUT, "r", ports::IMAGE),
                PipelineEdge::new("e2", "r", ports::OUTPUT, "m", ports::IMAGE),
                PipelineEdge::new("e3", "m", ports::OUTPUT, "u", ports::IMAGE),
            ],
        }
    }

    #[tokio::test]
    async fn test_success_stores_result_and_charges() {
        let h = Harness::new(chain("p"));
        let outcome = h.executor().execute_node("r").await;

        assert_eq!(outcome, NodeOutcome::Completed { credits_charged: 1 });
        let node = h.store.node("r").unwrap();
        assert_eq!(node.status, NodeStatus::Done);
        assert_eq!(node.result_image(), Some("img://capture>render"));

        let graph = h.store.graph();
        assert_eq!(
            node.stored_cache_key(),
            Some(compute_cache_key(&node, &graph.nodes, &graph.edges).as_str())
        );
        assert_eq!(h.ledger.balance(), 9);
    }

    #[tokio::test]
    async fn test_failure_blocks_all_descendants() {
        let h = Harness::new(chain("fail"));
        let outcome = h.executor().execute_node("r").await;

        match outcome {
            NodeOutcome::Failed { error, blocked } => {
                assert!(error.contains("boom"));
                assert_eq!(blocked, vec!["m".to_string(), "u".to_string()]);
            }
            other => panic!("Expected failure, got {:?}", other),
        }
        assert_eq!(h.store.node("r").unwrap().status, NodeStatus::Error);
        assert_eq!(h.store.node("u").unwrap().status, NodeStatus::Blocked);
        assert_eq!(h.ledger.balance(), 10);

        let blocked_events = h
            .events
            .events()
            .into_iter()
            .filter(|e| matches!(e, PipelineEvent::NodeBlocked { .. }))
            .count();
        assert_eq!(blocked_events, 2);
    }

    #[tokio::test]
    async fn test_blocked_node_is_skipped() {
        let h = Harness::new(chain("p"));
        h.store.set_status("m", NodeStatus::Blocked);

        assert_eq!(
            h.executor().execute_node("m").await,
            NodeOutcome::Skipped(NodeStatus::Blocked)
        );
    }

    #[tokio::test]
    async fn test_missing_adapter_fails_node() {
        let h = Harness::new(chain("p"));
        let outcome = h.executor().execute_node("m").await;
        assert!(matches!(outcome, NodeOutcome::Failed { ref blocked, .. } if blocked == &vec!["u".to_string()]));
    }

    #[tokio::test]
    async fn test_source_uses_injected_capture() {
        let graph = PipelineGraph {
            nodes: vec![PipelineNode::new("s", NodeType::Source).with_params(json!({"image": "img://cad"}))],
            edges: vec![],
        };
        let h = Harness::new(graph);
        assert_eq!(
            h.executor().execute_node("s").await,
            NodeOutcome::Completed { credits_charged: 0 }
        );
        assert_eq!(h.store.node("s").unwrap().result_image(), Some("img://cad"));
    }

    #[tokio::test]
    async fn test_source_without_capture_fails() {
        let graph = PipelineGraph {
            nodes: vec![PipelineNode::new("s", NodeType::Source)],
            edges: vec![],
        };
        let h = Harness::new(graph);
        assert!(matches!(
            h.executor().execute_node("s").await,
            NodeOutcome::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_compare_pairs_inputs() {
        let mut a = PipelineNode::new("a", NodeType::Source);
        a.result = Some(NodeResult::image("img://before"));
        let mut b = PipelineNode::new("b", NodeType::Source);
        b.result = Some(NodeResult::image("img://after"));
        let graph = PipelineGraph {
            nodes: vec![a, b, PipelineNode::new("c", NodeType::Compare)],
            edges: vec![
                PipelineEdge::new("e1", "a", ports::OUTPUT, "c", ports::IMAGE_A),
                PipelineEdge::new("e2", "b", ports::OUTPUT, "c", ports::IMAGE_B),
            ],
        };
        let h = Harness::new(graph);

        assert_eq!(
            h.executor().execute_node("c").await,
            NodeOutcome::Completed { credits_charged: 0 }
        );
        let result = h.store.node("c").unwrap().result.unwrap();
        assert_eq!(result.image, "img://after");
        assert_eq!(result.compare_with.as_deref(), Some("img://before"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let h = Harness::new(chain("p"));
        h.cancel.cancel();

        assert_eq!(h.executor().execute_node("r").await, NodeOutcome::Cancelled);
        assert_eq!(h.store.node("r").unwrap().status, NodeStatus::Cancelled);
        assert_eq!(h.ledger.balance(), 10);
    }

    #[tokio::test]
    async fn test_adapter_cancelled_on_live_run_fails_node() {
        let mut h = Harness::new(chain("p"));
        h.adapters
            .register_callback(NodeType::Render, |_input, _cancel| async move { Err(AdapterError::Cancelled) });

        match h.executor().execute_node("r").await {
            NodeOutcome::Failed { blocked, .. } => {
                assert_eq!(blocked, vec!["m".to_string(), "u".to_string()]);
            }
            other => panic!("Expected failure, got {:?}", other),
        }
        assert_eq!(h.store.node("r").unwrap().status, NodeStatus::Error);
        assert_eq!(h.store.node("u").unwrap().status, NodeStatus::Blocked);
        assert_eq!(h.ledger.balance(), 10);
    }
}
