//! Pre-flight planning
//!
//! A plan answers, without touching the graph, what running a target would
//! do: which nodes are in its upstream closure, which of them are stale,
//! in what levels the stale ones would execute and what that costs.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::cache_key::{fingerprint, upstream_token};
use crate::error::{PipelineError, Result};
use crate::graph::{detect_cycle, resolve_upstream, topological_levels};
use crate::types::{NodeId, NodeStatus, NodeType, PipelineEdge, PipelineNode};

/// Outcome of the pre-flight for one target
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPlan {
    pub target_id: NodeId,
    /// Upstream closure of the target (target included), sorted
    pub subgraph: Vec<NodeId>,
    /// Stale nodes that a run would execute, sorted
    pub pending: Vec<NodeId>,
    /// `pending` grouped into dependency levels
    pub levels: Vec<Vec<NodeId>>,
    /// Cache key each subgraph node holds once the run is over
    pub projected_keys: HashMap<NodeId, String>,
    /// Sum of the pending nodes' cost
    pub estimated_cost: u64,
    pub balance: u64,
    pub affordable: bool,
}

impl RunPlan {
    /// Nodes of the subgraph that a run would reuse
    pub fn fresh(&self) -> Vec<NodeId> {
        let pending: HashSet<&NodeId> = self.pending.iter().collect();
        self.subgraph
            .iter()
            .filter(|id| !pending.contains(id))
            .cloned()
            .collect()
    }

    /// Whether running the target would execute anything
    pub fn is_up_to_date(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Whether a node's stored result can be reused under `key`
///
/// Sources are captured outside the engine, so any stored capture counts.
fn is_fresh(node: &PipelineNode, key: &str) -> bool {
    if node.node_type == NodeType::Source && node.result.is_some() {
        return true;
    }
    node.status == NodeStatus::Done && node.stored_cache_key() == Some(key)
}

/// Build the plan for running `target_id` against `balance`.
///
/// Fails with `NodeNotFound` for an unknown target and `CyclicGraph` when
/// the upstream closure contains a cycle.
pub fn plan_run(
    target_id: &str,
    nodes: &[PipelineNode],
    edges: &[PipelineEdge],
    balance: u64,
) -> Result<RunPlan> {
    if !nodes.iter().any(|n| n.id == target_id) {
        return Err(PipelineError::NodeNotFound(target_id.to_string()));
    }

    let mut subgraph = resolve_upstream(target_id, edges);
    if detect_cycle(&subgraph, edges) {
        return Err(PipelineError::CyclicGraph {
            target: target_id.to_string(),
        });
    }

    let by_id: HashMap<&str, &PipelineNode> = nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    subgraph.retain(|id| {
        let known = by_id.contains_key(id.as_str());
        if !known {
            log::warn!("Edge references unknown node '{}'; ignoring it", id);
        }
        known
    });

    // Walk in dependency order so a stale upstream's new key reaches its
    // downstream before that one is judged.
    let mut projected_keys = HashMap::new();
    let mut overrides: HashMap<NodeId, String> = HashMap::new();
    let mut pending = HashSet::new();
    for id in topological_levels(&subgraph, edges).into_iter().flatten() {
        let Some(node) = by_id.get(id.as_str()) else {
            continue;
        };
        let token = upstream_token(node, nodes, edges, &overrides);
        let key = fingerprint(node.node_type, &node.params, &token);

        if is_fresh(node, &key) {
            if let Some(stored) = node.stored_cache_key() {
                projected_keys.insert(id.clone(), stored.to_string());
            }
        } else {
            overrides.insert(id.clone(), key.clone());
            projected_keys.insert(id.clone(), key);
            pending.insert(id.clone());
        }
    }

    let estimated_cost: u64 = pending
        .iter()
        .filter_map(|id| by_id.get(id.as_str()))
        .map(|n| u64::from(n.cost))
        .sum();
    let levels = topological_levels(&pending, edges);

    let mut subgraph: Vec<NodeId> = subgraph.into_iter().collect();
    subgraph.sort_unstable();
    let mut pending: Vec<NodeId> = pending.into_iter().collect();
    pending.sort_unstable();

    log::debug!(
        "Plan for '{}': {} of {} node(s) pending in {} level(s), cost {}",
        target_id,
        pending.len(),
        subgraph.len(),
        levels.len(),
        estimated_cost
    );

    Ok(RunPlan {
        target_id: target_id.to_string(),
        subgraph,
        pending,
        levels,
        projected_keys,
        estimated_cost,
        balance,
        affordable: estimated_cost <= balance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache_key::compute_cache_key;
    use crate::types::{ports, NodeResult};
    use serde_json::json;

    fn feed(from: &str, to: &str) -> PipelineEdge {
        PipelineEdge::new(format!("{from}-{to}"), from, ports::OUTPUT, to, ports::IMAGE)
    }

    fn source_with_capture(id: &str) -> PipelineNode {
        let mut node = PipelineNode::new(id, NodeType::Source);
        node.result = Some(NodeResult::image("img://capture"));
        node
    }

    /// Mark `node` done with the key it would stamp now
    fn settle(nodes: &mut [PipelineNode], edges: &[PipelineEdge], id: &str) {
        let idx = nodes.iter().position(|n| n.id == id).unwrap();
        let key = compute_cache_key(&nodes[idx], nodes, edges);
        let mut result = NodeResult::image(format!("img://{id}"));
        result.cache_key = key;
        nodes[idx].result = Some(result);
        nodes[idx].status = NodeStatus::Done;
    }

    fn s_r_u() -> (Vec<PipelineNode>, Vec<PipelineEdge>) {
        let nodes = vec![
            source_with_capture("s"),
            PipelineNode::new("r", NodeType::Render).with_params(json!({"engine": "main", "prompt": "p"})),
            PipelineNode::new("u", NodeType::Upscale).with_params(json!({"scale": 2})),
        ];
        (nodes, vec![feed("s", "r"), feed("r", "u")])
    }

    #[test]
    fn test_fresh_graph_plans_everything_but_capture() {
        let (nodes, edges) = s_r_u();
        let plan = plan_run("u", &nodes, &edges, 10).unwrap();

        assert_eq!(plan.subgraph, vec!["r", "s", "u"]);
        assert_eq!(plan.pending, vec!["r", "u"]);
        assert_eq!(plan.levels, vec![vec!["r".to_string()], vec!["u".to_string()]]);
        assert_eq!(plan.estimated_cost, 3);
        assert!(plan.affordable);
        assert_eq!(plan.fresh(), vec!["s"]);
    }

    #[test]
    fn test_settled_graph_is_up_to_date() {
        let (mut nodes, edges) = s_r_u();
        settle(&mut nodes, &edges, "r");
        settle(&mut nodes, &edges, "u");

        let plan = plan_run("u", &nodes, &edges, 0).unwrap();
        assert!(plan.is_up_to_date());
        assert_eq!(plan.estimated_cost, 0);
        assert!(plan.affordable);
    }

    #[test]
    fn test_param_change_makes_downstream_stale() {
        let (mut nodes, edges) = s_r_u();
        settle(&mut nodes, &edges, "r");
        settle(&mut nodes, &edges, "u");
        nodes[1].params = json!({"engine": "main", "prompt": "q"});

        let plan = plan_run("u", &nodes, &edges, 10).unwrap();
        assert_eq!(plan.pending, vec!["r", "u"]);
        assert_eq!(plan.estimated_cost, 3);

        // projected key of u is derived from r's new key
        let r_key = &plan.projected_keys["r"];
        let expected_u = fingerprint(NodeType::Upscale, &nodes[2].params, r_key);
        assert_eq!(plan.projected_keys["u"], expected_u);
    }

    #[test]
    fn test_failed_node_is_stale() {
        let (mut nodes, edges) = s_r_u();
        settle(&mut nodes, &edges, "r");
        nodes[1].status = NodeStatus::Error;

        let plan = plan_run("r", &nodes, &edges, 10).unwrap();
        assert_eq!(plan.pending, vec!["r"]);
    }

    #[test]
    fn test_unaffordable_plan() {
        let (nodes, edges) = s_r_u();
        let plan = plan_run("u", &nodes, &edges, 2).unwrap();
        assert!(!plan.affordable);
        assert_eq!(plan.balance, 2);
    }

    #[test]
    fn test_unknown_target_and_cycle() {
        let (nodes, edges) = s_r_u();
        assert!(matches!(
            plan_run("nope", &nodes, &edges, 10),
            Err(PipelineError::NodeNotFound(_))
        ));

        let nodes = vec![
            PipelineNode::new("a", NodeType::Render),
            PipelineNode::new("b", NodeType::Render),
        ];
        let edges = vec![feed("a", "b"), feed("b", "a")];
        assert!(matches!(
            plan_run("b", &nodes, &edges, 10),
            Err(PipelineError::CyclicGraph { .. })
        ));
    }

    #[test]
    fn test_dangling_upstream_is_ignored() {
        let nodes = vec![PipelineNode::new("r", NodeType::Render)];
        let edges = vec![feed("ghost", "r")];
        let plan = plan_run("r", &nodes, &edges, 10).unwrap();
        assert_eq!(plan.subgraph, vec!["r"]);
        assert_eq!(plan.pending, vec!["r"]);
    }
}
