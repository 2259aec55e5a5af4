//! Cache keys for node results
//!
//! A node's cache key fingerprints everything that decides its output: its
//! type, its params and the state of the node feeding it. A stored result is
//! reusable exactly when its stamped key equals the key computed now.
//!
//! # Upstream token
//!
//! - no incoming edge: `"root"`
//! - upstream has no result yet: `"pending"` (always stale downstream)
//! - otherwise: the upstream result's stored `cache_key`
//!
//! Keys are a change-detection heuristic, not a security boundary, so a fast
//! 32-bit string hash rendered in base 36 is enough.

use std::collections::HashMap;

use serde_json::Value;

use crate::types::{first_incoming_edge, NodeId, NodeType, PipelineEdge, PipelineNode};

/// Token used for nodes without an upstream edge
pub const ROOT_TOKEN: &str = "root";

/// Token used when the upstream node has never produced a result
pub const PENDING_TOKEN: &str = "pending";

/// Compute the cache key of `node` against the graph's current stored state
pub fn compute_cache_key(node: &PipelineNode, all_nodes: &[PipelineNode], edges: &[PipelineEdge]) -> String {
    let token = upstream_token(node, all_nodes, edges, &HashMap::new());
    fingerprint(node.node_type, &node.params, &token)
}

/// Resolve the upstream token of `node`.
///
/// `projected` holds keys that upstream nodes are about to stamp (because
/// they are stale and will re-run); an entry there wins over the upstream's
/// stored key.
pub fn upstream_token(
    node: &PipelineNode,
    all_nodes: &[PipelineNode],
    edges: &[PipelineEdge],
    projected: &HashMap<NodeId, String>,
) -> String {
    let Some(edge) = first_incoming_edge(&node.id, edges) else {
        return ROOT_TOKEN.to_string();
    };

    if let Some(key) = projected.get(&edge.from) {
        return key.clone();
    }

    match all_nodes
        .iter()
        .find(|n| n.id == edge.from)
        .and_then(|n| n.result.as_ref())
    {
        Some(result) => result.cache_key.clone(),
        None => PENDING_TOKEN.to_string(),
    }
}

/// Hash `(type, sorted params, upstream token)` into a cache key
pub fn fingerprint(node_type: NodeType, params: &Value, upstream_token: &str) -> String {
    let tuple = Value::Array(vec![
        Value::String(node_type.as_str().to_string()),
        sorted_value(params),
        Value::String(upstream_token.to_string()),
    ]);
    to_base36(string_hash(&tuple.to_string()))
}

/// Rebuild objects with their keys in sorted order, recursively
fn sorted_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sorted_value(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted_value).collect()),
        other => other.clone(),
    }
}

/// 32-bit multiplicative string hash (`h * 31 + byte`, wrapping)
fn string_hash(input: &str) -> u32 {
    input.bytes().fold(0u32, |hash, byte| {
        hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(u32::from(byte))
    })
}

fn to_base36(mut value: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
