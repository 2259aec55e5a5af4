//! Graph algorithms used to plan a pipeline run
//!
//! Everything here is pure: functions take the edge list (and optionally a
//! node id set to restrict to) and never touch node state.
//!
//! - [`resolve_upstream`]: dependency closure of a target (BFS, backward)
//! - [`detect_cycle`]: back-edge search (iterative DFS)
//! - [`topological_levels`]: Kahn's algorithm grouped into levels
//! - [`descendants`]: everything downstream of a node (BFS, forward)

use std::collections::{HashMap, HashSet, VecDeque};

use crate::types::{NodeId, PipelineEdge};

/// Compute the set of nodes the target transitively depends on, inclusive
/// of the target itself.
pub fn resolve_upstream(target_id: &str, edges: &[PipelineEdge]) -> HashSet<NodeId> {
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();

    visited.insert(target_id.to_string());
    queue.push_back(target_id);

    while let Some(node_id) = queue.pop_front() {
        for edge in edges.iter().filter(|e| e.to == node_id) {
            if visited.insert(edge.from.clone()) {
                queue.push_back(&edge.from);
            }
        }
    }

    visited
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    OnStack,
    Finished,
}

/// Successor lists restricted to edges with both endpoints in `node_ids`
fn internal_adjacency<'a>(
    node_ids: &HashSet<NodeId>,
    edges: &'a [PipelineEdge],
) -> HashMap<&'a str, Vec<&'a str>> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        if node_ids.contains(edge.from.as_str()) && node_ids.contains(edge.to.as_str()) {
            adjacency
                .entry(edge.from.as_str())
                .or_default()
                .push(edge.to.as_str());
        }
    }
    adjacency
}

/// Check whether the edges internal to `node_ids` contain a cycle.
///
/// Every node of the set is used as a DFS root if it has not been reached
/// yet, so disconnected sets are fully covered. Returns on the first
/// back-edge found.
pub fn detect_cycle(node_ids: &HashSet<NodeId>, edges: &[PipelineEdge]) -> bool {
    let adjacency = internal_adjacency(node_ids, edges);
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    for start in node_ids {
        if marks.contains_key(start.as_str()) {
            continue;
        }

        // (node, index of the next successor to visit)
        let mut stack: Vec<(&str, usize)> = vec![(start.as_str(), 0)];
        marks.insert(start.as_str(), Mark::OnStack);

        while let Some(&(node, next)) = stack.last() {
            let successors = adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]);

            match successors.get(next) {
                Some(&succ) => {
                    if let Some(top) = stack.last_mut() {
                        top.1 += 1;
                    }
                    match marks.get(succ) {
                        Some(Mark::OnStack) => return true,
                        Some(Mark::Finished) => {}
                        None => {
                            marks.insert(succ, Mark::OnStack);
                            stack.push((succ, 0));
                        }
                    }
                }
                None => {
                    marks.insert(node, Mark::Finished);
                    stack.pop();
                }
            }
        }
    }

    false
}

/// Group `node_ids` into dependency levels using Kahn's algorithm.
///
/// Only edges internal to the set count. Level 0 holds every node without
/// an internal dependency; each following level holds the nodes whose last
/// dependency sits in the level before it. Ids within a level are sorted.
///
/// The input must be acyclic: nodes on a cycle never reach in-degree zero
/// and are silently left out.
pub fn topological_levels(node_ids: &HashSet<NodeId>, edges: &[PipelineEdge]) -> Vec<Vec<NodeId>> {
    let adjacency = internal_adjacency(node_ids, edges);

    let mut in_degree: HashMap<&str, usize> =
        node_ids.iter().map(|id| (id.as_str(), 0)).collect();
    for successors in adjacency.values() {
        for succ in successors {
            if let Some(deg) = in_degree.get_mut(succ) {
                *deg += 1;
            }
        }
    }

    let mut current: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    current.sort_unstable();

    let mut levels = Vec::new();
    while !current.is_empty() {
        let mut next: Vec<&str> = Vec::new();
        for node in &current {
            for succ in adjacency.get(node).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(deg) = in_degree.get_mut(succ) {
                    *deg -= 1;
                    if *deg == 0 {
                        next.push(*succ);
                    }
                }
            }
        }
        next.sort_unstable();

        levels.push(current.iter().map(|id| id.to_string()).collect());
        current = next;
    }

    levels
}

/// Every node reachable downstream of `node_id` over the full edge list,
/// excluding `node_id` itself, in breadth-first order.
pub fn descendants(node_id: &str, edges: &[PipelineEdge]) -> Vec<NodeId> {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    let mut found = Vec::new();

    visited.insert(node_id);
    queue.push_back(node_id);

    while let Some(current) = queue.pop_front() {
        for edge in edges.iter().filter(|e| e.from == current) {
            if visited.insert(edge.to.as_str()) {
                found.push(edge.to.clone());
                queue.push_back(&edge.to);
            }
        }
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ports;

    fn edge(id: &str, from: &str, to: &str) -> PipelineEdge {
        PipelineEdge::new(id, from, ports::OUTPUT, to, ports::IMAGE)
    }

    fn ids(list: &[&str]) -> HashSet<NodeId> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_upstream_includes_target_and_ancestors() {
        // a -> b -> d, c -> d, x -> y (unrelated)
        let edges = vec![
            edge("e1", "a", "b"),
            edge("e2", "b", "d"),
            edge("e3", "c", "d"),
            edge("e4", "x", "y"),
        ];

        assert_eq!(resolve_upstream("d", &edges), ids(&["a", "b", "c", "d"]));
        assert_eq!(resolve_upstream("b", &edges), ids(&["a", "b"]));
        assert_eq!(resolve_upstream("a", &edges), ids(&["a"]));
    }

    #[test]
    fn test_resolve_upstream_shared_ancestor_visited_once() {
        // diamond: s -> l, s -> r, l -> t, r -> t
        let edges = vec![
            edge("e1", "s", "l"),
            edge("e2", "s", "r"),
            edge("e3", "l", "t"),
            edge("e4", "r", "t"),
        ];
        assert_eq!(resolve_upstream("t", &edges), ids(&["s", "l", "r", "t"]));
    }

    #[test]
    fn test_detect_two_node_cycle() {
        let edges = vec![edge("e1", "a", "b"), edge("e2", "b", "a")];
        assert!(detect_cycle(&ids(&["a", "b"]), &edges));
    }

    #[test]
    fn test_detect_self_loop() {
        let edges = vec![edge("e1", "a", "a")];
        assert!(detect_cycle(&ids(&["a"]), &edges));
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let edges = vec![
            edge("e1", "s", "l"),
            edge("e2", "s", "r"),
            edge("e3", "l", "t"),
            edge("e4", "r", "t"),
        ];
        assert!(!detect_cycle(&ids(&["s", "l", "r", "t"]), &edges));
    }

    #[test]
    fn test_cycle_outside_the_set_is_ignored() {
        let edges = vec![
            edge("e1", "a", "b"),
            edge("e2", "b", "c"),
            edge("e3", "c", "b"),
        ];
        assert!(!detect_cycle(&ids(&["a", "b"]), &edges));
        assert!(detect_cycle(&ids(&["b", "c"]), &edges));
    }

    #[test]
    fn test_cycle_in_disconnected_component() {
        let edges = vec![
            edge("e1", "a", "b"),
            edge("e2", "x", "y"),
            edge("e3", "y", "z"),
            edge("e4", "z", "x"),
        ];
        assert!(detect_cycle(&ids(&["a", "b", "x", "y", "z"]), &edges));
    }

    #[test]
    fn test_long_chain_does_not_overflow() {
        let n = 50_000;
        let edges: Vec<PipelineEdge> = (0..n)
            .map(|i| edge(&format!("e{i}"), &format!("n{i}"), &format!("n{}", i + 1)))
            .collect();
        let set: HashSet<NodeId> = (0..=n).map(|i| format!("n{i}")).collect();

        assert!(!detect_cycle(&set, &edges));
        assert_eq!(topological_levels(&set, &edges).len(), n + 1);
    }

    #[test]
    fn test_topological_levels_diamond() {
        let edges = vec![
            edge("e1", "s", "l"),
            edge("e2", "s", "r"),
            edge("e3", "l", "t"),
            edge("e4", "r", "t"),
        ];
        let levels = topological_levels(&ids(&["s", "l", "r", "t"]), &edges);
        assert_eq!(
            levels,
            vec![
                vec!["s".to_string()],
                vec!["l".to_string(), "r".to_string()],
                vec!["t".to_string()],
            ]
        );
    }

    #[test]
    fn test_topological_levels_ignore_external_edges() {
        // "done" is outside the set, so "b" has no internal dependency
        let edges = vec![edge("e1", "done", "b"), edge("e2", "b", "c")];
        let levels = topological_levels(&ids(&["b", "c"]), &edges);
        assert_eq!(levels, vec![vec!["b".to_string()], vec!["c".to_string()]]);
    }

    #[test]
    fn test_topological_levels_respect_every_edge() {
        let edges = vec![
            edge("e1", "a", "c"),
            edge("e2", "b", "c"),
            edge("e3", "a", "d"),
            edge("e4", "c", "d"),
            edge("e5", "d", "e"),
        ];
        let set = ids(&["a", "b", "c", "d", "e"]);
        let levels = topological_levels(&set, &edges);

        let level_of: HashMap<&str, usize> = levels
            .iter()
            .enumerate()
            .flat_map(|(i, level)| level.iter().map(move |id| (id.as_str(), i)))
            .collect();
        assert_eq!(level_of.len(), set.len());
        for e in &edges {
            assert!(level_of[e.from.as_str()] < level_of[e.to.as_str()], "edge {}", e.id);
        }
    }

    #[test]
    fn test_descendants_walks_full_graph_once() {
        // r -> m -> u, r -> v, m -> v
        let edges = vec![
            edge("e1", "r", "m"),
            edge("e2", "m", "u"),
            edge("e3", "r", "v"),
            edge("e4", "m", "v"),
        ];
        let found = descendants("r", &edges);
        assert_eq!(found.len(), 3);
        assert_eq!(found.iter().collect::<HashSet<_>>().len(), 3);
        assert!(!found.contains(&"r".to_string()));
        assert!(descendants("u", &edges).is_empty());
    }
}
