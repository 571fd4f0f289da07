//! Graph linearization.
//!
//! Turns a reduced trace into its longest-chain presentation: the traced
//! edges become chain nodes (parent/children via `p_id`, peer links
//! otherwise), the largest connected cluster of top-level trees is selected,
//! the tree with the most descendants seeds a chain extended greedily left
//! and right, and the chain is expanded back into concrete vertices and
//! edges in order.

use std::collections::{HashMap, HashSet};

use petgraph::unionfind::UnionFind;

use topograph_model::{ConnectionKind, Doc, MoEdge, MoNode};

use super::TraceResponse;

struct ChainNode {
    node: usize,
    /// Outgoing peer links: `(edge index, target chain node)`.
    links: Vec<(usize, usize)>,
    /// Incoming peer links mirrored for backward walks.
    inverted: Vec<(usize, usize)>,
    parent: Option<usize>,
    parent_edge: Option<usize>,
    children: Vec<usize>,
}

/// Arena of chain nodes over one trace.
pub struct SortedGraph {
    nodes: Vec<Doc<MoNode>>,
    edges: Vec<Doc<MoEdge>>,
    arena: Vec<ChainNode>,
    top_level: Vec<usize>,
    /// Shortest-path mode: the caller's node order is already the chain.
    is_shortest_path: bool,
}

impl SortedGraph {
    #[must_use]
    pub fn new(trace: TraceResponse, is_shortest_path: bool) -> Self {
        let TraceResponse { nodes, edges } = trace;
        let mut by_id: HashMap<String, usize> = HashMap::with_capacity(nodes.len());
        let mut arena: Vec<ChainNode> = Vec::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            by_id.insert(node.id.clone(), i);
            arena.push(ChainNode {
                node: i,
                links: Vec::new(),
                inverted: Vec::new(),
                parent: None,
                parent_edge: None,
                children: Vec::new(),
            });
        }
        for (edge_idx, edge) in edges.iter().enumerate() {
            let (Some(&from), Some(&to)) =
                (by_id.get(&edge.body.from), by_id.get(&edge.body.to))
            else {
                continue;
            };
            if edge.body.connection_type == ConnectionKind::PId {
                arena[from].parent = Some(to);
                arena[from].parent_edge = Some(edge_idx);
                arena[to].children.push(from);
            } else {
                arena[from].links.push((edge_idx, to));
                arena[to].inverted.push((edge_idx, from));
            }
        }
        let top_level: Vec<usize> = arena
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent.is_none())
            .map(|(i, _)| i)
            .collect();
        SortedGraph {
            nodes,
            edges,
            arena,
            top_level,
            is_shortest_path,
        }
    }

    /// Runs the linearization.
    #[must_use]
    pub fn execute(&self) -> TraceResponse {
        if self.nodes.is_empty() || self.edges.is_empty() {
            return TraceResponse::default();
        }
        let chain = if self.is_shortest_path {
            self.top_level.clone()
        } else {
            let cluster = self.largest_cluster();
            if cluster.is_empty() {
                return TraceResponse::default();
            }
            self.top_level_chain(&cluster)
        };
        self.expand_chain(&chain)
    }

    fn top_parent(&self, idx: usize) -> usize {
        let mut current = idx;
        while let Some(parent) = self.arena[current].parent {
            current = parent;
        }
        current
    }

    /// Top-level trees this tree links to, via any descendant's peer links.
    fn top_linked(&self, top: usize) -> Vec<usize> {
        let mut seen: HashSet<usize> = HashSet::new();
        let mut result = Vec::new();
        let mut queue = vec![top];
        while let Some(current) = queue.pop() {
            let chain_node = &self.arena[current];
            queue.extend(chain_node.children.iter().copied());
            for (_, target) in chain_node.links.iter().chain(chain_node.inverted.iter()) {
                let target_top = self.top_parent(*target);
                if target_top != top && seen.insert(target_top) {
                    result.push(target_top);
                }
            }
        }
        result
    }

    fn count_elements(&self, idx: usize) -> usize {
        1 + self.arena[idx]
            .children
            .iter()
            .map(|&child| self.count_elements(child))
            .sum::<usize>()
    }

    /// The largest cluster of top-level trees by member count, ties broken
    /// by total element count.
    fn largest_cluster(&self) -> Vec<usize> {
        if self.top_level.is_empty() {
            return Vec::new();
        }
        let positions: HashMap<usize, usize> = self
            .top_level
            .iter()
            .enumerate()
            .map(|(pos, &top)| (top, pos))
            .collect();
        let mut components = UnionFind::new(self.top_level.len());
        for &top in &self.top_level {
            for linked in self.top_linked(top) {
                if let (Some(&a), Some(&b)) = (positions.get(&top), positions.get(&linked)) {
                    components.union(a, b);
                }
            }
        }
        let mut clusters: HashMap<usize, Vec<usize>> = HashMap::new();
        for (pos, &top) in self.top_level.iter().enumerate() {
            clusters.entry(components.find(pos)).or_default().push(top);
        }
        clusters
            .into_values()
            .max_by_key(|cluster| {
                let elements: usize = cluster.iter().map(|&t| self.count_elements(t)).sum();
                (cluster.len(), elements)
            })
            .unwrap_or_default()
    }

    /// Longest walk over top-level trees starting at `idx`, never revisiting.
    fn longest_walk(&self, idx: usize, exclude: &mut HashSet<usize>) -> Vec<usize> {
        exclude.insert(idx);
        let mut best: Vec<usize> = Vec::new();
        for linked in self.top_linked(idx) {
            if exclude.contains(&linked) {
                continue;
            }
            let mut branch_exclude = exclude.clone();
            let walk = self.longest_walk(linked, &mut branch_exclude);
            if walk.len() > best.len() {
                best = walk;
            }
        }
        let mut result = vec![idx];
        result.extend(best);
        result
    }

    /// The presentation chain: the richest tree extended right, then left.
    fn top_level_chain(&self, cluster: &[usize]) -> Vec<usize> {
        let Some(&best) = cluster
            .iter()
            .max_by_key(|&&idx| self.count_elements(idx))
        else {
            return Vec::new();
        };
        let mut exclude = HashSet::new();
        let right = self.longest_walk(best, &mut exclude);
        let mut left_exclude: HashSet<usize> = right.iter().copied().collect();
        let left_full = self.longest_walk(best, &mut left_exclude);
        // left side excludes the seed and reverses toward it
        let mut chain: Vec<usize> = left_full[1..].iter().rev().copied().collect();
        chain.extend(right);
        chain
    }

    /// The way from somewhere inside `from`'s tree to a link that reaches
    /// `to_top`'s tree: deepest-first, longest child way wins. Returns the
    /// chain nodes bottom-up with the traversed edges.
    fn way_to(&self, from: usize, to_top: usize) -> Option<(Vec<usize>, Vec<usize>)> {
        let chain_node = &self.arena[from];
        let mut child_ways: Vec<(Vec<usize>, Vec<usize>)> = Vec::new();
        for &child in &chain_node.children {
            if let Some(way) = self.way_to(child, to_top) {
                child_ways.push(way);
            }
        }
        if child_ways.is_empty() {
            for (edge_idx, target) in chain_node.links.iter().chain(chain_node.inverted.iter()) {
                if self.top_parent(*target) == to_top {
                    let mut edges = vec![*edge_idx];
                    if let Some(parent_edge) = chain_node.parent_edge {
                        edges.push(parent_edge);
                    }
                    return Some((vec![from], edges));
                }
            }
            return None;
        }
        let mut best = child_ways
            .into_iter()
            .max_by_key(|(nodes, edges)| nodes.len() + edges.len())?;
        best.0.push(from);
        if let Some(parent_edge) = chain_node.parent_edge {
            best.1.push(parent_edge);
        }
        Some(best)
    }

    /// Expands consecutive chain trees into vertices and edges in order.
    fn expand_chain(&self, chain: &[usize]) -> TraceResponse {
        let mut result = TraceResponse::default();
        if chain.len() == 1 {
            // a single tree: emit it as is, children after parents
            let mut queue = vec![chain[0]];
            while let Some(current) = queue.pop() {
                result.nodes.push(self.nodes[self.arena[current].node].clone());
                if let Some(parent_edge) = self.arena[current].parent_edge {
                    result.edges.push(self.edges[parent_edge].clone());
                }
                queue.extend(self.arena[current].children.iter().copied());
            }
            return result;
        }
        for pair in chain.windows(2) {
            let (current, next) = (pair[0], pair[1]);
            let Some(left_way) = self.way_to(current, next) else {
                continue;
            };
            let left_anchor = left_way.0[0];
            let right_way = self
                .way_to(next, self.top_parent(left_anchor))
                .or_else(|| self.way_to(next, current));
            let Some(mut right_way) = right_way else { continue };
            let mut left_way = left_way;

            if !result.nodes.is_empty() {
                // the previous pair already emitted this tree's way
                left_way.0.pop();
                if !right_way.1.is_empty() {
                    right_way.1.remove(0);
                }
            }
            for &idx in left_way.0.iter().rev() {
                result.nodes.push(self.nodes[self.arena[idx].node].clone());
            }
            for &edge in left_way.1.iter().rev() {
                result.edges.push(self.edges[edge].clone());
            }
            for &idx in &right_way.0 {
                result.nodes.push(self.nodes[self.arena[idx].node].clone());
            }
            for &edge in &right_way.1 {
                result.edges.push(self.edges[edge].clone());
            }
        }
        result.dedup_edges();
        result
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mo_node(id: &str) -> Doc<MoNode> {
        Doc {
            id: format!("main/{id}"),
            key: id.to_string(),
            rev: "1".into(),
            body: MoNode {
                grouped_by_tprm: None,
                group_p_id: None,
                name: id.to_string(),
                label: None,
                tmo: 1,
                mo_ids: vec![1],
                is_trace: false,
                data: None,
                indexed: None,
                breadcrumbs: "/".into(),
            },
        }
    }

    fn edge(key: &str, from: &str, to: &str, kind: ConnectionKind) -> Doc<MoEdge> {
        Doc {
            id: format!("mainEdge/{key}"),
            key: key.to_string(),
            rev: "1".into(),
            body: MoEdge {
                from: format!("main/{from}"),
                to: format!("main/{to}"),
                connection_type: kind,
                prm: None,
                tprm: None,
                is_trace: false,
                is_virtual: false,
                source_id: None,
            },
        }
    }

    #[test]
    fn chain_of_three_peers_comes_out_in_order() {
        let trace = TraceResponse {
            nodes: vec![mo_node("a"), mo_node("b"), mo_node("c")],
            edges: vec![
                edge("e1", "a", "b", ConnectionKind::MoLink),
                edge("e2", "b", "c", ConnectionKind::MoLink),
            ],
        };
        let sorted = SortedGraph::new(trace, false).execute();
        let keys: Vec<&str> = sorted.nodes.iter().map(|n| n.key.as_str()).collect();
        // a chain across all three, in one of the two directions
        assert_eq!(keys.len(), 3);
        assert!(keys == vec!["a", "b", "c"] || keys == vec!["c", "b", "a"]);
        assert_eq!(sorted.edges.len(), 2);
    }

    #[test]
    fn disconnected_minor_cluster_is_dropped() {
        let trace = TraceResponse {
            nodes: vec![mo_node("a"), mo_node("b"), mo_node("x")],
            edges: vec![edge("e1", "a", "b", ConnectionKind::MoLink)],
        };
        let sorted = SortedGraph::new(trace, false).execute();
        let keys: Vec<&str> = sorted.nodes.iter().map(|n| n.key.as_str()).collect();
        assert!(!keys.contains(&"x"));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn empty_trace_is_empty() {
        let sorted = SortedGraph::new(TraceResponse::default(), false).execute();
        assert!(sorted.nodes.is_empty());
        assert!(sorted.edges.is_empty());
    }

    #[test]
    fn hierarchy_members_link_through_their_trees() {
        // two trees: (p1 -> c1), (p2 -> c2); c1 links to c2
        let trace = TraceResponse {
            nodes: vec![mo_node("p1"), mo_node("c1"), mo_node("p2"), mo_node("c2")],
            edges: vec![
                edge("e1", "c1", "p1", ConnectionKind::PId),
                edge("e2", "c2", "p2", ConnectionKind::PId),
                edge("e3", "c1", "c2", ConnectionKind::MoLink),
            ],
        };
        let sorted = SortedGraph::new(trace, false).execute();
        let keys: Vec<&str> = sorted.nodes.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys.len(), 4);
        // both child vertices and the cross link must be present
        assert!(keys.contains(&"c1") && keys.contains(&"c2"));
        assert!(sorted.edges.iter().any(|e| e.key == "e3"));
    }
}
