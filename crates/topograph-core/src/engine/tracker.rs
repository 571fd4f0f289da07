//! Trace reduction.
//!
//! A traced subgraph becomes a forest of track nodes (parent links via
//! `p_id`), each carrying its real and virtual links. [`Tracker::get_trace`]
//! walks the forest per squash level:
//!
//! - `Full`: top-level nodes with all their links.
//! - `Local`: non-global nodes disappear; their links are promoted to the
//!   nearest globally-unique ancestor.
//! - `None`/`Straight`: the whole hierarchy, virtual links only at leaves.
//! - `Graph`: the whole hierarchy, topology untouched.
//!
//! Grouping vertices never appear themselves: their children's parent links
//! are redirected past them. The tree is arena-allocated; parents and
//! children are indices.

use std::collections::HashMap;

use topograph_model::{ConnectionKind, Doc, MoEdge, MoNode, SquashLevel, TmoNode};

use super::TraceResponse;

struct TrackNode {
    node: usize,
    is_global: bool,
    is_grouping: bool,
    parent_link: Option<usize>,
    parent: Option<usize>,
    real_links: Vec<usize>,
    virtual_links: Vec<usize>,
    children: Vec<usize>,
}

/// Arena-backed track forest over one traced subgraph.
pub struct Tracker {
    nodes: Vec<Doc<MoNode>>,
    edges: Vec<Doc<MoEdge>>,
    arena: Vec<TrackNode>,
    by_node_id: HashMap<String, usize>,
    top_level: Vec<usize>,
}

impl Tracker {
    /// Builds the forest. With `expand_lonely_node`, a single non-line
    /// top-level vertex is peeled off and the forest rebuilt without it
    /// (the neighborhood query's anchor shadows the interesting topology).
    pub fn new(
        nodes: Vec<Doc<MoNode>>,
        edges: Vec<Doc<MoEdge>>,
        tmos: &[Doc<TmoNode>],
        expand_lonely_node: bool,
    ) -> Self {
        let globals: HashMap<i64, bool> = tmos
            .iter()
            .map(|t| (t.body.tmo_id, t.body.global_uniqueness))
            .collect();
        let lines: HashMap<i64, bool> = tmos
            .iter()
            .map(|t| (t.body.tmo_id, t.body.is_line()))
            .collect();

        let mut nodes = nodes;
        let mut edges = edges;
        loop {
            let tracker = Self::build(&nodes, &edges, &globals);
            if !expand_lonely_node {
                return Self::assemble(nodes, edges, tracker);
            }
            let top_level_not_line: Vec<usize> = tracker
                .2
                .iter()
                .filter(|idx| {
                    let node = &nodes[tracker.0[**idx].node];
                    !lines.get(&node.body.tmo).copied().unwrap_or(false)
                })
                .copied()
                .collect();
            if top_level_not_line.len() != 1 {
                return Self::assemble(nodes, edges, tracker);
            }
            let lonely_id = nodes[tracker.0[top_level_not_line[0]].node].id.clone();
            let next_nodes: Vec<Doc<MoNode>> = nodes
                .iter()
                .filter(|n| n.id != lonely_id)
                .cloned()
                .collect();
            let next_edges: Vec<Doc<MoEdge>> = edges
                .iter()
                .filter(|e| e.body.from != lonely_id && e.body.to != lonely_id)
                .cloned()
                .collect();
            if next_nodes.is_empty() {
                return Self::assemble(nodes, edges, tracker);
            }
            nodes = next_nodes;
            edges = next_edges;
        }
    }

    #[allow(clippy::type_complexity)]
    fn build(
        nodes: &[Doc<MoNode>],
        edges: &[Doc<MoEdge>],
        globals: &HashMap<i64, bool>,
    ) -> (Vec<TrackNode>, HashMap<String, usize>, Vec<usize>) {
        let mut arena: Vec<TrackNode> = Vec::with_capacity(nodes.len());
        let mut by_node_id: HashMap<String, usize> = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            by_node_id.insert(node.id.clone(), i);
            arena.push(TrackNode {
                node: i,
                is_global: globals.get(&node.body.tmo).copied().unwrap_or(false),
                is_grouping: node.body.is_grouping(),
                parent_link: None,
                parent: None,
                real_links: Vec::new(),
                virtual_links: Vec::new(),
                children: Vec::new(),
            });
        }
        for (edge_idx, edge) in edges.iter().enumerate() {
            let Some(&from) = by_node_id.get(&edge.body.from) else {
                continue;
            };
            if edge.body.connection_type == ConnectionKind::PId {
                arena[from].parent_link = Some(edge_idx);
                if let Some(&to) = by_node_id.get(&edge.body.to) {
                    arena[from].parent = Some(to);
                    arena[to].children.push(from);
                }
            } else if edge.body.is_virtual {
                arena[from].virtual_links.push(edge_idx);
            } else {
                arena[from].real_links.push(edge_idx);
            }
        }
        let top_level: Vec<usize> = arena
            .iter()
            .enumerate()
            .filter(|(_, n)| n.parent.is_none())
            .map(|(i, _)| i)
            .collect();
        (arena, by_node_id, top_level)
    }

    fn assemble(
        nodes: Vec<Doc<MoNode>>,
        edges: Vec<Doc<MoEdge>>,
        parts: (Vec<TrackNode>, HashMap<String, usize>, Vec<usize>),
    ) -> Self {
        Tracker {
            nodes,
            edges,
            arena: parts.0,
            by_node_id: parts.1,
            top_level: parts.2,
        }
    }

    /// Reduces the forest according to the squash level.
    #[must_use]
    pub fn get_trace(&self, level: SquashLevel) -> TraceResponse {
        let mut result = TraceResponse::default();
        for &top in &self.top_level {
            if let Some(response) = self.trace_node(top, level) {
                result.extend(response);
            }
        }
        if level != SquashLevel::Graph {
            result.drop_orphan_edges();
        }
        result
    }

    fn self_trace(&self, idx: usize) -> TraceResponse {
        let track = &self.arena[idx];
        let mut response = TraceResponse::default();
        response.nodes.push(self.nodes[track.node].clone());
        for &edge in &track.real_links {
            response.edges.push(self.edges[edge].clone());
        }
        if let Some(parent_link) = track.parent_link {
            response.edges.push(self.edges[parent_link].clone());
        }
        response
    }

    /// The node itself when globally unique, otherwise the nearest global
    /// ancestor (or the hierarchy root).
    fn nearest_global_id(&self, idx: usize) -> &str {
        let mut current = idx;
        loop {
            let track = &self.arena[current];
            if track.is_global {
                return &self.nodes[track.node].id;
            }
            match track.parent {
                Some(parent) => current = parent,
                None => return &self.nodes[track.node].id,
            }
        }
    }

    /// Promotes a hidden subtree's links to its nearest global ancestor:
    /// every link of the node and its descendants becomes a virtual copy
    /// `(global ancestor of self, global ancestor of target)`.
    fn promoted_links(&self, idx: usize) -> Vec<Doc<MoEdge>> {
        let anchor = self.nearest_global_id(idx).to_string();
        let mut promoted = Vec::new();
        let mut queue = vec![idx];
        while let Some(current) = queue.pop() {
            let track = &self.arena[current];
            queue.extend(track.children.iter().copied());
            for &edge_idx in track.real_links.iter().chain(track.virtual_links.iter()) {
                let edge = &self.edges[edge_idx];
                let Some(&target) = self.by_node_id.get(&edge.body.to) else {
                    continue;
                };
                let target_global = self.nearest_global_id(target).to_string();
                if target_global == anchor {
                    continue;
                }
                let mut copy = edge.clone();
                copy.body.is_virtual = true;
                copy.body.from = anchor.clone();
                copy.body.to = target_global;
                promoted.push(copy);
            }
        }
        promoted
    }

    fn trace_node(&self, idx: usize, level: SquashLevel) -> Option<TraceResponse> {
        let track = &self.arena[idx];
        if track.is_grouping {
            return self.trace_grouping_node(idx, level);
        }
        let mut result = match level {
            SquashLevel::Full => {
                let mut result = self.self_trace(idx);
                for &edge in &track.virtual_links {
                    result.edges.push(self.edges[edge].clone());
                }
                result
            }
            SquashLevel::Local => {
                if !track.is_global {
                    return Some(TraceResponse {
                        nodes: Vec::new(),
                        edges: self.promoted_links(idx),
                    });
                }
                let mut result = self.self_trace(idx);
                for &child in &track.children {
                    let Some(child_response) = self.trace_node(child, level) else {
                        continue;
                    };
                    if !child_response.nodes.is_empty() {
                        result.extend(child_response);
                        continue;
                    }
                    // Hidden subtree: prefer the spread's own virtual links
                    // for its targets, keep the promoted copies otherwise.
                    let mut matched: std::collections::HashSet<String> =
                        std::collections::HashSet::new();
                    let targets: std::collections::HashSet<&str> = child_response
                        .edges
                        .iter()
                        .map(|e| e.body.to.as_str())
                        .collect();
                    for &edge_idx in &track.virtual_links {
                        let edge = &self.edges[edge_idx];
                        if targets.contains(edge.body.to.as_str()) {
                            matched.insert(edge.body.to.clone());
                            result.edges.push(edge.clone());
                        }
                    }
                    for promoted in child_response.edges {
                        if !matched.contains(&promoted.body.to) {
                            result.edges.push(promoted);
                        }
                    }
                }
                result
            }
            SquashLevel::None | SquashLevel::Straight => {
                let mut result = self.self_trace(idx);
                for &child in &track.children {
                    if let Some(child_response) = self.trace_node(child, level) {
                        result.extend(child_response);
                    }
                }
                if track.children.is_empty() {
                    for &edge in &track.virtual_links {
                        result.edges.push(self.edges[edge].clone());
                    }
                }
                result
            }
            SquashLevel::Graph => {
                let mut result = self.self_trace(idx);
                for &child in &track.children {
                    if let Some(child_response) = self.trace_node(child, level) {
                        result.extend(child_response);
                    }
                }
                result
            }
        };
        result.dedup_edges();
        Some(result)
    }

    /// Grouping vertices are skipped: child responses pass through with
    /// parent links redirected past the grouping level.
    fn trace_grouping_node(&self, idx: usize, level: SquashLevel) -> Option<TraceResponse> {
        let track = &self.arena[idx];
        let own_id = &self.nodes[track.node].id;
        let mut merged = TraceResponse::default();
        for &child in &track.children {
            let Some(mut child_response) = self.trace_node(child, level) else {
                continue;
            };
            match track.parent {
                Some(parent) => {
                    let parent_id = &self.nodes[self.arena[parent].node].id;
                    for edge in &mut child_response.edges {
                        if edge.body.to == *own_id {
                            edge.body.to = parent_id.clone();
                        }
                    }
                }
                None => {
                    child_response.edges.retain(|e| e.body.to != *own_id);
                }
            }
            merged.extend(child_response);
        }
        if merged.nodes.is_empty() && merged.edges.is_empty() {
            return None;
        }
        Some(merged)
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn mo_node(id: &str, tmo: i64, grouping: bool) -> Doc<MoNode> {
        Doc {
            id: format!("main/{id}"),
            key: id.to_string(),
            rev: "1".into(),
            body: MoNode {
                grouped_by_tprm: grouping.then_some(11),
                group_p_id: None,
                name: id.to_string(),
                label: None,
                tmo,
                mo_ids: vec![1],
                is_trace: false,
                data: None,
                indexed: None,
                breadcrumbs: "/".into(),
            },
        }
    }

    fn edge(key: &str, from: &str, to: &str, kind: ConnectionKind, virt: bool) -> Doc<MoEdge> {
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
                is_virtual: virt,
                source_id: None,
            },
        }
    }

    fn tmo(tmo_id: i64, global: bool) -> Doc<TmoNode> {
        Doc {
            id: format!("tmo/{tmo_id}"),
            key: tmo_id.to_string(),
            rev: "1".into(),
            body: TmoNode {
                tmo_id,
                p_id: None,
                name: format!("tmo-{tmo_id}"),
                enabled: true,
                global_uniqueness: global,
                is_virtual: false,
                materialize: true,
                icon: None,
                description: None,
                geometry_type: None,
                line_type: None,
                minimize: false,
                label: vec![],
                points_constraint_by_tmo: vec![],
                params: vec![],
                commutation_tprms: None,
                show_as_a_table: true,
                busy_parameter_groups: vec![],
            },
        }
    }

    /// root(global) -> mid(non-global) -> leaf(non-global); leaf has a
    /// virtual link to svc.
    fn fixture() -> (Vec<Doc<MoNode>>, Vec<Doc<MoEdge>>, Vec<Doc<TmoNode>>) {
        let nodes = vec![
            mo_node("root", 1, false),
            mo_node("mid", 2, false),
            mo_node("leaf", 2, false),
            mo_node("svc", 3, false),
        ];
        let edges = vec![
            edge("e1", "mid", "root", ConnectionKind::PId, false),
            edge("e2", "leaf", "mid", ConnectionKind::PId, false),
            edge("e3", "leaf", "svc", ConnectionKind::MoLink, true),
        ];
        let tmos = vec![tmo(1, true), tmo(2, false), tmo(3, true)];
        (nodes, edges, tmos)
    }

    #[test]
    fn graph_level_keeps_hierarchy() {
        let (nodes, edges, tmos) = fixture();
        let tracker = Tracker::new(nodes, edges, &tmos, false);
        let trace = tracker.get_trace(SquashLevel::Graph);
        // svc + root subtree, all p_id edges intact
        assert_eq!(trace.nodes.len(), 4);
        assert_eq!(trace.edges.len(), 2); // both p_id edges; virtual not at leaf level for Graph
    }

    #[test]
    fn none_level_attaches_virtuals_at_leaves() {
        let (nodes, edges, tmos) = fixture();
        let tracker = Tracker::new(nodes, edges, &tmos, false);
        let trace = tracker.get_trace(SquashLevel::None);
        assert!(trace
            .edges
            .iter()
            .any(|e| e.body.connection_type == ConnectionKind::MoLink));
    }

    #[test]
    fn local_level_promotes_non_global_links() {
        let (nodes, edges, tmos) = fixture();
        let tracker = Tracker::new(nodes, edges, &tmos, false);
        let trace = tracker.get_trace(SquashLevel::Local);
        // only the global nodes remain
        let kept: Vec<&str> = trace.nodes.iter().map(|n| n.key.as_str()).collect();
        assert!(kept.contains(&"root"));
        assert!(kept.contains(&"svc"));
        assert!(!kept.contains(&"mid"));
        assert!(!kept.contains(&"leaf"));
        // the leaf's virtual link surfaced on root, pointing at svc
        assert!(trace
            .edges
            .iter()
            .any(|e| e.body.from == "main/root" && e.body.to == "main/svc"));
    }

    #[test]
    fn grouping_nodes_are_bypassed() {
        let nodes = vec![
            mo_node("root", 1, false),
            mo_node("grp", 2, true),
            mo_node("leaf", 2, false),
        ];
        let edges = vec![
            edge("e1", "grp", "root", ConnectionKind::PId, false),
            edge("e2", "leaf", "grp", ConnectionKind::PId, false),
        ];
        let tmos = vec![tmo(1, true), tmo(2, false)];
        let tracker = Tracker::new(nodes, edges, &tmos, false);
        let trace = tracker.get_trace(SquashLevel::Graph);
        let kept: Vec<&str> = trace.nodes.iter().map(|n| n.key.as_str()).collect();
        assert!(!kept.contains(&"grp"));
        // leaf's parent edge now points at root
        let leaf_parent = trace
            .edges
            .iter()
            .find(|e| e.body.from == "main/leaf")
            .unwrap();
        assert_eq!(leaf_parent.body.to, "main/root");
    }

    #[test]
    fn full_level_reports_top_level_only() {
        let (nodes, edges, tmos) = fixture();
        let tracker = Tracker::new(nodes, edges, &tmos, false);
        let trace = tracker.get_trace(SquashLevel::Full);
        let kept: Vec<&str> = trace.nodes.iter().map(|n| n.key.as_str()).collect();
        assert!(kept.contains(&"root"));
        assert!(kept.contains(&"svc"));
        assert!(!kept.contains(&"leaf"));
    }

    #[test]
    fn lonely_anchor_is_peeled_off() {
        // anchor -- two peers under it; expand_lonely_node drops the anchor
        let nodes = vec![
            mo_node("anchor", 1, false),
            mo_node("a", 2, false),
            mo_node("b", 2, false),
        ];
        let edges = vec![
            edge("e1", "a", "anchor", ConnectionKind::PId, false),
            edge("e2", "b", "anchor", ConnectionKind::PId, false),
            edge("e3", "a", "b", ConnectionKind::MoLink, false),
        ];
        let tmos = vec![tmo(1, true), tmo(2, false)];
        let tracker = Tracker::new(nodes, edges, &tmos, true);
        let trace = tracker.get_trace(SquashLevel::Graph);
        let kept: Vec<&str> = trace.nodes.iter().map(|n| n.key.as_str()).collect();
        assert!(!kept.contains(&"anchor"));
        assert!(kept.contains(&"a"));
        assert!(kept.contains(&"b"));
    }
}
