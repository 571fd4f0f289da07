//! Path and trace query engine.
//!
//! [`tracker`] reduces a traced subgraph according to a squash level,
//! [`chain`] linearizes a reduced graph into its longest presentation
//! chain, [`straight`] folds repeated vertex runs, [`paths`] answers
//! k-shortest-paths queries over the path graph, and [`trace`] assembles the
//! single-node and common-path reconstructions.

pub mod chain;
pub mod paths;
pub mod straight;
pub mod trace;
pub mod tracker;

use topograph_model::{Doc, MoEdge, MoNode, TmoNode};

/// A reduced subgraph handed back to callers.
#[derive(Debug, Clone, Default)]
pub struct TraceResponse {
    pub nodes: Vec<Doc<MoNode>>,
    pub edges: Vec<Doc<MoEdge>>,
}

impl TraceResponse {
    pub fn extend(&mut self, other: TraceResponse) {
        self.nodes.extend(other.nodes);
        self.edges.extend(other.edges);
    }

    /// Drops edges whose target fell out of the node set.
    pub fn drop_orphan_edges(&mut self) {
        let node_ids: std::collections::HashSet<&str> =
            self.nodes.iter().map(|n| n.id.as_str()).collect();
        self.edges.retain(|e| node_ids.contains(e.body.to.as_str()));
    }

    /// Deduplicates edges by document id, keeping first occurrences.
    pub fn dedup_edges(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.edges.retain(|e| seen.insert(e.id.clone()));
    }
}

/// A trace plus the TMO vertices its nodes reference.
#[derive(Debug, Clone, Default)]
pub struct TraceWithSchema {
    pub nodes: Vec<Doc<MoNode>>,
    pub edges: Vec<Doc<MoEdge>>,
    pub tmo: Vec<Doc<TmoNode>>,
}

/// A reconstructed path with its weight (edge count).
#[derive(Debug, Clone)]
pub struct PathResponse {
    pub nodes: Vec<Doc<MoNode>>,
    pub edges: Vec<Doc<MoEdge>>,
    pub tmo: Vec<Doc<TmoNode>>,
    pub length: usize,
}
