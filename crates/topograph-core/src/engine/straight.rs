//! The `Straight` squash: fold repeated vertex runs.
//!
//! After linearization a chain may pass through the same vertex twice
//! (`[A, B, C, B, D]`); everything between the first and last occurrence
//! folds away (`[A, B, D]`), and edges are restricted to the surviving
//! vertex set.

use std::collections::{HashMap, HashSet};

use super::TraceResponse;

#[must_use]
pub fn straight_way(trace: TraceResponse) -> TraceResponse {
    let TraceResponse { mut nodes, edges } = trace;
    let mut node_ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for id in &node_ids {
        *counts.entry(id.clone()).or_default() += 1;
    }
    for (id, count) in counts {
        if count <= 1 {
            continue;
        }
        let Some(first) = node_ids.iter().position(|n| *n == id) else {
            continue;
        };
        let Some(last) = node_ids.iter().rposition(|n| *n == id) else {
            continue;
        };
        if first >= last {
            continue;
        }
        node_ids.drain(first..last);
        nodes.drain(first..last);
    }

    let kept: HashSet<&str> = node_ids.iter().map(String::as_str).collect();
    let edges = edges
        .into_iter()
        .filter(|e| kept.contains(e.body.from.as_str()) && kept.contains(e.body.to.as_str()))
        .collect();
    TraceResponse { nodes, edges }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use topograph_model::{ConnectionKind, Doc, MoEdge, MoNode};

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

    fn edge(key: &str, from: &str, to: &str) -> Doc<MoEdge> {
        Doc {
            id: format!("mainEdge/{key}"),
            key: key.to_string(),
            rev: "1".into(),
            body: MoEdge {
                from: format!("main/{from}"),
                to: format!("main/{to}"),
                connection_type: ConnectionKind::MoLink,
                prm: None,
                tprm: None,
                is_trace: false,
                is_virtual: false,
                source_id: None,
            },
        }
    }

    #[test]
    fn repeated_vertex_run_folds() {
        // [A, B, C, B, D] -> [A, B, D]; edges restricted to A-B and B-D
        let trace = TraceResponse {
            nodes: vec![
                mo_node("a"),
                mo_node("b"),
                mo_node("c"),
                mo_node("b"),
                mo_node("d"),
            ],
            edges: vec![
                edge("e1", "a", "b"),
                edge("e2", "b", "c"),
                edge("e3", "c", "b"),
                edge("e4", "b", "d"),
            ],
        };
        let folded = straight_way(trace);
        let keys: Vec<&str> = folded.nodes.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "d"]);
        let edge_keys: Vec<&str> = folded.edges.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(edge_keys, vec!["e1", "e4"]);
    }

    #[test]
    fn chain_without_repeats_is_unchanged() {
        let trace = TraceResponse {
            nodes: vec![mo_node("a"), mo_node("b")],
            edges: vec![edge("e1", "a", "b")],
        };
        let folded = straight_way(trace);
        assert_eq!(folded.nodes.len(), 2);
        assert_eq!(folded.edges.len(), 1);
    }
}
