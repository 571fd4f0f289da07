//! Pass 12: orphan-branch pruning.
//!
//! The TMO tree's top-level branches are connected through cross-collection
//! links (`mo_link` / point constraints observed on the instance layer);
//! branches whose closure never reaches the configured start TMO are deleted
//! together with their MO vertices.

use std::collections::{HashMap, HashSet};

use petgraph::graph::UnGraph;
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use serde_json::json;
use tracing::{info, instrument};

use topograph_store::database::bind;

use crate::context::ProjectionContext;
use crate::error::CoreResult;
use crate::graph_ops;

/// One top-level TMO branch: its root id and every TMO id inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct TmoBranch {
    pub root_tmo_id: i64,
    pub tmo_ids: Vec<i64>,
    /// TMO ids this branch links to across the hierarchy.
    pub links: HashSet<i64>,
}

/// Branches unreachable from the one containing `start_tmo_id`, following
/// the cross-branch links as undirected edges.
#[must_use]
pub fn unreachable_branches(branches: &[TmoBranch], start_tmo_id: i64) -> Vec<i64> {
    let Some(start_branch) = branches
        .iter()
        .position(|b| b.tmo_ids.contains(&start_tmo_id))
    else {
        return Vec::new();
    };
    let mut graph: UnGraph<usize, ()> = UnGraph::new_undirected();
    let indices: Vec<_> = branches
        .iter()
        .enumerate()
        .map(|(i, _)| graph.add_node(i))
        .collect();
    let owner: HashMap<i64, usize> = branches
        .iter()
        .enumerate()
        .flat_map(|(i, b)| b.tmo_ids.iter().map(move |id| (*id, i)))
        .collect();
    for (i, branch) in branches.iter().enumerate() {
        for link in &branch.links {
            if let Some(&target) = owner.get(link) {
                if target != i {
                    graph.add_edge(indices[i], indices[target], ());
                }
            }
        }
    }
    let mut components = UnionFind::new(graph.node_count());
    for edge in graph.edge_references() {
        components.union(edge.source().index(), edge.target().index());
    }
    let start_root = components.find(start_branch);
    branches
        .iter()
        .enumerate()
        .filter(|(i, _)| components.find(*i) != start_root)
        .map(|(_, b)| b.root_tmo_id)
        .collect()
}

#[instrument(skip_all)]
pub async fn delete_orphan_branches(ctx: &ProjectionContext) -> CoreResult<()> {
    let branches = collect_branches(ctx).await?;
    if branches.is_empty() {
        return Ok(());
    }
    let start_from = ctx.start_from().await?;
    let orphan_roots = unreachable_branches(&branches, start_from.tmo_id);
    if orphan_roots.is_empty() {
        return Ok(());
    }
    let orphan_tmo_ids: Vec<i64> = branches
        .iter()
        .filter(|b| orphan_roots.contains(&b.root_tmo_id))
        .flat_map(|b| b.tmo_ids.iter().copied())
        .collect();
    info!(branches = orphan_roots.len(), tmos = orphan_tmo_ids.len(), "pruning orphan branches");

    let aql = r#"
        LET nodeIds = (
            FOR doc IN @@main
                FILTER doc.tmo IN @tmoIds
                RETURN doc._id
        )

        FOR nodeId IN nodeIds
            REMOVE PARSE_IDENTIFIER(nodeId).key IN @@main

        FOR edge IN @@mainEdge
            FILTER edge._from IN nodeIds OR edge._to IN nodeIds
            REMOVE edge._key IN @@mainEdge
    "#;
    let vars = bind([
        ("@main", json!(ctx.names.main_collection)),
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("tmoIds", json!(orphan_tmo_ids)),
    ]);
    ctx.db.execute(aql, vars).await?;
    Ok(())
}

/// Builds the top-level branches of the TMO tree and attaches the TMO ids
/// their instances link to.
async fn collect_branches(ctx: &ProjectionContext) -> CoreResult<Vec<TmoBranch>> {
    let root_doc_id = ctx.names.tmo_doc_id(ctx.record.body.tmo_id);
    let mut branches: Vec<TmoBranch> = Vec::new();
    for top in graph_ops::find_child_tmos(ctx, &root_doc_id).await? {
        let mut tmo_ids = vec![top.node.body.tmo_id];
        let mut queue = vec![top.node.id.clone()];
        while let Some(current) = queue.pop() {
            for child in graph_ops::find_child_tmos(ctx, &current).await? {
                tmo_ids.push(child.node.body.tmo_id);
                queue.push(child.node.id.clone());
            }
        }
        branches.push(TmoBranch {
            root_tmo_id: top.node.body.tmo_id,
            tmo_ids,
            links: HashSet::new(),
        });
    }
    for branch in &mut branches {
        branch.links = branch_links(ctx, &branch.tmo_ids).await?;
    }
    Ok(branches)
}

/// TMO ids reached by non-`p_id` instance edges leaving the given TMOs.
async fn branch_links(ctx: &ProjectionContext, tmo_ids: &[i64]) -> CoreResult<HashSet<i64>> {
    let aql = r#"
        LET nodeIds = (
            FOR doc IN @@main
                FILTER doc.tmo IN @tmoIds
                RETURN doc._id
        )

        LET toIds = (
            FOR edge IN @@mainEdge
                FILTER edge.connection_type != "p_id"
                FILTER edge._from IN nodeIds
                RETURN edge._to
        )

        FOR doc IN @@main
            FILTER doc._id IN toIds
            COLLECT tmos = doc.tmo
            RETURN tmos
    "#;
    let vars = bind([
        ("@main", json!(ctx.names.main_collection)),
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("tmoIds", json!(tmo_ids)),
    ]);
    let linked: Vec<i64> = ctx.db.query_all(aql, vars).await?;
    Ok(linked.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn branch(root: i64, tmos: &[i64], links: &[i64]) -> TmoBranch {
        TmoBranch {
            root_tmo_id: root,
            tmo_ids: tmos.to_vec(),
            links: links.iter().copied().collect(),
        }
    }

    #[test]
    fn linked_branches_survive() {
        let branches = vec![
            branch(1, &[1, 10], &[20]),
            branch(2, &[2, 20], &[]),
            branch(3, &[3, 30], &[]),
        ];
        // start inside branch 1; branch 2 is linked, branch 3 is not
        let orphans = unreachable_branches(&branches, 10);
        assert_eq!(orphans, vec![3]);
    }

    #[test]
    fn links_are_bidirectional() {
        let branches = vec![
            branch(1, &[1], &[]),
            branch(2, &[2], &[1]), // only 2 links to 1
        ];
        let orphans = unreachable_branches(&branches, 1);
        assert!(orphans.is_empty());
    }

    #[test]
    fn unknown_start_prunes_nothing() {
        let branches = vec![branch(1, &[1], &[])];
        assert!(unreachable_branches(&branches, 999).is_empty());
    }
}
