//! Pass 9: virtual spread.
//!
//! A real cross-hierarchy edge `(u, v)` is made visible to every collapsed
//! view of the tree: each strict ancestor of `u` below the nearest common
//! ancestor gets a virtual copy pointing at the nearest globally-unique
//! ancestor of `v`. Trace endpoints are not spread; they get one virtual
//! link. Writes are upserts keyed `(from, to, tprm, connection_type)` with
//! `prm` arrays merged, never duplicated.

use std::collections::HashMap;

use serde_json::json;
use tracing::instrument;

use topograph_model::{ConnectionKind, Doc, GraphNames, MoEdge, MoNode};
use topograph_store::database::bind;
use topograph_store::{BulkItem, BulkOptions};

use super::BuildSettings;
use crate::context::ProjectionContext;
use crate::error::{CoreError, CoreResult};
use crate::graph_ops::{self, QUERY_ITEMS_LIMIT};

/// One node of a hierarchy chain, vertex first, root last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainNode {
    pub id: String,
    pub global: bool,
}

/// Computes the `(from, to)` pairs a real edge spreads into.
///
/// `u_chain`/`v_chain` are the `p_id` ancestor chains of the endpoints,
/// endpoint first. For a tracking edge (the `v` endpoint is a trace node)
/// the result is the single non-spread link `(u, v)`.
#[must_use]
pub fn spread_targets(
    u_chain: &[ChainNode],
    v_chain: &[ChainNode],
    is_tracking: bool,
) -> Vec<(String, String)> {
    let (Some(u), Some(v)) = (u_chain.first(), v_chain.first()) else {
        return Vec::new();
    };
    if is_tracking {
        return vec![(u.id.clone(), v.id.clone())];
    }
    // v inside u's hierarchy spreads nothing new above their meeting point;
    // the generic walk below stops there anyway.
    let target = v_chain
        .iter()
        .find(|node| node.global)
        .unwrap_or_else(|| v_chain.last().unwrap_or(v));
    let lca = u_chain
        .iter()
        .find(|node| v_chain.iter().any(|other| other.id == node.id))
        .map(|node| node.id.clone());

    let mut pairs = Vec::new();
    for ancestor in u_chain.iter().skip(1) {
        if Some(&ancestor.id) == lca.as_ref() {
            break;
        }
        if ancestor.id == target.id {
            continue;
        }
        pairs.push((ancestor.id.clone(), target.id.clone()));
    }
    pairs
}

/// Spreads every real link of the projection (full-build pass).
#[instrument(skip_all)]
pub async fn spread_all(ctx: &ProjectionContext, settings: &BuildSettings) -> CoreResult<()> {
    let aql = r#"
        FOR doc IN @@mainEdge
            FILTER (doc.virtual == false) OR (doc.connection_type == "geometry_line")
            FILTER doc.connection_type != "p_id"
            SORT doc._from, doc._to
            LIMIT @offset, @limit
            RETURN doc
    "#;
    let mut offset = 0;
    loop {
        let vars = bind([
            ("@mainEdge", json!(ctx.names.main_edge_collection)),
            ("offset", json!(offset)),
            ("limit", json!(QUERY_ITEMS_LIMIT)),
        ]);
        let page: Vec<Doc<MoEdge>> = ctx.db.query_all(aql, vars).await?;
        let page_len = page.len();
        spread_edges(ctx, settings, &page).await?;
        if page_len < QUERY_ITEMS_LIMIT {
            break;
        }
        offset += page_len;
    }
    Ok(())
}

/// Spreads an explicit set of edges (updater delta / freshly created links).
pub async fn spread_edges(
    ctx: &ProjectionContext,
    settings: &BuildSettings,
    edges: &[Doc<MoEdge>],
) -> CoreResult<()> {
    let mut chains: HashMap<String, Vec<ChainNode>> = HashMap::new();
    let mut globals: HashMap<i64, bool> = HashMap::new();

    for edge in edges {
        if edge.body.connection_type == ConnectionKind::PId {
            continue;
        }
        let u_chain =
            chain_for(ctx, &edge.body.from, &mut chains, &mut globals).await?;
        let Some(v_node) = node_of(ctx, &edge.body.to).await? else {
            continue;
        };
        let is_tracking = settings.trace_tmo_id == Some(v_node.body.tmo);
        if is_tracking {
            let u_node = node_of(ctx, &edge.body.from).await?;
            if let Some(u_node) = u_node {
                if settings.trace_tmo_id == Some(u_node.body.tmo) {
                    return Err(CoreError::GraphBuildingError(
                        "Edge creation error. Both endpoints belong to the trace layer"
                            .to_string(),
                    ));
                }
            }
        }
        let v_chain = chain_for(ctx, &edge.body.to, &mut chains, &mut globals).await?;
        let pairs = spread_targets(&u_chain, &v_chain, is_tracking);
        upsert_virtual_edges(ctx, &edge.body, &pairs).await?;
    }
    Ok(())
}

async fn node_of(ctx: &ProjectionContext, node_id: &str) -> CoreResult<Option<Doc<MoNode>>> {
    Ok(ctx.main().get(GraphNames::doc_key(node_id)).await?)
}

/// Fetches (and caches) the ancestor chain of a vertex with global flags.
async fn chain_for(
    ctx: &ProjectionContext,
    node_id: &str,
    chains: &mut HashMap<String, Vec<ChainNode>>,
    globals: &mut HashMap<i64, bool>,
) -> CoreResult<Vec<ChainNode>> {
    if let Some(chain) = chains.get(node_id) {
        return Ok(chain.clone());
    }
    let nodes = graph_ops::hierarchy_chain(ctx, node_id).await?;
    let missing: Vec<i64> = nodes
        .iter()
        .map(|n| n.body.tmo)
        .filter(|tmo| !globals.contains_key(tmo))
        .collect();
    if !missing.is_empty() {
        for tmo in ctx.tmos_by_ids(&missing).await? {
            globals.insert(tmo.body.tmo_id, tmo.body.global_uniqueness);
        }
    }
    let chain: Vec<ChainNode> = nodes
        .iter()
        .map(|node| ChainNode {
            id: node.id.clone(),
            global: globals.get(&node.body.tmo).copied().unwrap_or(false),
        })
        .collect();
    chains.insert(node_id.to_string(), chain.clone());
    Ok(chain)
}

/// Inserts the virtual copies, merging `prm` ids into edges that already
/// exist for the `(from, to, tprm, connection_type)` tuple.
async fn upsert_virtual_edges(
    ctx: &ProjectionContext,
    real: &MoEdge,
    pairs: &[(String, String)],
) -> CoreResult<()> {
    if pairs.is_empty() {
        return Ok(());
    }
    // group targets by source so the existence probe is one query per source
    let mut by_from: HashMap<&str, Vec<&str>> = HashMap::new();
    for (from, to) in pairs {
        by_from.entry(from).or_default().push(to);
    }
    for (from, to_ids) in by_from {
        let aql = r"
            FOR doc IN @@mainEdge
                FILTER doc.virtual == true
                FILTER doc._from == @fromId
                FILTER doc.tprm == @tprm
                FILTER doc.connection_type == @connectionType
                FILTER doc._to IN @toIds
                RETURN doc
        ";
        let vars = bind([
            ("@mainEdge", json!(ctx.names.main_edge_collection)),
            ("fromId", json!(from)),
            ("tprm", json!(real.tprm)),
            ("connectionType", json!(real.connection_type)),
            ("toIds", json!(to_ids)),
        ]);
        let existing: Vec<Doc<MoEdge>> = ctx.db.query_all(aql, vars).await?;

        let mut to_update: Vec<Doc<MoEdge>> = Vec::new();
        let mut covered: std::collections::HashSet<String> = std::collections::HashSet::new();
        for mut edge in existing {
            covered.insert(edge.body.to.clone());
            if let Some(new_prms) = &real.prm {
                let merged = edge.body.prm.get_or_insert_with(Vec::new);
                for prm in new_prms {
                    if !merged.contains(prm) {
                        merged.push(*prm);
                    }
                }
            }
            to_update.push(edge);
        }
        if !to_update.is_empty() {
            let items: Vec<BulkItem<serde_json::Value>> = ctx
                .main_edge()
                .update_many(&to_update, BulkOptions::default())
                .await?;
            for item in items {
                item.into_result().map_err(|err| {
                    CoreError::GraphBuildingError(format!("Virtual edge updating error. {err}"))
                })?;
            }
        }

        let to_insert: Vec<MoEdge> = to_ids
            .iter()
            .filter(|to| !covered.contains(**to))
            .map(|to| MoEdge {
                from: from.to_string(),
                to: (*to).to_string(),
                connection_type: real.connection_type,
                prm: real.prm.clone(),
                tprm: real.tprm,
                is_trace: real.is_trace,
                is_virtual: true,
                source_id: real.source_id.clone(),
            })
            .collect();
        if !to_insert.is_empty() {
            let items: Vec<BulkItem<serde_json::Value>> = ctx
                .main_edge()
                .insert_many(&to_insert, BulkOptions::default())
                .await?;
            for item in items {
                item.into_result().map_err(|err| {
                    CoreError::GraphBuildingError(format!("Virtual edge creation error. {err}"))
                })?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn chain(spec: &[(&str, bool)]) -> Vec<ChainNode> {
        spec.iter()
            .map(|(id, global)| ChainNode {
                id: (*id).to_string(),
                global: *global,
            })
            .collect()
    }

    #[test]
    fn ancestors_above_lca_target_nearest_global() {
        // u: a -> b -> c -> root ; v: x -> y(global) -> c -> root
        let u_chain = chain(&[("a", false), ("b", false), ("c", false), ("root", true)]);
        let v_chain = chain(&[("x", false), ("y", true), ("c", false), ("root", true)]);
        let pairs = spread_targets(&u_chain, &v_chain, false);
        // strict ancestors of u above lca(c): b. Target: y.
        assert_eq!(pairs, vec![("b".to_string(), "y".to_string())]);
    }

    #[test]
    fn disjoint_hierarchies_spread_to_the_top() {
        let u_chain = chain(&[("a", false), ("b", false), ("r1", true)]);
        let v_chain = chain(&[("x", false), ("r2", true)]);
        let pairs = spread_targets(&u_chain, &v_chain, false);
        assert_eq!(
            pairs,
            vec![
                ("b".to_string(), "r2".to_string()),
                ("r1".to_string(), "r2".to_string()),
            ]
        );
    }

    #[test]
    fn tracking_edge_emits_single_link() {
        let u_chain = chain(&[("a", false), ("b", false)]);
        let v_chain = chain(&[("svc", true)]);
        let pairs = spread_targets(&u_chain, &v_chain, true);
        assert_eq!(pairs, vec![("a".to_string(), "svc".to_string())]);
    }

    #[test]
    fn no_global_ancestor_targets_the_root() {
        let u_chain = chain(&[("a", false), ("b", false)]);
        let v_chain = chain(&[("x", false), ("y", false)]);
        let pairs = spread_targets(&u_chain, &v_chain, false);
        assert_eq!(pairs, vec![("b".to_string(), "y".to_string())]);
    }

    #[test]
    fn same_hierarchy_spreads_nothing() {
        // v is u's direct parent: lca is v itself, no strict ancestors above.
        let u_chain = chain(&[("a", false), ("p", false), ("root", true)]);
        let v_chain = chain(&[("p", false), ("root", true)]);
        let pairs = spread_targets(&u_chain, &v_chain, false);
        assert!(pairs.is_empty());
    }

    #[test]
    fn empty_chain_is_safe() {
        assert!(spread_targets(&[], &chain(&[("x", false)]), false).is_empty());
        assert!(spread_targets(&chain(&[("a", false)]), &[], false).is_empty());
    }
}
