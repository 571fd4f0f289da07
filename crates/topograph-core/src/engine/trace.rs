//! Trace reconstruction around service nodes.
//!
//! Single-node traces pull the one-hop `mo_link` neighborhood of a trace
//! vertex, reduce it with the tracker, linearize, and trim line objects off
//! the ends. The common-path variant intersects two services' neighborhoods
//! and keeps the longest contiguous run of shared vertices.

use std::collections::HashSet;

use serde_json::json;
use tracing::instrument;

use topograph_model::{Doc, MoNode, PrmValue, SquashLevel, Status, TmoNode};
use topograph_store::database::bind;

use super::chain::SortedGraph;
use super::straight::straight_way;
use super::tracker::Tracker;
use super::{TraceResponse, TraceWithSchema};
use crate::checks;
use crate::context::ProjectionContext;
use crate::error::CoreResult;

/// Lists the trace vertices a node is connected to (or the node itself when
/// it is a trace vertex), renamed by the trace TPRM value when configured.
#[instrument(skip(ctx), fields(key = %ctx.key))]
pub async fn trace_nodes_for(
    ctx: &ProjectionContext,
    node_key: &str,
) -> CoreResult<Vec<Doc<MoNode>>> {
    checks::check_status_in(ctx, &[Status::Complete])?;
    checks::check_start_node(ctx).await?;
    let trace_tmo_id = checks::check_trace_configured(ctx.trace_tmo_id().await?)?;
    checks::check_nodes_exist(ctx, &[node_key]).await?;

    let node_id = ctx.names.node_doc_id(node_key);
    let direct_aql = r"
        FOR doc IN @@main
            FILTER doc._id == @nodeId
            FILTER doc.tmo == @tmoId
            LIMIT 1
            RETURN doc
    ";
    let vars = bind([
        ("@main", json!(ctx.names.main_collection)),
        ("nodeId", json!(node_id)),
        ("tmoId", json!(trace_tmo_id)),
    ]);
    let mut traces: Vec<Doc<MoNode>> = ctx.db.query_all(direct_aql, vars).await?;
    if traces.is_empty() {
        let neighborhood_aql = r"
            FOR v IN 1 OUTBOUND @nodeId GRAPH @mainGraph
                FILTER v.tmo == @tmoId
                RETURN DISTINCT v
        ";
        let vars = bind([
            ("nodeId", json!(node_id)),
            ("mainGraph", json!(ctx.names.main_graph)),
            ("tmoId", json!(trace_tmo_id)),
        ]);
        traces = ctx.db.query_all(neighborhood_aql, vars).await?;
    }
    if let Some(trace_tprm_id) = ctx.trace_tprm_id().await? {
        rename_traces(&mut traces, trace_tprm_id);
    }
    Ok(traces)
}

/// Renames each trace by its trace-TPRM parameter value.
pub(crate) fn rename_traces(traces: &mut [Doc<MoNode>], trace_tprm_id: i64) {
    for trace in traces {
        let Some(data) = &trace.body.data else { continue };
        if let Some(param) = data.param_by_tprm(trace_tprm_id) {
            let name = match &param.value {
                PrmValue::Str(s) => s.clone(),
                other => other.stringify(),
            };
            trace.body.name = name;
        }
    }
}

/// Reconstructs the subgraph served by one trace vertex at a squash level.
#[instrument(skip(ctx), fields(key = %ctx.key, ?level))]
pub async fn trace_for_node(
    ctx: &ProjectionContext,
    trace_node_key: &str,
    level: SquashLevel,
) -> CoreResult<TraceWithSchema> {
    checks::check_status_in(ctx, &[Status::Complete])?;
    checks::check_start_node(ctx).await?;
    checks::check_trace_configured(ctx.trace_tmo_id().await?)?;

    let node_id = ctx.names.node_doc_id(trace_node_key);
    let (nodes, edges) = neighborhood(ctx, &node_id, false).await?;
    let tmos = ctx.all_tmos().await?;

    let tracker = Tracker::new(nodes, edges, &tmos, true);
    let mut trace = tracker.get_trace(level);
    if level != SquashLevel::Graph {
        trace = SortedGraph::new(trace, false).execute();
    }
    if level == SquashLevel::Straight {
        trace = straight_way(trace);
    }
    let mut result = with_schema(ctx, trace).await?;
    if level != SquashLevel::Graph {
        trim_line_ends(&mut result);
    }
    Ok(result)
}

/// The common path of two trace vertices: the reduced chain of the smaller
/// neighborhood restricted to the longest run of shared vertices.
#[instrument(skip(ctx), fields(key = %ctx.key, ?level))]
pub async fn common_path(
    ctx: &ProjectionContext,
    trace_node_a: &str,
    trace_node_b: &str,
    level: SquashLevel,
) -> CoreResult<TraceWithSchema> {
    checks::check_status_in(ctx, &[Status::Complete])?;
    checks::check_start_node(ctx).await?;
    checks::check_trace_configured(ctx.trace_tmo_id().await?)?;
    checks::check_nodes_exist(ctx, &[trace_node_a, trace_node_b]).await?;

    let a_ids = linked_node_ids(ctx, trace_node_a).await?;
    let b_ids = linked_node_ids(ctx, trace_node_b).await?;
    let intersection: HashSet<String> = a_ids.intersection(&b_ids).cloned().collect();
    let smaller = if a_ids.len() <= b_ids.len() { &a_ids } else { &b_ids };
    let smaller_ids: Vec<&String> = smaller.iter().collect();

    let nodes = nodes_by_ids(ctx, &smaller_ids).await?;
    let edges = edges_among(ctx, &smaller_ids).await?;
    let tmo_ids: Vec<i64> = {
        let mut ids: Vec<i64> = nodes.iter().map(|n| n.body.tmo).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    };
    let tmos = ctx.tmos_by_ids(&tmo_ids).await?;

    let tracker = Tracker::new(nodes, edges, &tmos, true);
    let mut trace = tracker.get_trace(level);
    if level != SquashLevel::Graph {
        trace = SortedGraph::new(trace, false).execute();
    }
    if level == SquashLevel::Straight {
        trace = straight_way(trace);
    }
    let trace = longest_common_run(trace, &intersection);
    with_schema(ctx, trace).await
}

/// The one-hop `mo_link`/`two-way link` neighborhood of a vertex, with the
/// edges among it (geometry lines excluded).
async fn neighborhood(
    ctx: &ProjectionContext,
    node_id: &str,
    mo_link_only: bool,
) -> CoreResult<(Vec<Doc<MoNode>>, Vec<Doc<topograph_model::MoEdge>>)> {
    let kinds = if mo_link_only {
        json!(["mo_link"])
    } else {
        json!(["mo_link", "two-way link"])
    };
    let aql = r#"
        LET nodes = (
            FOR v, e IN 1 INBOUND @nodeId GRAPH @mainGraph
                FILTER e.connection_type IN @kinds
                RETURN DISTINCT v
        )
        LET node_ids = (FOR node IN nodes RETURN node._id)
        LET edges = (
            FOR edge IN @@mainEdge
                FILTER edge._to IN node_ids
                FILTER edge._from IN node_ids
                FILTER edge.connection_type != "geometry_line"
                RETURN DISTINCT edge
        )
        RETURN { "nodes": nodes, "edges": edges }
    "#;
    #[derive(serde::Deserialize)]
    struct Row {
        nodes: Vec<Doc<MoNode>>,
        edges: Vec<Doc<topograph_model::MoEdge>>,
    }
    let vars = bind([
        ("nodeId", json!(node_id)),
        ("mainGraph", json!(ctx.names.main_graph)),
        ("kinds", kinds),
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
    ]);
    let rows: Vec<Row> = ctx.db.query_all(aql, vars).await?;
    Ok(rows
        .into_iter()
        .next()
        .map(|r| (r.nodes, r.edges))
        .unwrap_or_default())
}

/// Ids of the vertices linked to a trace vertex over `mo_link`.
async fn linked_node_ids(
    ctx: &ProjectionContext,
    trace_node_key: &str,
) -> CoreResult<HashSet<String>> {
    let aql = r#"
        FOR v, e IN 1 INBOUND @nodeId GRAPH @mainGraph
            FILTER e.connection_type == "mo_link"
            RETURN DISTINCT v._id
    "#;
    let vars = bind([
        ("nodeId", json!(ctx.names.node_doc_id(trace_node_key))),
        ("mainGraph", json!(ctx.names.main_graph)),
    ]);
    let ids: Vec<String> = ctx.db.query_all(aql, vars).await?;
    Ok(ids.into_iter().collect())
}

async fn nodes_by_ids(
    ctx: &ProjectionContext,
    node_ids: &[&String],
) -> CoreResult<Vec<Doc<MoNode>>> {
    let aql = r"
        FOR doc IN @@main
            FILTER doc._id IN @nodeIds
            RETURN doc
    ";
    let vars = bind([
        ("@main", json!(ctx.names.main_collection)),
        ("nodeIds", json!(node_ids)),
    ]);
    Ok(ctx.db.query_all(aql, vars).await?)
}

async fn edges_among(
    ctx: &ProjectionContext,
    node_ids: &[&String],
) -> CoreResult<Vec<Doc<topograph_model::MoEdge>>> {
    let aql = r#"
        FOR edge IN @@mainEdge
            FILTER edge._to IN @nodeIds
            FILTER edge._from IN @nodeIds
            FILTER edge.connection_type != "geometry_line"
            RETURN edge
    "#;
    let vars = bind([
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("nodeIds", json!(node_ids)),
    ]);
    Ok(ctx.db.query_all(aql, vars).await?)
}

/// Attaches the TMO vertices the trace references.
async fn with_schema(
    ctx: &ProjectionContext,
    trace: TraceResponse,
) -> CoreResult<TraceWithSchema> {
    let tmo_ids: Vec<i64> = {
        let mut ids: Vec<i64> = trace.nodes.iter().map(|n| n.body.tmo).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    };
    let tmo = ctx.tmos_by_ids(&tmo_ids).await?;
    Ok(TraceWithSchema {
        nodes: trace.nodes,
        edges: trace.edges,
        tmo,
    })
}

/// Drops leading/trailing line-geometry vertices (repeatedly) and the edges
/// touching them.
pub fn trim_line_ends(trace: &mut TraceWithSchema) {
    let line_tmos: HashSet<i64> = trace
        .tmo
        .iter()
        .filter(|t| t.body.is_line())
        .map(|t| t.body.tmo_id)
        .collect();
    loop {
        let mut dropped: HashSet<String> = HashSet::new();
        if let Some(first) = trace.nodes.first() {
            if line_tmos.contains(&first.body.tmo) {
                dropped.insert(first.id.clone());
            }
        }
        if let Some(last) = trace.nodes.last() {
            if trace.nodes.len() > 1 && line_tmos.contains(&last.body.tmo) {
                dropped.insert(last.id.clone());
            }
        }
        if dropped.is_empty() {
            return;
        }
        trace.nodes.retain(|n| !dropped.contains(&n.id));
        trace
            .edges
            .retain(|e| !dropped.contains(&e.body.from) && !dropped.contains(&e.body.to));
    }
}

/// Restricts a linearized trace to the longest contiguous run of vertices
/// from `common_ids`.
#[must_use]
pub fn longest_common_run(trace: TraceResponse, common_ids: &HashSet<String>) -> TraceResponse {
    let mut best: Vec<Doc<MoNode>> = Vec::new();
    let mut current: Vec<Doc<MoNode>> = Vec::new();
    for node in trace.nodes {
        if common_ids.contains(&node.id) {
            current.push(node);
        } else {
            if current.len() > best.len() {
                best = std::mem::take(&mut current);
            } else {
                current.clear();
            }
        }
    }
    if current.len() > best.len() {
        best = current;
    }
    let kept: HashSet<&str> = best.iter().map(|n| n.id.as_str()).collect();
    let edges = trace
        .edges
        .into_iter()
        .filter(|e| kept.contains(e.body.from.as_str()) && kept.contains(e.body.to.as_str()))
        .collect();
    TraceResponse { nodes: best, edges }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use topograph_model::{ConnectionKind, MoEdge};

    fn mo_node(key: &str, tmo: i64) -> Doc<MoNode> {
        Doc {
            id: format!("main/{key}"),
            key: key.to_string(),
            rev: "1".into(),
            body: MoNode {
                grouped_by_tprm: None,
                group_p_id: None,
                name: key.to_string(),
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

    fn line_tmo(tmo_id: i64) -> Doc<TmoNode> {
        Doc {
            id: format!("tmo/{tmo_id}"),
            key: tmo_id.to_string(),
            rev: "1".into(),
            body: TmoNode {
                tmo_id,
                p_id: None,
                name: "Fiber".into(),
                enabled: true,
                global_uniqueness: false,
                is_virtual: false,
                materialize: true,
                icon: None,
                description: None,
                geometry_type: Some("line".into()),
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

    #[test]
    fn line_ends_trim_recursively() {
        let mut trace = TraceWithSchema {
            nodes: vec![
                mo_node("l1", 9),
                mo_node("l2", 9),
                mo_node("a", 1),
                mo_node("l3", 9),
            ],
            edges: vec![
                edge("e1", "l1", "l2"),
                edge("e2", "l2", "a"),
                edge("e3", "a", "l3"),
            ],
            tmo: vec![line_tmo(9)],
        };
        trim_line_ends(&mut trace);
        let keys: Vec<&str> = trace.nodes.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["a"]);
        assert!(trace.edges.is_empty());
    }

    #[test]
    fn longest_common_run_survives() {
        let common: HashSet<String> = ["main/b", "main/c", "main/e"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let trace = TraceResponse {
            nodes: vec![
                mo_node("a", 1),
                mo_node("b", 1),
                mo_node("c", 1),
                mo_node("d", 1),
                mo_node("e", 1),
            ],
            edges: vec![edge("e1", "b", "c"), edge("e2", "c", "d")],
        };
        let result = longest_common_run(trace, &common);
        let keys: Vec<&str> = result.nodes.iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "c"]);
        assert_eq!(result.edges.len(), 1);
        assert_eq!(result.edges[0].key, "e1");
    }

    #[test]
    fn rename_uses_trace_tprm_value() {
        use topograph_model::{MoDto, PrmDto};
        let mut node = mo_node("svc", 42622);
        node.body.data = Some(MoDto {
            id: 1,
            tmo_id: 42622,
            p_id: None,
            name: "svc".into(),
            label: None,
            active: true,
            version: 1,
            latitude: None,
            longitude: None,
            pov: None,
            geometry: None,
            model: None,
            point_a_id: None,
            point_b_id: None,
            status: None,
            params: vec![PrmDto {
                id: 50,
                tprm_id: 77,
                mo_id: 1,
                value: PrmValue::Str("Circuit-12".into()),
                version: 1,
                parsed_value: None,
            }],
        });
        let mut traces = vec![node];
        rename_traces(&mut traces, 77);
        assert_eq!(traces[0].body.name, "Circuit-12");
    }
}
