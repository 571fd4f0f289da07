//! Passes 8 and 10: line geometry.
//!
//! Pass 8 connects the resolved point-A/point-B endpoints of every line MO
//! with a virtual `geometry_line` edge (`source_id` = the line vertex), then
//! forwards any trace links the line itself carries to both endpoints, and
//! spreads the new edges.
//!
//! Pass 10 walks the `geometry_line` edges and, for every service reachable
//! from *both* endpoints, emits a virtual edge from the line vertex to the
//! service.

use std::collections::HashMap;

use serde_json::json;
use tracing::instrument;

use topograph_model::{ConnectionKind, Doc, MoEdge};
use topograph_store::database::bind;

use super::{spread, BuildSettings};
use crate::context::ProjectionContext;
use crate::error::CoreResult;
use crate::graph_ops::{self, QUERY_ITEMS_LIMIT};

#[derive(Debug, serde::Deserialize)]
struct LineRow {
    line_id: String,
    point_a_id: String,
    point_b_id: String,
}

/// Pass 8 entry point.
#[instrument(skip_all)]
pub async fn forward_line_connections(
    ctx: &ProjectionContext,
    settings: &BuildSettings,
) -> CoreResult<()> {
    let line_tmos: Vec<i64> = graph_ops::line_tmo_ids(ctx).await?.into_iter().collect();
    if line_tmos.is_empty() {
        return Ok(());
    }
    let aql = r#"
        FOR doc IN @@main
            FILTER doc.tmo IN @tmoIds
            FILTER NOT_NULL(doc.data.point_a_id)
            FILTER NOT_NULL(doc.data.point_b_id)
            LET point_a = FIRST(
                FOR edge IN @@mainEdge
                    FILTER edge._from == doc._id
                    FILTER edge.connection_type == "point_a"
                    FILTER edge.virtual == false
                    LIMIT 1
                    RETURN edge._to
            )
            FILTER NOT_NULL(point_a)
            LET point_b = FIRST(
                FOR edge IN @@mainEdge
                    FILTER edge._from == doc._id
                    FILTER edge.connection_type == "point_b"
                    FILTER edge.virtual == false
                    LIMIT 1
                    RETURN edge._to
            )
            FILTER NOT_NULL(point_b)
            LIMIT @offset, @limit
            RETURN { "line_id": doc._id, "point_a_id": point_a, "point_b_id": point_b }
    "#;
    let mut offset = 0;
    loop {
        let vars = bind([
            ("@main", json!(ctx.names.main_collection)),
            ("@mainEdge", json!(ctx.names.main_edge_collection)),
            ("tmoIds", json!(line_tmos)),
            ("offset", json!(offset)),
            ("limit", json!(QUERY_ITEMS_LIMIT)),
        ]);
        let rows: Vec<LineRow> = ctx.db.query_all(aql, vars).await?;
        let page_len = rows.len();
        let edges: Vec<MoEdge> = rows
            .iter()
            .map(|row| geometry_line_edge(&row.line_id, &row.point_a_id, &row.point_b_id))
            .collect();
        let mut stored = graph_ops::insert_edges(ctx, &edges).await?;
        let trace_edges = forward_line_trace_links(ctx, &stored).await?;
        stored.extend(trace_edges);
        spread::spread_edges(ctx, settings, &stored).await?;
        if page_len < QUERY_ITEMS_LIMIT {
            break;
        }
        offset += page_len;
    }
    Ok(())
}

fn geometry_line_edge(line_id: &str, point_a: &str, point_b: &str) -> MoEdge {
    MoEdge {
        from: point_a.to_string(),
        to: point_b.to_string(),
        connection_type: ConnectionKind::GeometryLine,
        prm: None,
        tprm: None,
        is_trace: false,
        is_virtual: true,
        source_id: Some(line_id.to_string()),
    }
}

/// Trace links carried by the line object itself fan out to both endpoints
/// of its geometry edge, as virtual `mo_link`s marked with the line.
async fn forward_line_trace_links(
    ctx: &ProjectionContext,
    line_edges: &[Doc<MoEdge>],
) -> CoreResult<Vec<Doc<MoEdge>>> {
    let mut by_line: HashMap<String, Vec<&Doc<MoEdge>>> = HashMap::new();
    for edge in line_edges {
        if edge.body.connection_type != ConnectionKind::GeometryLine {
            continue;
        }
        if let Some(line_id) = &edge.body.source_id {
            by_line.entry(line_id.clone()).or_default().push(edge);
        }
    }
    if by_line.is_empty() {
        return Ok(Vec::new());
    }
    let aql = r"
        FOR edge IN @@mainEdge
            FILTER edge._from IN @lineIds
            FILTER edge.is_trace == true
            RETURN edge
    ";
    let line_ids: Vec<&String> = by_line.keys().collect();
    let vars = bind([
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("lineIds", json!(line_ids)),
    ]);
    let trace_links: Vec<Doc<MoEdge>> = ctx.db.query_all(aql, vars).await?;
    let mut forwarded: Vec<MoEdge> = Vec::new();
    for trace_link in &trace_links {
        let Some(geometry_edges) = by_line.get(&trace_link.body.from) else {
            continue;
        };
        for geometry_edge in geometry_edges {
            for endpoint in [&geometry_edge.body.from, &geometry_edge.body.to] {
                forwarded.push(MoEdge {
                    from: endpoint.clone(),
                    to: trace_link.body.to.clone(),
                    connection_type: ConnectionKind::MoLink,
                    prm: None,
                    tprm: None,
                    is_trace: true,
                    is_virtual: true,
                    source_id: Some(trace_link.body.from.clone()),
                });
            }
        }
    }
    graph_ops::insert_edges(ctx, &forwarded).await
}

#[derive(Debug, serde::Deserialize)]
struct LineServiceRow {
    source_id: Option<String>,
    services: Vec<Doc<MoEdge>>,
}

/// Pass 10 entry point. With `source_ids`, only lines derived from those
/// vertices are considered (the updater's delta form).
#[instrument(skip_all)]
pub async fn connect_services_by_lines(
    ctx: &ProjectionContext,
    settings: &BuildSettings,
    source_ids: Option<Vec<String>>,
) -> CoreResult<()> {
    let Some(trace_tmo_id) = settings.trace_tmo_id else {
        return Ok(());
    };
    let source_filter = match &source_ids {
        Some(ids) if ids.is_empty() => return Ok(()),
        other => other.clone(),
    };
    let aql = r#"
        LET serviceIds = (
            FOR node IN @@main
                FILTER node.tmo == @traceTmo
                RETURN node._id
        )

        FOR edge IN @@mainEdge
            FILTER edge.connection_type == 'geometry_line'
            FILTER IS_NULL(@sourceIds) OR edge.source_id IN @sourceIds
            LET services_a = (
                FOR s_edge IN @@mainEdge
                    FILTER s_edge.connection_type IN ["mo_link", "two-way link"]
                    FILTER s_edge._from == edge._from
                    FILTER s_edge._to IN serviceIds
                    RETURN s_edge
            )
            LET services_b = (
                FOR s_edge IN @@mainEdge
                    FILTER s_edge.connection_type IN ["mo_link", "two-way link"]
                    FILTER s_edge._from == edge._to
                    FILTER s_edge._to IN serviceIds
                    RETURN s_edge
            )
            LET a_to_ids = (FOR doc IN services_a RETURN DISTINCT doc._to)
            LET b_to_ids = (FOR doc IN services_b RETURN DISTINCT doc._to)
            LET services_to_ids = INTERSECTION(a_to_ids, b_to_ids)
            FILTER LENGTH(services_to_ids) > 0
            LET filtered_a = (
                FOR doc IN services_a
                    FILTER doc._to IN services_to_ids
                    RETURN doc
            )
            LET filtered_b = (
                FOR doc IN services_b
                    FILTER doc._to IN services_to_ids
                    RETURN doc
            )
            LET services = UNION(filtered_a, filtered_b)
            LIMIT @offset, @limit
            RETURN { "source_id": edge.source_id, "services": services }
    "#;
    let mut offset = 0;
    loop {
        let vars = bind([
            ("@main", json!(ctx.names.main_collection)),
            ("@mainEdge", json!(ctx.names.main_edge_collection)),
            ("traceTmo", json!(trace_tmo_id)),
            ("sourceIds", json!(source_filter)),
            ("offset", json!(offset)),
            ("limit", json!(QUERY_ITEMS_LIMIT)),
        ]);
        let rows: Vec<LineServiceRow> = ctx.db.query_all(aql, vars).await?;
        let page_len = rows.len();
        let mut edges: Vec<MoEdge> = Vec::new();
        for row in rows {
            let Some(line_vertex) = row.source_id else { continue };
            for service_edge in row.services {
                let edge = MoEdge {
                    from: line_vertex.clone(),
                    to: service_edge.body.to.clone(),
                    connection_type: service_edge.body.connection_type,
                    prm: None,
                    tprm: None,
                    is_trace: service_edge.body.is_trace,
                    is_virtual: true,
                    source_id: Some(
                        service_edge
                            .body
                            .source_id
                            .unwrap_or(service_edge.body.from),
                    ),
                };
                if !edge_exists(ctx, &edge).await? {
                    edges.push(edge);
                }
            }
        }
        graph_ops::insert_edges(ctx, &edges).await?;
        if page_len < QUERY_ITEMS_LIMIT {
            break;
        }
        offset += page_len;
    }
    Ok(())
}

/// Idempotence probe for pass 10 (re-runs must not duplicate links).
async fn edge_exists(ctx: &ProjectionContext, edge: &MoEdge) -> CoreResult<bool> {
    let aql = r"
        FOR doc IN @@mainEdge
            FILTER doc._from == @from
            FILTER doc._to == @to
            FILTER doc.connection_type == @connectionType
            FILTER doc.is_trace == @isTrace
            FILTER doc.virtual == true
            LIMIT 1
            RETURN doc._key
    ";
    let vars = bind([
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("from", json!(edge.from)),
        ("to", json!(edge.to)),
        ("connectionType", json!(edge.connection_type)),
        ("isTrace", json!(edge.is_trace)),
    ]);
    let hits: Vec<String> = ctx.db.query_all(aql, vars).await?;
    Ok(!hits.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_edge_marks_its_line() {
        let edge = geometry_line_edge("main/line", "main/a", "main/b");
        assert_eq!(edge.from, "main/a");
        assert_eq!(edge.to, "main/b");
        assert_eq!(edge.connection_type, ConnectionKind::GeometryLine);
        assert!(edge.is_virtual);
        assert_eq!(edge.source_id.as_deref(), Some("main/line"));
    }
}
