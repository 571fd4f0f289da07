//! Pass 6: forward service connections over mo_links.
//!
//! For every real edge `(u, s)` into the trace layer and every non-trace
//! `mo_link` edge `(u, v)`, a virtual trace edge `(v, s)` is created so the
//! service stays reachable from the peer side of the link. Each created
//! batch is immediately spread up the hierarchy.

use std::collections::HashMap;

use serde_json::json;
use tracing::instrument;

use topograph_model::{Doc, MoEdge};
use topograph_store::database::bind;

use super::{spread, BuildSettings};
use crate::context::ProjectionContext;
use crate::error::CoreResult;
use crate::graph_ops::{self, QUERY_ITEMS_LIMIT};

/// Forwards service connections. With `edges = None` the whole edge
/// collection is scanned (full build); the updater passes the delta.
#[instrument(skip_all)]
pub async fn forward_service_connections(
    ctx: &ProjectionContext,
    settings: &BuildSettings,
    edges: Option<Vec<Doc<MoEdge>>>,
) -> CoreResult<()> {
    let service_edges = match edges {
        Some(edges) => edges,
        None => {
            if settings.trace_tmo_id.is_none() {
                return Ok(());
            }
            collect_trace_edges(ctx).await?
        }
    };
    for chunk in service_edges.chunks(QUERY_ITEMS_LIMIT) {
        forward_chunk(ctx, settings, chunk).await?;
    }
    Ok(())
}

/// Real edges pointing into the trace layer.
async fn collect_trace_edges(ctx: &ProjectionContext) -> CoreResult<Vec<Doc<MoEdge>>> {
    let aql = r"
        FOR edge IN @@mainEdge
            FILTER edge.is_trace == true
            FILTER edge.virtual == false
            LIMIT @offset, @limit
            RETURN edge
    ";
    let mut edges = Vec::new();
    let mut offset = 0;
    loop {
        let vars = bind([
            ("@mainEdge", json!(ctx.names.main_edge_collection)),
            ("offset", json!(offset)),
            ("limit", json!(QUERY_ITEMS_LIMIT)),
        ]);
        let page: Vec<Doc<MoEdge>> = ctx.db.query_all(aql, vars).await?;
        let page_len = page.len();
        edges.extend(page);
        if page_len < QUERY_ITEMS_LIMIT {
            break;
        }
        offset += page_len;
    }
    Ok(edges)
}

async fn forward_chunk(
    ctx: &ProjectionContext,
    settings: &BuildSettings,
    service_edges: &[Doc<MoEdge>],
) -> CoreResult<()> {
    // service edges grouped by their non-trace endpoint
    let mut by_source: HashMap<String, Vec<&Doc<MoEdge>>> = HashMap::new();
    for edge in service_edges {
        if !edge.body.is_trace {
            continue;
        }
        by_source
            .entry(edge.body.from.clone())
            .or_default()
            .push(edge);
    }
    if by_source.is_empty() {
        return Ok(());
    }
    let aql = r#"
        FOR edge IN @@mainEdge
            FILTER edge.connection_type == "mo_link"
            FILTER edge.is_trace == false
            FILTER edge._from IN @nodeIds
            RETURN edge
    "#;
    let node_ids: Vec<&String> = by_source.keys().collect();
    let vars = bind([
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("nodeIds", json!(node_ids)),
    ]);
    let mo_links: Vec<Doc<MoEdge>> = ctx.db.query_all(aql, vars).await?;

    let mut forwarded: Vec<MoEdge> = Vec::new();
    for mo_link in &mo_links {
        let Some(services) = by_source.get(&mo_link.body.from) else {
            continue;
        };
        for service_edge in services {
            forwarded.push(MoEdge {
                from: mo_link.body.to.clone(),
                to: service_edge.body.to.clone(),
                connection_type: service_edge.body.connection_type,
                prm: service_edge.body.prm.clone(),
                tprm: service_edge.body.tprm,
                is_trace: service_edge.body.is_trace,
                is_virtual: true,
                source_id: Some(service_edge.body.from.clone()),
            });
        }
    }
    let stored = graph_ops::insert_edges(ctx, &forwarded).await?;
    spread::spread_edges(ctx, settings, &stored).await?;
    Ok(())
}
