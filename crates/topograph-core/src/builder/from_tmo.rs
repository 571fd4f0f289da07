//! Pass 2/3: materialize MO vertices level by level from the TMO tree,
//! creating `p_id` edges against the previous level's id map.

use std::collections::HashMap;

use futures::StreamExt;
use serde_json::json;
use tracing::{debug, instrument};

use topograph_inventory::{InventoryApi, MosQuery};
use topograph_model::{Doc, MoDto, MoEdge, MoNode, TmoEdge, TmoNode};
use topograph_store::database::bind;

use super::prm_values;
use super::BuildSettings;
use crate::context::ProjectionContext;
use crate::error::{CoreError, CoreResult};
use crate::graph_ops::{self, QUERY_ITEMS_LIMIT};

/// Key map of the parent level: inventory MO id → vertex `_id`.
pub type IdMap = HashMap<i64, String>;

/// Builds the subtree rooted at `root_tmo_id` (non-trace).
pub async fn build_from_root(
    ctx: &ProjectionContext,
    inventory: &dyn InventoryApi,
    root_tmo_id: i64,
    is_trace: bool,
    settings: &BuildSettings,
) -> CoreResult<()> {
    let root: Doc<TmoNode> = ctx
        .tmo()
        .get(&root_tmo_id.to_string())
        .await?
        .ok_or_else(|| {
            CoreError::StartNodeNotFound(format!("Node with tmo id {root_tmo_id} not found"))
        })?;
    build_level(ctx, inventory, &root, None, None, is_trace, settings).await
}

/// Builds the trace layer rooted at the trace TMO.
pub async fn build_trace_layer(
    ctx: &ProjectionContext,
    inventory: &dyn InventoryApi,
    trace_tmo_id: i64,
    settings: &BuildSettings,
) -> CoreResult<()> {
    let root: Doc<TmoNode> = ctx
        .tmo()
        .get(&trace_tmo_id.to_string())
        .await?
        .ok_or_else(|| {
            CoreError::TraceNodeNotFound(format!("Node with tmo id {trace_tmo_id} not found"))
        })?;
    build_level(ctx, inventory, &root, None, None, true, settings).await
}

/// Recursive level walk. `parent_ids` carries the id map of the level above;
/// when absent (a re-entry into the middle of the tree) it is recovered from
/// the stored parent level.
#[instrument(skip_all, fields(tmo_id = tmo.body.tmo_id, is_trace))]
async fn build_level(
    ctx: &ProjectionContext,
    inventory: &dyn InventoryApi,
    tmo: &Doc<TmoNode>,
    tmo_edge: Option<&Doc<TmoEdge>>,
    parent_ids: Option<IdMap>,
    is_trace: bool,
    settings: &BuildSettings,
) -> CoreResult<()> {
    let parent_ids = match parent_ids {
        Some(map) => map,
        None => stored_parent_ids(ctx, tmo).await?,
    };
    let mut level_ids: IdMap = HashMap::new();

    if tmo.body.enabled || is_trace {
        let mut chunks = inventory.mos_by_tmo(MosQuery::active(tmo.body.tmo_id)).await?;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            let mut nodes: Vec<MoNode> = chunk
                .into_iter()
                .map(|mo| MoNode::from_dto(MoDto::from_mo(mo), is_trace))
                .collect();
            prm_values::fill_parsed_values(inventory, &mut nodes, &tmo.body).await?;
            prm_values::fill_indexed(inventory, &mut nodes, &tmo.body).await?;

            let stored = graph_ops::insert_nodes(ctx, &nodes).await?;
            if tmo_edge.map_or(true, |e| e.body.enabled) {
                let edges = parent_edges(&stored, is_trace, &parent_ids);
                graph_ops::insert_edges(ctx, &edges).await?;
            }
            for node in &stored {
                if let Some(data) = &node.body.data {
                    level_ids.insert(data.id, node.id.clone());
                }
            }
        }
        debug!(count = level_ids.len(), "level materialized");
    }

    for child in graph_ops::find_child_tmos(ctx, &tmo.id).await? {
        // The trace layer is built by its own walk.
        if settings.trace_tmo_id == Some(child.node.body.tmo_id) {
            continue;
        }
        Box::pin(build_level(
            ctx,
            inventory,
            &child.node,
            Some(&child.edge),
            Some(level_ids.clone()),
            is_trace,
            settings,
        ))
        .await?;
    }
    Ok(())
}

/// `p_id` edges for freshly stored vertices whose inventory parent is in the
/// previous level's id map.
fn parent_edges(stored: &[Doc<MoNode>], is_trace: bool, parent_ids: &IdMap) -> Vec<MoEdge> {
    if parent_ids.is_empty() {
        return Vec::new();
    }
    let mut edges = Vec::new();
    for node in stored {
        let Some(data) = &node.body.data else { continue };
        let Some(p_id) = data.p_id else { continue };
        if let Some(parent_vertex) = parent_ids.get(&p_id) {
            edges.push(MoEdge::parent_link(&node.id, parent_vertex, is_trace));
        }
    }
    edges
}

/// Recovers the parent level's id map from the store (used when a level is
/// rebuilt in isolation).
async fn stored_parent_ids(ctx: &ProjectionContext, tmo: &Doc<TmoNode>) -> CoreResult<IdMap> {
    let Some(parent) = graph_ops::parent_tmo(ctx, &tmo.id).await? else {
        return Ok(HashMap::new());
    };
    #[derive(serde::Deserialize)]
    struct Row {
        #[serde(rename = "_id")]
        id: String,
        mo_id: i64,
    }
    let aql = r#"
        FOR doc IN @@main
            FILTER doc.tmo == @parentTmoId
            FILTER NOT_NULL(doc.data)
            LIMIT @offset, @limit
            RETURN { "_id": doc._id, "mo_id": doc.data.id }
    "#;
    let mut map = HashMap::new();
    let mut offset = 0;
    loop {
        let vars = bind([
            ("@main", json!(ctx.names.main_collection)),
            ("parentTmoId", json!(parent.body.tmo_id)),
            ("offset", json!(offset)),
            ("limit", json!(QUERY_ITEMS_LIMIT)),
        ]);
        let rows: Vec<Row> = ctx.db.query_all(aql, vars).await?;
        let page_len = rows.len();
        for row in rows {
            map.insert(row.mo_id, row.id);
        }
        if page_len < QUERY_ITEMS_LIMIT {
            break;
        }
        offset += page_len;
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored_node(id: &str, mo_id: i64, p_id: Option<i64>) -> Doc<MoNode> {
        let dto = MoDto {
            id: mo_id,
            tmo_id: 42600,
            p_id,
            name: format!("mo-{mo_id}"),
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
            params: vec![],
        };
        Doc {
            id: id.to_string(),
            key: id.trim_start_matches("main/").to_string(),
            rev: "1".into(),
            body: MoNode::from_dto(dto, false),
        }
    }

    #[test]
    fn parent_edges_only_for_known_parents() {
        let mut parent_ids = IdMap::new();
        parent_ids.insert(10, "main/p10".to_string());

        let stored = vec![
            stored_node("main/a", 1, Some(10)),
            stored_node("main/b", 2, Some(99)),
            stored_node("main/c", 3, None),
        ];
        let edges = parent_edges(&stored, false, &parent_ids);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].from, "main/a");
        assert_eq!(edges[0].to, "main/p10");
        assert_eq!(
            edges[0].connection_type,
            topograph_model::ConnectionKind::PId
        );
        assert!(!edges[0].is_virtual);
    }

    #[test]
    fn no_parent_map_means_no_edges() {
        let stored = vec![stored_node("main/a", 1, Some(10))];
        assert!(parent_edges(&stored, false, &IdMap::new()).is_empty());
    }

    #[test]
    fn node_from_dto_keeps_mo_id_and_trace_flag() {
        let node = stored_node("main/a", 7, None);
        assert_eq!(node.body.mo_ids, vec![7]);
        assert!(!node.body.is_trace);
        assert_eq!(node.body.breadcrumbs, "/");
        assert_eq!(node.body.data.as_ref().map(|d| d.id), Some(7));
    }
}
