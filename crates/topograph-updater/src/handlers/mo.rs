//! MO change handlers.
//!
//! Create resolves the parent, materializes the grouping chain, wires
//! parent/point/geometry edges, rebuilds breadcrumbs for the chain and its
//! descendants, inserts the path delta and re-spreads the links touching
//! the new vertex. Update detects parent and point changes and repairs the
//! affected subset. Delete removes the vertex with every incident edge and
//! its grouping memberships.

use std::collections::{HashMap, HashSet};

use serde_json::json;
use tracing::{debug, instrument};

use topograph_core::builder::{group, prm_values, BuildSettings};
use topograph_core::{graph_ops, ProjectionContext};
use topograph_inventory::InventoryApi;
use topograph_model::{
    ConnectionKind, Doc, GraphNames, Mo, MoDto, MoEdge, MoNode, TmoNode, Tprm,
};
use topograph_store::database::bind;

use super::helpers;
use crate::error::UpdaterResult;
use crate::OperationResponse;

/// Enabled TMOs with the point-constraint targets their edges allow.
async fn enabled_point_targets(
    ctx: &ProjectionContext,
) -> UpdaterResult<HashMap<i64, HashSet<i64>>> {
    #[derive(serde::Deserialize)]
    struct Row {
        tmo_id: i64,
        targets: Vec<i64>,
    }
    let aql = r#"
        FOR node IN @@tmo
            FILTER node.enabled == true
            LET targets = (
                FOR edge IN @@tmoEdge
                    FILTER edge._from == node._id
                    FILTER edge.enabled == true
                    FILTER edge.link_type == "point_tmo_constraint"
                    FOR other IN @@tmo
                        FILTER other._id == edge._to
                        RETURN other.id
            )
            RETURN { "tmo_id": node.id, "targets": targets }
    "#;
    let vars = bind([
        ("@tmo", json!(ctx.names.tmo_collection)),
        ("@tmoEdge", json!(ctx.names.tmo_edge_collection)),
    ]);
    let rows: Vec<Row> = ctx
        .db
        .query_all(aql, vars)
        .await
        .map_err(topograph_core::CoreError::from)?;
    Ok(rows
        .into_iter()
        .map(|row| (row.tmo_id, row.targets.into_iter().collect()))
        .collect())
}

/// `p_id` children per TMO from the schema layer.
async fn tmo_children(ctx: &ProjectionContext) -> UpdaterResult<HashMap<i64, Vec<i64>>> {
    let aql = r#"
        FOR edge IN @@tmoEdge
            FILTER edge.link_type == "p_id"
            RETURN { "_from": edge._from, "_to": edge._to }
    "#;
    #[derive(serde::Deserialize)]
    struct Row {
        #[serde(rename = "_from")]
        from: String,
        #[serde(rename = "_to")]
        to: String,
    }
    let vars = bind([("@tmoEdge", json!(ctx.names.tmo_edge_collection))]);
    let rows: Vec<Row> = ctx
        .db
        .query_all(aql, vars)
        .await
        .map_err(topograph_core::CoreError::from)?;
    let mut result: HashMap<i64, Vec<i64>> = HashMap::new();
    for row in rows {
        let (Some(child), Some(parent)) = (
            GraphNames::tmo_id_of(&row.from),
            GraphNames::tmo_id_of(&row.to),
        ) else {
            continue;
        };
        result.entry(parent).or_default().push(child);
    }
    Ok(result)
}

fn type_mo_params(mo: &mut Mo, tprms: &HashMap<i64, Tprm>) -> UpdaterResult<()> {
    for prm in &mut mo.params {
        if let Some(tprm) = tprms.get(&prm.tprm_id) {
            prm.value = helpers::type_value(std::mem::take(&mut prm.value), tprm)?;
        }
    }
    Ok(())
}

#[instrument(skip_all, fields(key = %ctx.key, count = items.len()))]
pub async fn create(
    ctx: &ProjectionContext,
    inventory: &dyn InventoryApi,
    items: Vec<Mo>,
) -> UpdaterResult<OperationResponse<Mo>> {
    let mut response = OperationResponse::default();
    let settings = BuildSettings::load(ctx).await?;
    let start_from = ctx.start_from().await?;
    let groups = graph_ops::groups_map(ctx).await?;
    let children_of = tmo_children(ctx).await?;
    let line_tmos = graph_ops::line_tmo_ids(ctx).await?;
    let point_targets = enabled_point_targets(ctx).await?;

    let tmo_ids: Vec<i64> = {
        let mut ids: Vec<i64> = items.iter().map(|mo| mo.tmo_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    };
    let tmos = graph_ops::enabled_tmos_by_ids(ctx, &tmo_ids).await?;

    let mut created_ids: Vec<String> = Vec::new();
    for mut item in items {
        let is_trace = settings.trace_tmo_id == Some(item.tmo_id);
        if !is_trace && !point_targets.contains_key(&item.tmo_id) {
            continue;
        }
        if let Some(existing) = graph_ops::find_node_by_mo_id(ctx, item.id).await? {
            debug!(mo_id = item.id, vertex = %existing.id, "create of existing MO reissued as update");
            response.update.push(item);
            continue;
        }
        let tmo = tmos.get(&item.tmo_id);
        if let Some(tmo) = tmo {
            let tprms: HashMap<i64, Tprm> =
                tmo.body.params.iter().map(|p| (p.id, p.clone())).collect();
            type_mo_params(&mut item, &tprms)?;
        }
        let mut node = MoNode::from_dto(MoDto::from_mo(item.clone()), is_trace);
        if let Some(tmo) = tmo {
            prm_values::fill_parsed_values(inventory, std::slice::from_mut(&mut node), &tmo.body)
                .await?;
            prm_values::fill_indexed(inventory, std::slice::from_mut(&mut node), &tmo.body)
                .await?;
        }
        let stored = graph_ops::insert_nodes(ctx, std::slice::from_ref(&node)).await?;
        let Some(vertex) = stored.into_iter().next() else { continue };
        created_ids.push(vertex.id.clone());

        let parent = match item.p_id {
            Some(p_id) => graph_ops::find_node_by_mo_id(ctx, p_id).await?,
            None => None,
        };
        let is_start = start_from.tmo_id == item.tmo_id;
        let chain = materialize_group_chain(
            ctx,
            inventory,
            &vertex,
            tmos.get(&item.tmo_id),
            groups.get(&item.tmo_id),
        )
        .await?;

        // link the chain top to the real parent
        if let (Some(parent), false) = (&parent, is_start) {
            let top = chain.first().unwrap_or(&vertex);
            if !has_parent_edge(ctx, &top.id).await? {
                let edge = MoEdge::parent_link(&top.id, &parent.id, false);
                graph_ops::insert_edges(ctx, std::slice::from_ref(&edge)).await?;
            }
        }

        // adopt pre-existing children (they may have arrived first)
        adopt_children(ctx, &vertex, &item, children_of.get(&item.tmo_id)).await?;

        // point edges and line geometry
        let point_nodes = create_point_edges(
            ctx,
            &vertex,
            &item,
            point_targets.get(&item.tmo_id),
        )
        .await?;
        if let (Some(point_a), Some(point_b)) = (&point_nodes.0, &point_nodes.1) {
            if line_tmos.contains(&item.tmo_id) {
                let edge = MoEdge {
                    from: point_a.id.clone(),
                    to: point_b.id.clone(),
                    connection_type: ConnectionKind::GeometryLine,
                    prm: None,
                    tprm: None,
                    is_trace: false,
                    is_virtual: true,
                    source_id: Some(vertex.id.clone()),
                };
                graph_ops::insert_edges(ctx, std::slice::from_ref(&edge)).await?;
            }
        }

        // breadcrumbs for the chain, then path edges
        rewrite_chain_breadcrumbs(ctx, &chain, parent.as_ref()).await?;
        if let Some(parent) = &parent {
            let top = chain.first().unwrap_or(&vertex);
            graph_ops::ensure_path_pair(ctx, &top.id, &parent.id).await?;
        }
        let non_group_ids: Vec<String> = chain
            .iter()
            .filter(|n| !n.body.is_grouping())
            .map(|n| n.id.clone())
            .collect();
        graph_ops::create_path_links(ctx, &non_group_ids).await?;
    }

    helpers::respread_around(ctx, &settings, &created_ids).await?;
    Ok(response)
}

/// Materializes the grouping chain a new vertex belongs to, outermost
/// first, the vertex itself last, with `p_id` edges between consecutive
/// levels.
async fn materialize_group_chain(
    ctx: &ProjectionContext,
    inventory: &dyn InventoryApi,
    vertex: &Doc<MoNode>,
    tmo: Option<&Doc<TmoNode>>,
    group_tprms: Option<&Vec<i64>>,
) -> UpdaterResult<Vec<Doc<MoNode>>> {
    let mut chain: Vec<Doc<MoNode>> = Vec::new();
    let Some(group_tprms) = group_tprms else {
        return Ok(vec![vertex.clone()]);
    };
    let Some(data) = &vertex.body.data else {
        return Ok(vec![vertex.clone()]);
    };
    for tprm_id in group_tprms {
        let Some(param) = data.param_by_tprm(*tprm_id) else { continue };
        let Some(tprm) = tmo.and_then(|t| t.body.param(*tprm_id)) else {
            continue;
        };
        let (group_vertex, _is_new) = group::find_or_create_group_vertex(
            ctx,
            inventory,
            tprm,
            vertex,
            &param.value,
            data.p_id,
        )
        .await?;
        chain.push(group_vertex);
    }
    chain.push(vertex.clone());
    let chain_ids: Vec<String> = chain.iter().map(|n| n.id.clone()).collect();
    graph_ops::connect_chain(ctx, &chain_ids).await?;
    Ok(chain)
}

async fn has_parent_edge(ctx: &ProjectionContext, node_id: &str) -> UpdaterResult<bool> {
    let aql = r#"
        FOR edge IN @@mainEdge
            FILTER edge._from == @nodeId
            FILTER edge.connection_type == "p_id"
            LIMIT 1
            RETURN edge._key
    "#;
    let vars = bind([
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("nodeId", json!(node_id)),
    ]);
    let keys: Vec<String> = ctx
        .db
        .query_all(aql, vars)
        .await
        .map_err(topograph_core::CoreError::from)?;
    Ok(!keys.is_empty())
}

/// Children created before their parent hang loose; hook their chain tops
/// under the new vertex.
async fn adopt_children(
    ctx: &ProjectionContext,
    vertex: &Doc<MoNode>,
    item: &Mo,
    child_tmos: Option<&Vec<i64>>,
) -> UpdaterResult<()> {
    let Some(child_tmos) = child_tmos else {
        return Ok(());
    };
    let aql = r"
        FOR node IN @@main
            FILTER node.tmo IN @tmoIds
            FILTER node.data.p_id == @moId
            RETURN node
    ";
    let vars = bind([
        ("@main", json!(ctx.names.main_collection)),
        ("tmoIds", json!(child_tmos)),
        ("moId", json!(item.id)),
    ]);
    let children: Vec<Doc<MoNode>> = ctx
        .db
        .query_all(aql, vars)
        .await
        .map_err(topograph_core::CoreError::from)?;
    let mut edges: Vec<MoEdge> = Vec::new();
    for child in &children {
        let chain = graph_ops::hierarchy_chain(ctx, &child.id).await?;
        let Some(top) = chain.last() else { continue };
        let attachable = top.id == child.id
            || top.body.group_p_id == Some(item.id);
        if attachable && !has_parent_edge(ctx, &top.id).await? {
            edges.push(MoEdge::parent_link(&top.id, &vertex.id, false));
        }
    }
    graph_ops::insert_edges(ctx, &edges).await?;
    Ok(())
}

/// Resolves and wires the point-A/point-B edges of a vertex.
async fn create_point_edges(
    ctx: &ProjectionContext,
    vertex: &Doc<MoNode>,
    item: &Mo,
    allowed_targets: Option<&HashSet<i64>>,
) -> UpdaterResult<(Option<Doc<MoNode>>, Option<Doc<MoNode>>)> {
    let mut resolved = (None, None);
    let mut edges: Vec<MoEdge> = Vec::new();
    for (point_id, kind, slot) in [
        (item.point_a_id, ConnectionKind::PointA, 0),
        (item.point_b_id, ConnectionKind::PointB, 1),
    ] {
        let Some(point_id) = point_id else { continue };
        let Some(point) = graph_ops::find_node_by_mo_id(ctx, point_id).await? else {
            continue;
        };
        let allowed = allowed_targets.map_or(false, |targets| targets.contains(&point.body.tmo));
        if allowed {
            edges.push(MoEdge {
                from: vertex.id.clone(),
                to: point.id.clone(),
                connection_type: kind,
                prm: None,
                tprm: None,
                is_trace: false,
                is_virtual: false,
                source_id: Some(vertex.id.clone()),
            });
        }
        if slot == 0 {
            resolved.0 = Some(point);
        } else {
            resolved.1 = Some(point);
        }
    }
    graph_ops::insert_edges(ctx, &edges).await?;
    Ok(resolved)
}

/// Breadcrumbs for a freshly wired chain and the descendants it adopted.
async fn rewrite_chain_breadcrumbs(
    ctx: &ProjectionContext,
    chain: &[Doc<MoNode>],
    parent: Option<&Doc<MoNode>>,
) -> UpdaterResult<()> {
    let mut previous = parent.cloned();
    for node in chain {
        let mut node = node.clone();
        helpers::rewrite_breadcrumbs(ctx, &mut node, previous.as_ref()).await?;
        previous = Some(node);
    }
    Ok(())
}

#[instrument(skip_all, fields(key = %ctx.key, count = items.len()))]
pub async fn update(
    ctx: &ProjectionContext,
    _inventory: &dyn InventoryApi,
    items: Vec<Mo>,
) -> UpdaterResult<OperationResponse<Mo>> {
    let mut response = OperationResponse::default();
    let settings = BuildSettings::load(ctx).await?;
    let line_tmos = graph_ops::line_tmo_ids(ctx).await?;

    let existing: HashMap<i64, Doc<MoNode>> = {
        let mo_ids: Vec<i64> = items.iter().map(|mo| mo.id).collect();
        graph_ops::find_nodes_by_mo_ids(ctx, &mo_ids)
            .await?
            .into_iter()
            .filter_map(|node| node.body.data.as_ref().map(|d| d.id).map(|id| (id, node)))
            .collect()
    };

    let mut links_to_spread: Vec<Doc<MoEdge>> = Vec::new();
    let mut touched_ids: Vec<String> = Vec::new();
    for item in items {
        if !item.active {
            response.delete.push(item);
            continue;
        }
        let Some(node) = existing.get(&item.id) else {
            response.create.push(item);
            continue;
        };
        touched_ids.push(node.id.clone());
        let data = node.body.data.clone().unwrap_or_else(|| MoDto::from_mo(item.clone()));

        if data.p_id != item.p_id {
            let deleted =
                reparent(ctx, node, &item, &mut links_to_spread).await?;
            if deleted {
                continue;
            }
        }
        if data.point_a_id != item.point_a_id || data.point_b_id != item.point_b_id {
            let created = repoint(ctx, node, &item, &data, &line_tmos).await?;
            links_to_spread.extend(created);
        }
        refresh_node_data(ctx, node, &item).await?;
    }

    graph_ops::refresh_path_links(ctx, &touched_ids).await?;
    helpers::spread_and_connect(ctx, &settings, &links_to_spread).await?;
    Ok(response)
}

/// Handles a parent change: moves the chain-top `p_id` edge, rewrites
/// breadcrumbs, drops stale virtual spread and queues the real links for a
/// re-spread. Returns true when the node left the projection instead.
async fn reparent(
    ctx: &ProjectionContext,
    node: &Doc<MoNode>,
    item: &Mo,
    links_to_spread: &mut Vec<Doc<MoEdge>>,
) -> UpdaterResult<bool> {
    let parent = match item.p_id {
        Some(p_id) => graph_ops::find_node_by_mo_id(ctx, p_id).await?,
        None => None,
    };
    if parent.is_none() && ctx.record.body.tmo_id != item.tmo_id {
        // no resolvable parent: the subtree leaves the projection
        let mut to_drop: Vec<String> = vec![node.id.clone()];
        let mut frontier = vec![node.id.clone()];
        while let Some(current) = frontier.pop() {
            for child in graph_ops::all_children(ctx, &current).await? {
                frontier.push(child.id.clone());
                to_drop.push(child.id);
            }
        }
        graph_ops::delete_edges_touching(ctx, &to_drop).await?;
        graph_ops::delete_path_edges_touching(ctx, &to_drop).await?;
        let docs: Vec<serde_json::Value> = to_drop
            .iter()
            .map(|id| json!({ "_key": GraphNames::doc_key(id) }))
            .collect();
        ctx.main()
            .delete_many(&docs)
            .await
            .map_err(topograph_core::CoreError::from)?;
        return Ok(true);
    }

    // stale virtual spread derived from this vertex's links
    let (prm_ids, source_ids) = link_filters(ctx, &node.id).await?;
    let drop_aql = r"
        FOR edge IN @@mainEdge
            FILTER edge.virtual == true
            FILTER edge.source_id IN @sourceIds OR LENGTH(INTERSECTION(NOT_NULL(edge.prm, []), @prmIds)) > 0
            REMOVE edge._key IN @@mainEdge
    ";
    let vars = bind([
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("sourceIds", json!(source_ids)),
        ("prmIds", json!(prm_ids)),
    ]);
    ctx.db
        .execute(drop_aql, vars)
        .await
        .map_err(topograph_core::CoreError::from)?;

    // real links to re-spread once the move is done
    let respread_aql = r"
        FOR edge IN @@mainEdge
            FILTER edge.virtual == false
            FILTER edge.source_id IN @sourceIds OR LENGTH(INTERSECTION(NOT_NULL(edge.prm, []), @prmIds)) > 0
            RETURN edge
    ";
    let vars = bind([
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("sourceIds", json!(source_ids)),
        ("prmIds", json!(prm_ids)),
    ]);
    let real_links: Vec<Doc<MoEdge>> = ctx
        .db
        .query_all(respread_aql, vars)
        .await
        .map_err(topograph_core::CoreError::from)?;
    links_to_spread.extend(real_links);

    // move the chain-top parent edge
    let chain = graph_ops::hierarchy_chain(ctx, &node.id).await?;
    let top = chain
        .iter()
        .take_while(|n| n.id == node.id || n.body.is_grouping())
        .last()
        .cloned()
        .unwrap_or_else(|| node.clone());
    let drop_parent_aql = r#"
        FOR edge IN @@mainEdge
            FILTER edge._from == @nodeId
            FILTER edge.connection_type == "p_id"
            REMOVE edge._key IN @@mainEdge
    "#;
    let vars = bind([
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("nodeId", json!(top.id)),
    ]);
    ctx.db
        .execute(drop_parent_aql, vars)
        .await
        .map_err(topograph_core::CoreError::from)?;
    if let Some(parent) = &parent {
        let edge = MoEdge::parent_link(&top.id, &parent.id, node.body.is_trace);
        graph_ops::insert_edges(ctx, std::slice::from_ref(&edge)).await?;
    }

    let mut moved = node.clone();
    helpers::rewrite_breadcrumbs(ctx, &mut moved, parent.as_ref()).await?;
    Ok(false)
}

/// Source ids and PRM ids of every non-`p_id` link touching a vertex.
async fn link_filters(
    ctx: &ProjectionContext,
    node_id: &str,
) -> UpdaterResult<(Vec<i64>, Vec<String>)> {
    let aql = r#"
        FOR edge IN @@mainEdge
            FILTER edge._from == @nodeId OR edge._to == @nodeId
            FILTER edge.connection_type != "p_id"
            RETURN edge
    "#;
    let vars = bind([
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("nodeId", json!(node_id)),
    ]);
    let edges: Vec<Doc<MoEdge>> = ctx
        .db
        .query_all(aql, vars)
        .await
        .map_err(topograph_core::CoreError::from)?;
    let mut prm_ids: HashSet<i64> = HashSet::new();
    let mut source_ids: HashSet<String> = HashSet::new();
    for edge in edges {
        if let Some(prms) = edge.body.prm {
            prm_ids.extend(prms);
        }
        if let Some(source) = edge.body.source_id {
            source_ids.insert(source);
        }
    }
    Ok((prm_ids.into_iter().collect(), source_ids.into_iter().collect()))
}

/// Handles a point change: replaces point edges and the geometry-line edge.
async fn repoint(
    ctx: &ProjectionContext,
    node: &Doc<MoNode>,
    item: &Mo,
    data: &MoDto,
    line_tmos: &HashSet<i64>,
) -> UpdaterResult<Vec<Doc<MoEdge>>> {
    let mut new_edges: Vec<MoEdge> = Vec::new();
    let mut point_nodes: (Option<Doc<MoNode>>, Option<Doc<MoNode>>) = (None, None);
    for (old, new, kind, slot) in [
        (data.point_a_id, item.point_a_id, ConnectionKind::PointA, 0),
        (data.point_b_id, item.point_b_id, ConnectionKind::PointB, 1),
    ] {
        let point = match new {
            Some(id) => graph_ops::find_node_by_mo_id(ctx, id).await?,
            None => None,
        };
        if old != new {
            let drop_aql = r"
                FOR edge IN @@mainEdge
                    FILTER edge.connection_type == @connectionType
                    FILTER edge.source_id == @nodeId
                    REMOVE edge._key IN @@mainEdge
            ";
            let vars = bind([
                ("@mainEdge", json!(ctx.names.main_edge_collection)),
                ("connectionType", json!(kind)),
                ("nodeId", json!(node.id)),
            ]);
            ctx.db
                .execute(drop_aql, vars)
                .await
                .map_err(topograph_core::CoreError::from)?;
            if let Some(point) = &point {
                new_edges.push(MoEdge {
                    from: node.id.clone(),
                    to: point.id.clone(),
                    connection_type: kind,
                    prm: None,
                    tprm: None,
                    is_trace: false,
                    is_virtual: false,
                    source_id: Some(node.id.clone()),
                });
            }
        }
        if slot == 0 {
            point_nodes.0 = point;
        } else {
            point_nodes.1 = point;
        }
    }

    if line_tmos.contains(&item.tmo_id) {
        let drop_line_aql = r#"
            FOR edge IN @@mainEdge
                FILTER edge.source_id == @nodeId
                FILTER edge.connection_type == "geometry_line"
                REMOVE edge._key IN @@mainEdge
        "#;
        let vars = bind([
            ("@mainEdge", json!(ctx.names.main_edge_collection)),
            ("nodeId", json!(node.id)),
        ]);
        ctx.db
            .execute(drop_line_aql, vars)
            .await
            .map_err(topograph_core::CoreError::from)?;
        if let (Some(point_a), Some(point_b)) = (&point_nodes.0, &point_nodes.1) {
            new_edges.push(MoEdge {
                from: point_a.id.clone(),
                to: point_b.id.clone(),
                connection_type: ConnectionKind::GeometryLine,
                prm: None,
                tprm: None,
                is_trace: false,
                is_virtual: true,
                source_id: Some(node.id.clone()),
            });
        }
    }
    Ok(graph_ops::insert_edges(ctx, &new_edges).await?)
}

/// Refreshes the stored projection of an updated MO (name, label, data).
async fn refresh_node_data(
    ctx: &ProjectionContext,
    node: &Doc<MoNode>,
    item: &Mo,
) -> UpdaterResult<()> {
    let mut updated = node.clone();
    updated.body.name = item.name.clone();
    updated.body.label = item.label.clone();
    if let Some(data) = &mut updated.body.data {
        data.p_id = item.p_id;
        data.name = item.name.clone();
        data.label = item.label.clone();
        data.active = item.active;
        data.version = item.version;
        data.point_a_id = item.point_a_id;
        data.point_b_id = item.point_b_id;
        data.latitude = item.latitude;
        data.longitude = item.longitude;
        data.status = item.status.clone();
        data.model = item.model.clone();
    }
    graph_ops::update_nodes(ctx, std::slice::from_ref(&updated)).await?;
    Ok(())
}

#[instrument(skip_all, fields(key = %ctx.key, count = items.len()))]
pub async fn delete(
    ctx: &ProjectionContext,
    items: Vec<Mo>,
) -> UpdaterResult<OperationResponse<Mo>> {
    let response = OperationResponse::default();
    let mo_ids: Vec<i64> = items.iter().map(|mo| mo.id).collect();
    let nodes = graph_ops::find_nodes_by_mo_ids(ctx, &mo_ids).await?;
    if nodes.is_empty() {
        return Ok(response);
    }
    let node_ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();

    // geometry edges derived from deleted line objects
    let drop_geometry_aql = r#"
        FOR edge IN @@mainEdge
            FILTER edge.connection_type == "geometry_line"
            FILTER edge.source_id IN @nodeIds
            REMOVE edge._key IN @@mainEdge
    "#;
    let vars = bind([
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("nodeIds", json!(node_ids)),
    ]);
    ctx.db
        .execute(drop_geometry_aql, vars)
        .await
        .map_err(topograph_core::CoreError::from)?;

    graph_ops::delete_edges_touching(ctx, &node_ids).await?;
    graph_ops::delete_path_edges_touching(ctx, &node_ids).await?;
    remove_from_groups(ctx, &nodes).await?;

    let docs: Vec<serde_json::Value> = nodes
        .iter()
        .map(|n| json!({ "_key": n.key }))
        .collect();
    ctx.main()
        .delete_many(&docs)
        .await
        .map_err(topograph_core::CoreError::from)?;
    Ok(response)
}

/// Shrinks grouping vertices that held the deleted MOs; emptied vertices go
/// away with their edges.
async fn remove_from_groups(
    ctx: &ProjectionContext,
    nodes: &[Doc<MoNode>],
) -> UpdaterResult<()> {
    let mo_ids: Vec<i64> = nodes
        .iter()
        .filter_map(|n| n.body.data.as_ref().map(|d| d.id))
        .collect();
    if mo_ids.is_empty() {
        return Ok(());
    }
    let aql = r"
        FOR node IN @@main
            FILTER NOT_NULL(node.grouped_by_tprm)
            FILTER LENGTH(INTERSECTION(node.mo_ids, @moIds)) > 0
            RETURN node
    ";
    let vars = bind([
        ("@main", json!(ctx.names.main_collection)),
        ("moIds", json!(mo_ids)),
    ]);
    let groups: Vec<Doc<MoNode>> = ctx
        .db
        .query_all(aql, vars)
        .await
        .map_err(topograph_core::CoreError::from)?;
    let mut to_delete_ids: Vec<String> = Vec::new();
    let mut to_delete_docs: Vec<serde_json::Value> = Vec::new();
    let mut to_update: Vec<Doc<MoNode>> = Vec::new();
    for mut vertex in groups {
        vertex.body.mo_ids.retain(|id| !mo_ids.contains(id));
        if vertex.body.mo_ids.is_empty() {
            to_delete_docs.push(json!({ "_key": vertex.key }));
            to_delete_ids.push(vertex.id);
        } else {
            to_update.push(vertex);
        }
    }
    if !to_delete_ids.is_empty() {
        graph_ops::delete_edges_touching(ctx, &to_delete_ids).await?;
        ctx.main()
            .delete_many(&to_delete_docs)
            .await
            .map_err(topograph_core::CoreError::from)?;
    }
    graph_ops::update_nodes(ctx, &to_update).await?;
    Ok(())
}
