//! PRM change handlers.
//!
//! Create attaches the parameter to its MO, wires outbound link edges,
//! joins/creates the grouping chain when the TPRM is a grouping key, and
//! refreshes the index. Update diffs link targets, re-groups, and
//! propagates to every PRM whose parsed value triggered on the changed one.
//! Delete unwinds all of it.

use std::collections::HashMap;

use serde_json::json;
use tracing::instrument;

use topograph_core::builder::{group, BuildSettings};
use topograph_core::{graph_ops, ProjectionContext};
use topograph_inventory::InventoryApi;
use topograph_model::{Doc, MoEdge, MoNode, Prm, PrmDto, Tprm};
use topograph_store::database::bind;

use super::helpers;
use crate::error::UpdaterResult;
use crate::OperationResponse;

struct PrmBatch {
    settings: BuildSettings,
    groups: HashMap<i64, Vec<i64>>,
    nodes: HashMap<i64, Doc<MoNode>>,
    enabled_tmos: HashMap<i64, Doc<topograph_model::TmoNode>>,
    mo_link_tprms: HashMap<i64, std::collections::HashSet<i64>>,
    tprms: HashMap<i64, Tprm>,
}

impl PrmBatch {
    async fn load(ctx: &ProjectionContext, items: &[Prm]) -> UpdaterResult<Self> {
        let settings = BuildSettings::load(ctx).await?;
        let groups = graph_ops::groups_map(ctx).await?;
        let mo_ids: Vec<i64> = {
            let mut ids: Vec<i64> = items.iter().map(|p| p.mo_id).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        let nodes: HashMap<i64, Doc<MoNode>> = graph_ops::find_nodes_by_mo_ids(ctx, &mo_ids)
            .await?
            .into_iter()
            .filter_map(|node| node.body.data.as_ref().map(|d| d.id).map(|id| (id, node)))
            .collect();
        let tmo_ids: Vec<i64> = {
            let mut ids: Vec<i64> = nodes.values().map(|n| n.body.tmo).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        let enabled_tmos = graph_ops::enabled_tmos_by_ids(ctx, &tmo_ids).await?;
        let mo_link_tprms = graph_ops::enabled_mo_link_tprms(ctx, &tmo_ids).await?;
        let tprms = helpers::tprms_for_prms(ctx, items).await?;
        Ok(PrmBatch {
            settings,
            groups,
            nodes,
            enabled_tmos,
            mo_link_tprms,
            tprms,
        })
    }

    fn mo_link_enabled(&self, tmo: i64, tprm_id: i64) -> bool {
        self.mo_link_tprms
            .get(&tmo)
            .map_or(false, |set| set.contains(&tprm_id))
    }
}

#[instrument(skip_all, fields(key = %ctx.key, count = items.len()))]
pub async fn create(
    ctx: &ProjectionContext,
    inventory: &dyn InventoryApi,
    items: Vec<Prm>,
) -> UpdaterResult<OperationResponse<Prm>> {
    let mut response = OperationResponse::default();
    let batch = PrmBatch::load(ctx, &items).await?;

    let mut links_to_spread: Vec<Doc<MoEdge>> = Vec::new();
    let mut path_node_ids: Vec<String> = Vec::new();
    for item in items {
        let Some(tprm) = batch.tprms.get(&item.tprm_id) else { continue };
        let Some(node) = batch.nodes.get(&item.mo_id) else { continue };
        if !batch.enabled_tmos.contains_key(&node.body.tmo) {
            continue;
        }
        let already_there = node
            .body
            .data
            .as_ref()
            .map_or(false, |d| d.params.iter().any(|p| p.id == item.id));
        if already_there {
            response.update.push(item);
            continue;
        }
        let dto = helpers::prm_dto(inventory, &item, tprm).await?;

        if batch.mo_link_enabled(node.body.tmo, item.tprm_id) {
            let created =
                helpers::create_mo_link_edges(ctx, &dto, node, batch.settings.trace_tmo_id)
                    .await?;
            if !created.is_empty() {
                path_node_ids.push(node.id.clone());
                links_to_spread.extend(created);
            }
        }

        join_group_chain(ctx, inventory, &batch, node, &dto).await?;
        attach_to_node(ctx, &batch, node, dto).await?;
    }

    helpers::spread_and_connect(ctx, &batch.settings, &links_to_spread).await?;
    graph_ops::create_path_links(ctx, &path_node_ids).await?;
    Ok(response)
}

#[instrument(skip_all, fields(key = %ctx.key, count = items.len()))]
pub async fn update(
    ctx: &ProjectionContext,
    inventory: &dyn InventoryApi,
    items: Vec<Prm>,
) -> UpdaterResult<OperationResponse<Prm>> {
    let mut response = OperationResponse::default();
    let batch = PrmBatch::load(ctx, &items).await?;

    let mut links_to_spread: Vec<Doc<MoEdge>> = Vec::new();
    let mut path_node_ids: Vec<String> = Vec::new();
    for item in items {
        let Some(tprm) = batch.tprms.get(&item.tprm_id) else { continue };
        let dto = helpers::prm_dto(inventory, &item, tprm).await?;

        // PRMs whose parsed value triggered on this one re-resolve
        triggered_prms(ctx, item.id, &mut response).await?;

        let Some(node) = batch.nodes.get(&item.mo_id) else { continue };
        if !batch.enabled_tmos.contains_key(&node.body.tmo) {
            continue;
        }
        let old = node
            .body
            .data
            .as_ref()
            .and_then(|d| d.params.iter().find(|p| p.id == item.id))
            .cloned();
        let Some(old) = old else {
            response.create.push(item);
            continue;
        };

        join_group_chain(ctx, inventory, &batch, node, &dto).await?;

        if batch.mo_link_enabled(node.body.tmo, item.tprm_id) && old.value != dto.value {
            helpers::delete_edges_by_prm_ids(ctx, &[old.id]).await?;
            let created =
                helpers::create_mo_link_edges(ctx, &dto, node, batch.settings.trace_tmo_id)
                    .await?;
            if !created.is_empty() {
                path_node_ids.push(node.id.clone());
                links_to_spread.extend(created);
            }
            graph_ops::refresh_path_links(ctx, std::slice::from_ref(&node.id)).await?;
        }

        attach_to_node(ctx, &batch, node, dto).await?;
    }

    helpers::spread_and_connect(ctx, &batch.settings, &links_to_spread).await?;
    graph_ops::create_path_links(ctx, &path_node_ids).await?;
    Ok(response)
}

#[instrument(skip_all, fields(key = %ctx.key, count = items.len()))]
pub async fn delete(
    ctx: &ProjectionContext,
    items: Vec<Prm>,
) -> UpdaterResult<OperationResponse<Prm>> {
    let response = OperationResponse::default();
    let batch = PrmBatch::load(ctx, &items).await?;

    // link edges carried by the deleted PRMs
    let link_prm_ids: Vec<i64> = items
        .iter()
        .filter(|item| {
            batch
                .tprms
                .get(&item.tprm_id)
                .map_or(false, Tprm::is_mo_link)
        })
        .map(|item| item.id)
        .collect();
    helpers::delete_edges_by_prm_ids(ctx, &link_prm_ids).await?;

    for item in &items {
        let Some(node) = batch.nodes.get(&item.mo_id) else { continue };
        // grouping membership driven by the deleted PRM
        let group_tprms = batch.groups.get(&node.body.tmo);
        if group_tprms.map_or(false, |tprms| tprms.contains(&item.tprm_id)) {
            leave_group(ctx, node, item.tprm_id).await?;
        }
        // the parameter itself
        let mut updated = node.clone();
        if let Some(data) = &mut updated.body.data {
            data.params.retain(|p| p.id != item.id);
        }
        helpers::update_index(&mut updated.body, &batch.tprms);
        graph_ops::update_nodes(ctx, std::slice::from_ref(&updated)).await?;
    }

    let touched: Vec<String> = batch.nodes.values().map(|n| n.id.clone()).collect();
    graph_ops::refresh_path_links(ctx, &touched).await?;
    Ok(response)
}

/// PRMs anywhere in the projection whose parsed value triggered on the
/// changed PRM; reissued as updates.
async fn triggered_prms(
    ctx: &ProjectionContext,
    prm_id: i64,
    response: &mut OperationResponse<Prm>,
) -> UpdaterResult<()> {
    let aql = r"
        FOR node IN @@main
            FILTER NOT_NULL(node.data.params)
            FOR param IN node.data.params
                FILTER @prmId IN param.parsed_value.triggers.prms
                FILTER param.id != @prmId
                RETURN param
    ";
    let vars = bind([
        ("@main", json!(ctx.names.main_collection)),
        ("prmId", json!(prm_id)),
    ]);
    let dependents: Vec<PrmDto> = ctx
        .db
        .query_all(aql, vars)
        .await
        .map_err(topograph_core::CoreError::from)?;
    for dto in dependents {
        response.update.push(Prm {
            id: dto.id,
            tprm_id: dto.tprm_id,
            mo_id: dto.mo_id,
            value: dto.value,
            version: dto.version,
        });
    }
    Ok(())
}

/// Joins (or creates) the grouping vertex for a grouping-key PRM, leaving
/// any previous membership of the same TPRM first, and rewrites the
/// member's breadcrumbs under the new chain.
async fn join_group_chain(
    ctx: &ProjectionContext,
    inventory: &dyn InventoryApi,
    batch: &PrmBatch,
    node: &Doc<MoNode>,
    dto: &PrmDto,
) -> UpdaterResult<()> {
    let Some(group_tprms) = batch.groups.get(&node.body.tmo) else {
        return Ok(());
    };
    if !group_tprms.contains(&dto.tprm_id) {
        return Ok(());
    }
    let Some(tprm) = batch.tprms.get(&dto.tprm_id) else {
        return Ok(());
    };
    let Some(data) = &node.body.data else {
        return Ok(());
    };

    // leave the previous grouping of the same TPRM, if any
    if let Some(old_param) = data.param_by_tprm(dto.tprm_id) {
        if old_param.value != dto.value {
            if let Some(old_vertex) = find_member_group(ctx, node, dto.tprm_id).await? {
                group::leave_group_vertex(ctx, &old_vertex, node).await?;
            }
        }
    }

    let (group_vertex, _is_new) =
        group::find_or_create_group_vertex(ctx, inventory, tprm, node, &dto.value, data.p_id)
            .await?;

    // chain neighbors: previous-level group (or the real parent) above,
    // next-level group (or the member) below
    let index = group_tprms.iter().position(|id| *id == dto.tprm_id).unwrap_or(0);
    let mut chain_ids: Vec<String> = Vec::new();
    if index == 0 {
        if let Some(p_id) = data.p_id {
            if let Some(parent) = graph_ops::find_node_by_mo_id(ctx, p_id).await? {
                chain_ids.push(parent.id);
            }
        }
    } else if let Some(previous_tprm) = group_tprms.get(index - 1) {
        if let (Some(tprm), Some(param)) = (
            batch.tprms.get(previous_tprm),
            data.param_by_tprm(*previous_tprm),
        ) {
            let (previous_vertex, _) = group::find_or_create_group_vertex(
                ctx,
                inventory,
                tprm,
                node,
                &param.value,
                data.p_id,
            )
            .await?;
            chain_ids.push(previous_vertex.id);
        }
    }
    chain_ids.push(group_vertex.id.clone());
    if index + 1 == group_tprms.len() {
        chain_ids.push(node.id.clone());
    } else if let Some(next_tprm) = group_tprms.get(index + 1) {
        if let (Some(tprm), Some(param)) =
            (batch.tprms.get(next_tprm), data.param_by_tprm(*next_tprm))
        {
            let (next_vertex, _) = group::find_or_create_group_vertex(
                ctx,
                inventory,
                tprm,
                node,
                &param.value,
                data.p_id,
            )
            .await?;
            chain_ids.push(next_vertex.id);
        }
    }
    graph_ops::connect_chain(ctx, &chain_ids).await?;

    // breadcrumbs follow the group vertex
    let parent_chain = graph_ops::hierarchy_chain(ctx, &group_vertex.id).await?;
    let mut member = node.clone();
    helpers::rewrite_breadcrumbs(ctx, &mut member, parent_chain.first()).await?;
    Ok(())
}

/// The grouping vertex a member currently belongs to for one TPRM.
async fn find_member_group(
    ctx: &ProjectionContext,
    node: &Doc<MoNode>,
    tprm_id: i64,
) -> UpdaterResult<Option<Doc<MoNode>>> {
    let mo_id = node.body.data.as_ref().map(|d| d.id).unwrap_or_default();
    let aql = r"
        FOR vertex IN @@main
            FILTER vertex.grouped_by_tprm == @tprmId
            FILTER @moId IN vertex.mo_ids
            LIMIT 1
            RETURN vertex
    ";
    let vars = bind([
        ("@main", json!(ctx.names.main_collection)),
        ("tprmId", json!(tprm_id)),
        ("moId", json!(mo_id)),
    ]);
    let vertices: Vec<Doc<MoNode>> = ctx
        .db
        .query_all(aql, vars)
        .await
        .map_err(topograph_core::CoreError::from)?;
    Ok(vertices.into_iter().next())
}

/// Leaves the grouping vertex of one TPRM, restoring the member's direct
/// parent link and breadcrumbs. An emptied vertex disappears.
async fn leave_group(
    ctx: &ProjectionContext,
    node: &Doc<MoNode>,
    tprm_id: i64,
) -> UpdaterResult<()> {
    let Some(vertex) = find_member_group(ctx, node, tprm_id).await? else {
        return Ok(());
    };
    let vertex_chain = graph_ops::hierarchy_chain(ctx, &vertex.id).await?;
    group::leave_group_vertex(ctx, &vertex, node).await?;

    // re-parent the member to the level above the abandoned group
    let grandparent = vertex_chain.get(1);
    if let Some(grandparent) = grandparent {
        if !grandparent.body.is_grouping() || grandparent.body.grouped_by_tprm != Some(tprm_id) {
            let edge = MoEdge::parent_link(&node.id, &grandparent.id, node.body.is_trace);
            graph_ops::insert_edges(ctx, std::slice::from_ref(&edge)).await?;
        }
    }
    let mut member = node.clone();
    helpers::rewrite_breadcrumbs(ctx, &mut member, grandparent).await?;
    Ok(())
}

/// Writes the PRM into the vertex's stored data and refreshes `indexed`.
async fn attach_to_node(
    ctx: &ProjectionContext,
    batch: &PrmBatch,
    node: &Doc<MoNode>,
    dto: PrmDto,
) -> UpdaterResult<()> {
    let mut updated = node.clone();
    if let Some(data) = &mut updated.body.data {
        data.params.retain(|p| p.id != dto.id);
        data.params.push(dto);
    }
    helpers::update_index(&mut updated.body, &batch.tprms);
    graph_ops::update_nodes(ctx, std::slice::from_ref(&updated)).await?;
    Ok(())
}
