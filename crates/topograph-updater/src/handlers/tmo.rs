//! TMO change handlers: the registry record, the settings documents, and
//! the schema layer itself (with the MO-layer cascade on deletions).

use std::collections::HashSet;

use serde_json::json;
use tracing::{info, instrument, warn};

use topograph_core::{graph_ops, registry::Registry, settings, ProjectionContext};
use topograph_inventory::{InventoryApi, TmoTree};
use topograph_model::{ChangeOp, Doc, GraphNames, LinkKind, TmoEdge, TmoNode};
use topograph_store::database::bind;
use topograph_store::{BulkItem, BulkOptions};

use crate::error::{UpdaterError, UpdaterResult};

/// Maintains the main record: `activeTmoIds`, and projection deletion when
/// the root TMO itself is deleted.
#[instrument(skip_all, fields(key = %ctx.key, ?op))]
pub async fn main_update(
    ctx: &ProjectionContext,
    op: ChangeOp,
    tmos: &[TmoTree],
) -> UpdaterResult<()> {
    let registry = Registry::new(ctx.client.clone(), ctx.names.clone());
    let ids: HashSet<i64> = tmos.iter().map(|t| t.id).collect();
    match op {
        ChangeOp::Deleted => {
            if ids.contains(&ctx.record.body.tmo_id) {
                warn!(key = %ctx.key, "root TMO deleted, removing projection");
                registry.delete(&ctx.key).await?;
                return Err(UpdaterError::ProjectionDeleted(ctx.key.clone()));
            }
            let mut record = ctx.record.body.clone();
            record.active_tmo_ids.retain(|id| !ids.contains(id));
            registry.replace(&ctx.key, &record).await?;
        }
        ChangeOp::Created => {
            let mut record = ctx.record.body.clone();
            for id in ids {
                if !record.active_tmo_ids.contains(&id) {
                    record.active_tmo_ids.push(id);
                }
            }
            registry.replace(&ctx.key, &record).await?;
        }
        ChangeOp::Updated => {}
    }
    Ok(())
}

/// Scrubs deleted TMOs out of the settings documents and dissolves the
/// groupings their TPRMs drove.
pub async fn settings_update(
    ctx: &ProjectionContext,
    op: ChangeOp,
    tmos: &[TmoTree],
) -> UpdaterResult<()> {
    if op != ChangeOp::Deleted {
        return Ok(());
    }
    let tmo_ids: Vec<i64> = tmos.iter().map(|t| t.id).collect();
    let group_by = ctx.group_by_tprms().await?;
    settings::drop_tmo_references(ctx, &tmo_ids).await?;
    if !group_by.is_empty() {
        // grouping TPRMs owned by the deleted TMOs lose their vertices
        let remaining = ctx.group_by_tprms().await?;
        let dropped: Vec<i64> = group_by
            .into_iter()
            .filter(|id| !remaining.contains(id))
            .collect();
        dissolve_groupings(ctx, &dropped).await?;
    }
    Ok(())
}

/// Dissolves every grouping vertex of the given TPRMs: members re-parent to
/// the vertex's own parent, breadcrumbs follow, the vertex disappears.
pub async fn dissolve_groupings(ctx: &ProjectionContext, tprm_ids: &[i64]) -> UpdaterResult<()> {
    use topograph_model::MoNode;

    if tprm_ids.is_empty() {
        return Ok(());
    }
    let aql = r"
        FOR node IN @@main
            FILTER node.grouped_by_tprm IN @tprmIds
            RETURN node
    ";
    let vars = bind([
        ("@main", json!(ctx.names.main_collection)),
        ("tprmIds", json!(tprm_ids)),
    ]);
    let group_vertices: Vec<Doc<MoNode>> = ctx
        .db
        .query_all(aql, vars)
        .await
        .map_err(topograph_core::CoreError::from)?;
    for vertex in group_vertices {
        let chain = graph_ops::hierarchy_chain(ctx, &vertex.id).await?;
        let parent = chain.get(1);
        // members re-point past the dissolved vertex
        let reparent_aql = match parent {
            Some(_) => r#"
                FOR edge IN @@mainEdge
                    FILTER edge._to == @groupId
                    FILTER edge.connection_type == "p_id"
                    UPDATE edge._key WITH { "_to": @parentId } IN @@mainEdge
            "#,
            None => r#"
                FOR edge IN @@mainEdge
                    FILTER edge._to == @groupId
                    FILTER edge.connection_type == "p_id"
                    REMOVE edge._key IN @@mainEdge
            "#,
        };
        let mut vars = bind([
            ("@mainEdge", json!(ctx.names.main_edge_collection)),
            ("groupId", json!(vertex.id)),
        ]);
        if let Some(parent) = parent {
            vars.insert("parentId".to_string(), json!(parent.id));
        }
        ctx.db
            .execute(reparent_aql, vars)
            .await
            .map_err(topograph_core::CoreError::from)?;

        let old_prefix = format!("{}{}/", vertex.body.breadcrumbs, vertex.key);
        graph_ops::substitute_breadcrumbs(ctx, &old_prefix, &vertex.body.breadcrumbs).await?;
        graph_ops::delete_edges_touching(ctx, std::slice::from_ref(&vertex.id)).await?;
        ctx.main()
            .remove(&vertex.key)
            .await
            .map_err(topograph_core::CoreError::from)?;
    }
    Ok(())
}

/// Maintains the schema layer itself.
#[instrument(skip_all, fields(key = %ctx.key, ?op, count = tmos.len()))]
pub async fn schema_update(
    ctx: &ProjectionContext,
    inventory: &dyn InventoryApi,
    op: ChangeOp,
    tmos: Vec<TmoTree>,
) -> UpdaterResult<()> {
    match op {
        ChangeOp::Created => create_tmos(ctx, inventory, tmos, false).await,
        ChangeOp::Updated => update_tmos(ctx, inventory, tmos).await,
        ChangeOp::Deleted => delete_tmos(ctx, tmos.iter().map(|t| t.id).collect()).await,
    }
}

async fn tmo_docs_by_ids(
    ctx: &ProjectionContext,
    tmo_ids: &[i64],
) -> UpdaterResult<std::collections::HashMap<i64, Doc<TmoNode>>> {
    let docs = ctx.tmos_by_ids(tmo_ids).await?;
    Ok(docs.into_iter().map(|d| (d.body.tmo_id, d)).collect())
}

async fn update_tmos(
    ctx: &ProjectionContext,
    inventory: &dyn InventoryApi,
    tmos: Vec<TmoTree>,
) -> UpdaterResult<()> {
    let ids: Vec<i64> = tmos.iter().map(|t| t.id).collect();
    let existing = tmo_docs_by_ids(ctx, &ids).await?;
    let mut to_create: Vec<TmoTree> = Vec::new();
    let mut to_delete: Vec<i64> = Vec::new();
    let mut to_update: Vec<Doc<TmoNode>> = Vec::new();
    let mut links_to_create: Vec<TmoEdge> = Vec::new();

    for tmo in tmos {
        let Some(db_tmo) = existing.get(&tmo.id) else {
            to_create.push(tmo);
            continue;
        };
        // parent change
        if ctx.record.body.tmo_id != tmo.id && tmo.p_id != db_tmo.body.p_id {
            match tmo.p_id {
                None => {
                    to_delete.push(tmo.id);
                    continue;
                }
                Some(new_parent) => {
                    let parents = tmo_docs_by_ids(ctx, &[new_parent]).await?;
                    let Some(parent) = parents.get(&new_parent) else {
                        to_delete.push(tmo.id);
                        continue;
                    };
                    let drop_aql = r#"
                        FOR edge IN @@tmoEdge
                            FILTER edge._from == @nodeId
                            FILTER edge.link_type == "p_id"
                            REMOVE edge._key IN @@tmoEdge
                    "#;
                    let vars = bind([
                        ("@tmoEdge", json!(ctx.names.tmo_edge_collection)),
                        ("nodeId", json!(db_tmo.id)),
                    ]);
                    ctx.db
                        .execute(drop_aql, vars)
                        .await
                        .map_err(topograph_core::CoreError::from)?;
                    links_to_create.push(TmoEdge {
                        from: db_tmo.id.clone(),
                        to: parent.id.clone(),
                        link_type: LinkKind::PId,
                        enabled: false,
                        tprm_id: None,
                    });
                }
            }
        }
        // point-constraint diff
        let new_constraints: HashSet<i64> = tmo.points_constraint_by_tmo.iter().copied().collect();
        let old_constraints: HashSet<i64> =
            db_tmo.body.points_constraint_by_tmo.iter().copied().collect();
        if new_constraints != old_constraints {
            let added: Vec<i64> = new_constraints.difference(&old_constraints).copied().collect();
            let targets = tmo_docs_by_ids(ctx, &added).await?;
            for target in targets.values() {
                links_to_create.push(TmoEdge {
                    from: db_tmo.id.clone(),
                    to: target.id.clone(),
                    link_type: LinkKind::PointConstraint,
                    enabled: false,
                    tprm_id: None,
                });
            }
            let removed: Vec<String> = old_constraints
                .difference(&new_constraints)
                .map(|id| ctx.names.tmo_doc_id(*id))
                .collect();
            if !removed.is_empty() {
                let drop_aql = r#"
                    FOR edge IN @@tmoEdge
                        FILTER edge._from == @nodeId
                        FILTER edge.link_type == "point_tmo_constraint"
                        FILTER edge._to IN @targets
                        REMOVE edge._key IN @@tmoEdge
                "#;
                let vars = bind([
                    ("@tmoEdge", json!(ctx.names.tmo_edge_collection)),
                    ("nodeId", json!(db_tmo.id)),
                    ("targets", json!(removed)),
                ]);
                ctx.db
                    .execute(drop_aql, vars)
                    .await
                    .map_err(topograph_core::CoreError::from)?;
            }
        }
        // field refresh; params and enabled flags stay as configured
        let mut updated = db_tmo.clone();
        updated.body.p_id = tmo.p_id;
        updated.body.name = tmo.name;
        updated.body.icon = tmo.icon;
        updated.body.description = tmo.description;
        updated.body.is_virtual = tmo.is_virtual;
        updated.body.global_uniqueness = tmo.global_uniqueness;
        updated.body.materialize = tmo.materialize;
        updated.body.geometry_type = tmo.geometry_type;
        updated.body.line_type = tmo.line_type;
        updated.body.label = tmo.label;
        updated.body.minimize = tmo.minimize;
        updated.body.points_constraint_by_tmo = tmo.points_constraint_by_tmo;
        to_update.push(updated);
    }

    if !to_update.is_empty() {
        let items: Vec<BulkItem<serde_json::Value>> = ctx
            .tmo()
            .update_many(&to_update, BulkOptions::default())
            .await
            .map_err(topograph_core::CoreError::from)?;
        for item in items {
            item.into_result().map_err(topograph_core::CoreError::from)?;
        }
    }
    if !links_to_create.is_empty() {
        let items: Vec<BulkItem<serde_json::Value>> = ctx
            .tmo_edge()
            .insert_many(&links_to_create, BulkOptions::default())
            .await
            .map_err(topograph_core::CoreError::from)?;
        for item in items {
            item.into_result().map_err(topograph_core::CoreError::from)?;
        }
    }
    if !to_create.is_empty() {
        create_tmos(ctx, inventory, to_create, true).await?;
    }
    if !to_delete.is_empty() {
        delete_tmos(ctx, to_delete).await?;
    }
    Ok(())
}

/// Inserts new TMO vertices (disabled until configured), with parent and
/// point edges. With `with_children` the whole inventory subtree lands.
async fn create_tmos(
    ctx: &ProjectionContext,
    inventory: &dyn InventoryApi,
    tmos: Vec<TmoTree>,
    with_children: bool,
) -> UpdaterResult<()> {
    let mut flat: Vec<TmoTree> = Vec::new();
    for tmo in tmos {
        if with_children {
            let trees = inventory.tmo_tree(tmo.id).await?;
            let mut queue: Vec<TmoTree> = trees;
            while let Some(mut node) = queue.pop() {
                queue.append(&mut node.children);
                flat.push(node);
            }
        } else {
            let mut tmo = tmo;
            if tmo.points_constraint_by_tmo.is_empty() {
                tmo.points_constraint_by_tmo = inventory.point_tmo_const(tmo.id).await?;
            }
            flat.push(tmo);
        }
    }
    if flat.is_empty() {
        return Ok(());
    }

    let docs: Vec<serde_json::Value> = flat
        .iter()
        .map(|tmo| {
            json!({
                "_id": ctx.names.tmo_doc_id(tmo.id),
                "_key": tmo.id.to_string(),
                "id": tmo.id,
                "p_id": tmo.p_id,
                "name": tmo.name,
                "icon": tmo.icon,
                "description": tmo.description,
                "virtual": tmo.is_virtual,
                "global_uniqueness": tmo.global_uniqueness,
                "materialize": tmo.materialize,
                "points_constraint_by_tmo": tmo.points_constraint_by_tmo,
                "geometry_type": tmo.geometry_type,
                "line_type": tmo.line_type,
                "label": tmo.label,
                "minimize": tmo.minimize,
                "enabled": false,
                "params": [],
            })
        })
        .collect();
    let items: Vec<BulkItem<serde_json::Value>> = ctx
        .tmo()
        .insert_many(&docs, BulkOptions::default())
        .await
        .map_err(topograph_core::CoreError::from)?;
    for item in items {
        item.into_result().map_err(topograph_core::CoreError::from)?;
    }

    // parent + point edges against everything now present
    let known: HashSet<i64> = {
        let all = ctx.all_tmos().await?;
        all.iter().map(|t| t.body.tmo_id).collect()
    };
    let mut edges: Vec<TmoEdge> = Vec::new();
    for tmo in &flat {
        if let Some(p_id) = tmo.p_id {
            if known.contains(&p_id) {
                edges.push(TmoEdge {
                    from: ctx.names.tmo_doc_id(tmo.id),
                    to: ctx.names.tmo_doc_id(p_id),
                    link_type: LinkKind::PId,
                    enabled: false,
                    tprm_id: None,
                });
            }
        }
        for constraint in &tmo.points_constraint_by_tmo {
            if known.contains(constraint) {
                edges.push(TmoEdge {
                    from: ctx.names.tmo_doc_id(tmo.id),
                    to: ctx.names.tmo_doc_id(*constraint),
                    link_type: LinkKind::PointConstraint,
                    enabled: false,
                    tprm_id: None,
                });
            }
        }
    }
    if !edges.is_empty() {
        let items: Vec<BulkItem<serde_json::Value>> = ctx
            .tmo_edge()
            .insert_many(&edges, BulkOptions::default())
            .await
            .map_err(topograph_core::CoreError::from)?;
        for item in items {
            item.into_result().map_err(topograph_core::CoreError::from)?;
        }
    }
    info!(count = flat.len(), "schema vertices created");
    Ok(())
}

/// Deletes TMO vertices with all their `p_id` descendants, their schema
/// edges, and every MO vertex (plus incident main/path edges) of the
/// affected TMOs.
async fn delete_tmos(ctx: &ProjectionContext, tmo_ids: Vec<i64>) -> UpdaterResult<()> {
    let mut all_ids = tmo_ids.clone();
    let mut frontier = tmo_ids;
    while !frontier.is_empty() {
        let doc_ids: Vec<String> = frontier.iter().map(|id| ctx.names.tmo_doc_id(*id)).collect();
        let aql = r#"
            FOR edge IN @@tmoEdge
                FILTER edge._to IN @tmoIds
                FILTER edge.link_type == "p_id"
                RETURN edge._from
        "#;
        let vars = bind([
            ("@tmoEdge", json!(ctx.names.tmo_edge_collection)),
            ("tmoIds", json!(doc_ids)),
        ]);
        let children: Vec<String> = ctx
            .db
            .query_all(aql, vars)
            .await
            .map_err(topograph_core::CoreError::from)?;
        frontier = children
            .iter()
            .filter_map(|id| GraphNames::tmo_id_of(id))
            .filter(|id| !all_ids.contains(id))
            .collect();
        all_ids.extend(frontier.iter().copied());
    }

    let drop_schema_aql = r"
        FOR node IN @@tmo
            FILTER node.id IN @tmoIds
            REMOVE node._key IN @@tmo
            FOR edge IN @@tmoEdge
                FILTER edge._from == node._id OR edge._to == node._id
                REMOVE edge._key IN @@tmoEdge
    ";
    let vars = bind([
        ("@tmo", json!(ctx.names.tmo_collection)),
        ("@tmoEdge", json!(ctx.names.tmo_edge_collection)),
        ("tmoIds", json!(all_ids)),
    ]);
    ctx.db
        .execute(drop_schema_aql, vars)
        .await
        .map_err(topograph_core::CoreError::from)?;

    // instance layer of the dropped TMOs
    let instance_ids_aql = r"
        FOR node IN @@main
            FILTER node.tmo IN @tmoIds
            RETURN node._id
    ";
    let vars = bind([
        ("@main", json!(ctx.names.main_collection)),
        ("tmoIds", json!(all_ids)),
    ]);
    let node_ids: Vec<String> = ctx
        .db
        .query_all(instance_ids_aql, vars)
        .await
        .map_err(topograph_core::CoreError::from)?;
    if !node_ids.is_empty() {
        graph_ops::delete_edges_touching(ctx, &node_ids).await?;
        graph_ops::delete_path_edges_touching(ctx, &node_ids).await?;
        let drop_nodes_aql = r"
            FOR node IN @@main
                FILTER node.tmo IN @tmoIds
                REMOVE node._key IN @@main
        ";
        let vars = bind([
            ("@main", json!(ctx.names.main_collection)),
            ("tmoIds", json!(all_ids)),
        ]);
        ctx.db
            .execute(drop_nodes_aql, vars)
            .await
            .map_err(topograph_core::CoreError::from)?;
    }
    info!(tmos = all_ids.len(), nodes = node_ids.len(), "schema branch deleted");
    Ok(())
}
