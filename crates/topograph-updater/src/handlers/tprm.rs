//! TPRM change handlers: settings references and the schema layer's
//! parameter lists / derived link edges.

use std::collections::{HashMap, HashSet};

use serde_json::json;
use tracing::instrument;

use topograph_core::{settings, ProjectionContext};
use topograph_inventory::InventoryApi;
use topograph_model::config_doc::{GroupByDoc, StartFromDoc, GROUP_BY_KEY, START_FROM_KEY, TRACE_TPRM_KEY};
use topograph_model::record::val_type;
use topograph_model::{ChangeOp, Doc, LinkKind, TmoEdge, TmoNode, Tprm};
use topograph_store::database::bind;
use topograph_store::{BulkItem, BulkOptions};

use super::tmo::dissolve_groupings;
use crate::error::UpdaterResult;

/// Scrubs deleted TPRMs out of grouping, trace and start-from settings.
#[instrument(skip_all, fields(key = %ctx.key, ?op))]
pub async fn settings_update(
    ctx: &ProjectionContext,
    op: ChangeOp,
    tprms: &[Tprm],
) -> UpdaterResult<()> {
    if op != ChangeOp::Deleted {
        return Ok(());
    }
    let ids: HashSet<i64> = tprms.iter().map(|t| t.id).collect();

    let group_by = ctx.group_by_tprms().await?;
    let dropped: Vec<i64> = group_by
        .iter()
        .filter(|id| ids.contains(id))
        .copied()
        .collect();
    if !dropped.is_empty() {
        let remaining: Vec<i64> = group_by.into_iter().filter(|id| !ids.contains(id)).collect();
        settings::upsert_config(ctx, GROUP_BY_KEY, &GroupByDoc { tprms: remaining }).await?;
        dissolve_groupings(ctx, &dropped).await?;
    }

    if let Some(trace_tprm) = ctx.trace_tprm_id().await? {
        if ids.contains(&trace_tprm) {
            settings::delete_config(ctx, TRACE_TPRM_KEY).await?;
        }
    }

    let start_from: Option<StartFromDoc> = ctx
        .config()
        .get(START_FROM_KEY)
        .await
        .map_err(topograph_core::CoreError::from)?;
    if let Some(mut start_from) = start_from {
        if start_from.tprm_id.map_or(false, |id| ids.contains(&id)) {
            start_from.tprm_id = None;
            settings::upsert_config(ctx, START_FROM_KEY, &start_from).await?;
        }
    }
    Ok(())
}

/// Maintains the TPRM lists on TMO vertices and the `mo_link` schema edges
/// derived from link-TPRM constraints.
#[instrument(skip_all, fields(key = %ctx.key, ?op, count = tprms.len()))]
pub async fn schema_update(
    ctx: &ProjectionContext,
    inventory: &dyn InventoryApi,
    op: ChangeOp,
    tprms: Vec<Tprm>,
) -> UpdaterResult<()> {
    match op {
        ChangeOp::Created | ChangeOp::Updated => attach_tprms(ctx, inventory, tprms).await,
        ChangeOp::Deleted => detach_tprms(ctx, tprms).await,
    }
}

async fn tmo_docs(
    ctx: &ProjectionContext,
    tmo_ids: &[i64],
) -> UpdaterResult<HashMap<i64, Doc<TmoNode>>> {
    let docs = ctx.tmos_by_ids(tmo_ids).await?;
    Ok(docs.into_iter().map(|d| (d.body.tmo_id, d)).collect())
}

/// Attaches (or replaces) TPRMs on their owning TMO vertices and diffs the
/// link constraints into schema edges.
async fn attach_tprms(
    ctx: &ProjectionContext,
    inventory: &dyn InventoryApi,
    tprms: Vec<Tprm>,
) -> UpdaterResult<()> {
    let tmo_ids: Vec<i64> = {
        let mut ids: Vec<i64> = tprms.iter().map(|t| t.tmo_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    };
    let mut owners = tmo_docs(ctx, &tmo_ids).await?;
    let mut links_to_create: Vec<TmoEdge> = Vec::new();
    let mut link_keys_to_delete: Vec<String> = Vec::new();

    for mut tprm in tprms {
        let Some(owner) = owners.get_mut(&tprm.tmo_id) else {
            continue;
        };
        let old = owner.body.params.iter().find(|p| p.id == tprm.id).cloned();
        if tprm.is_mo_link() {
            if tprm.constraint.is_none() {
                let constraint = inventory.tprm_const(tprm.id).await?;
                tprm.constraint = Some(serde_json::to_string(&constraint).unwrap_or_default());
            }
            let new_targets: HashSet<i64> = tprm.constraint_tmo_ids().into_iter().collect();
            let old_targets: HashSet<i64> = old
                .as_ref()
                .map(|o| o.constraint_tmo_ids().into_iter().collect())
                .unwrap_or_default();
            let kind = if tprm.val_type == val_type::TWO_WAY_LINK {
                LinkKind::TwoWayLink
            } else {
                LinkKind::MoLink
            };
            for target in new_targets.difference(&old_targets) {
                links_to_create.push(TmoEdge {
                    from: owner.id.clone(),
                    to: ctx.names.tmo_doc_id(*target),
                    link_type: kind,
                    enabled: false,
                    tprm_id: Some(tprm.id),
                });
            }
            let removed: Vec<String> = old_targets
                .difference(&new_targets)
                .map(|id| ctx.names.tmo_doc_id(*id))
                .collect();
            if !removed.is_empty() {
                let keys = stale_link_keys(ctx, &owner.id, tprm.id, &removed).await?;
                link_keys_to_delete.extend(keys);
            }
        }
        owner.body.params.retain(|p| p.id != tprm.id);
        owner.body.params.push(tprm);
    }

    let to_update: Vec<&Doc<TmoNode>> = owners.values().collect();
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
    if !link_keys_to_delete.is_empty() {
        let docs: Vec<serde_json::Value> = link_keys_to_delete
            .iter()
            .map(|key| json!({ "_key": key }))
            .collect();
        ctx.tmo_edge()
            .delete_many(&docs)
            .await
            .map_err(topograph_core::CoreError::from)?;
    }
    Ok(())
}

async fn stale_link_keys(
    ctx: &ProjectionContext,
    owner_id: &str,
    tprm_id: i64,
    targets: &[String],
) -> UpdaterResult<Vec<String>> {
    let aql = r"
        FOR edge IN @@tmoEdge
            FILTER edge._from == @nodeId
            FILTER edge.tprm_id == @tprmId
            FILTER edge._to IN @targets
            RETURN edge._key
    ";
    let vars = bind([
        ("@tmoEdge", json!(ctx.names.tmo_edge_collection)),
        ("nodeId", json!(owner_id)),
        ("tprmId", json!(tprm_id)),
        ("targets", json!(targets)),
    ]);
    Ok(ctx
        .db
        .query_all(aql, vars)
        .await
        .map_err(topograph_core::CoreError::from)?)
}

/// Removes TPRMs from their owners, scrubs busy-parameter groups, and drops
/// the schema edges the TPRMs drove.
async fn detach_tprms(ctx: &ProjectionContext, tprms: Vec<Tprm>) -> UpdaterResult<()> {
    let tmo_ids: Vec<i64> = {
        let mut ids: Vec<i64> = tprms.iter().map(|t| t.tmo_id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    };
    let mut owners = tmo_docs(ctx, &tmo_ids).await?;
    let mut link_tprm_ids: Vec<i64> = Vec::new();

    for tprm in &tprms {
        let Some(owner) = owners.get_mut(&tprm.tmo_id) else {
            continue;
        };
        owner.body.params.retain(|p| p.id != tprm.id);
        for group in &mut owner.body.busy_parameter_groups {
            group.retain(|id| *id != tprm.id);
        }
        if tprm.is_mo_link() {
            link_tprm_ids.push(tprm.id);
        }
    }
    let to_update: Vec<&Doc<TmoNode>> = owners.values().collect();
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
    if !link_tprm_ids.is_empty() {
        let aql = r"
            FOR edge IN @@tmoEdge
                FILTER edge.tprm_id IN @tprmIds
                REMOVE edge._key IN @@tmoEdge
        ";
        let vars = bind([
            ("@tmoEdge", json!(ctx.names.tmo_edge_collection)),
            ("tprmIds", json!(link_tprm_ids)),
        ]);
        ctx.db
            .execute(aql, vars)
            .await
            .map_err(topograph_core::CoreError::from)?;
    }
    Ok(())
}
