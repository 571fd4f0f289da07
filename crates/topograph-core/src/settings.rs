//! Projection settings: reading the TMO configuration and applying a
//! settings update (enable/disable, grouping, start-from, trace, orphan
//! pruning).

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;

use topograph_model::config_doc::{
    DeleteOrphansDoc, GroupByDoc, StartFromDoc, TraceTmoDoc, TraceTprmDoc, DELETE_ORPHANS_KEY,
    GROUP_BY_KEY, START_FROM_KEY, TRACE_TMO_KEY, TRACE_TPRM_KEY,
};
use topograph_model::{Doc, TmoEdge, TmoNode};
use topograph_store::{BulkItem, BulkOptions};

use crate::checks;
use crate::context::ProjectionContext;
use crate::error::{CoreError, CoreResult};

/// A settings update request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SettingsUpdate {
    pub nodes: Option<Vec<EnableFlag>>,
    pub edges: Option<Vec<EnableFlag>>,
    pub group_by_tprms: Option<Vec<i64>>,
    pub start_from_tmo_id: Option<i64>,
    pub start_from_tprm_id: Option<i64>,
    pub trace_tmo_id: Option<i64>,
    pub trace_tprm_id: Option<i64>,
    #[serde(default)]
    pub delete_orphan_branches: Option<bool>,
}

/// Enable/disable flag for one TMO vertex or edge, by key.
#[derive(Debug, Clone, Deserialize)]
pub struct EnableFlag {
    pub key: String,
    pub enabled: bool,
}

/// The projection's current schema configuration.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaConfig {
    pub start_node_key: String,
    pub nodes: Vec<Doc<TmoNode>>,
    pub edges: Vec<Doc<TmoEdge>>,
    pub group_by_tprms: Vec<i64>,
    pub start_from_tmo_id: i64,
    pub start_from_tprm_id: Option<i64>,
    pub trace_tmo_id: Option<i64>,
    pub trace_tprm_id: Option<i64>,
    pub delete_orphan_branches: bool,
}

/// Reads the schema layer and the settings documents.
pub async fn schema_config(ctx: &ProjectionContext) -> CoreResult<SchemaConfig> {
    let nodes: Vec<Doc<TmoNode>> = ctx.all_tmos().await?;
    let edges: Vec<Doc<TmoEdge>> = ctx.tmo_edge().all().await?;
    let start_from = ctx.start_from().await?;
    Ok(SchemaConfig {
        start_node_key: ctx.record.body.tmo_id.to_string(),
        nodes,
        edges,
        group_by_tprms: ctx.group_by_tprms().await?,
        start_from_tmo_id: start_from.tmo_id,
        start_from_tprm_id: start_from.tprm_id,
        trace_tmo_id: ctx.trace_tmo_id().await?,
        trace_tprm_id: ctx.trace_tprm_id().await?,
        delete_orphan_branches: ctx.delete_orphan_branches().await?,
    })
}

/// Validates and applies a settings update. Settings drive the next full
/// build; the instance layer is not touched here.
#[instrument(skip_all, fields(key = %ctx.key))]
pub async fn apply_settings(ctx: &ProjectionContext, update: &SettingsUpdate) -> CoreResult<()> {
    let effective_group_by = match &update.group_by_tprms {
        Some(tprms) => tprms.clone(),
        None => ctx.group_by_tprms().await?,
    };
    let start_tmo = update
        .start_from_tmo_id
        .unwrap_or(ctx.record.body.tmo_id);

    if let Some(group_by) = &update.group_by_tprms {
        checks::check_group_by_order(ctx, group_by, start_tmo).await?;
    }
    checks::check_start_from(
        ctx,
        update.start_from_tmo_id,
        update.start_from_tprm_id,
        &effective_group_by,
    )
    .await?;
    checks::check_trace_settings(ctx, update.trace_tmo_id, update.trace_tprm_id).await?;

    if let Some(flags) = &update.nodes {
        toggle_documents(ctx, &ctx.names.tmo_collection, flags).await?;
    }
    if let Some(flags) = &update.edges {
        toggle_documents(ctx, &ctx.names.tmo_edge_collection, flags).await?;
    }

    if let Some(group_by) = &update.group_by_tprms {
        upsert_config(
            ctx,
            GROUP_BY_KEY,
            &GroupByDoc {
                tprms: group_by.clone(),
            },
        )
        .await?;
    }
    if let Some(tmo_id) = update.start_from_tmo_id {
        upsert_config(
            ctx,
            START_FROM_KEY,
            &StartFromDoc {
                tmo_id,
                tprm_id: update.start_from_tprm_id,
            },
        )
        .await?;
    }
    if let Some(tmo_id) = update.trace_tmo_id {
        upsert_config(ctx, TRACE_TMO_KEY, &TraceTmoDoc { tmo_id }).await?;
    }
    if let Some(tprm_id) = update.trace_tprm_id {
        upsert_config(ctx, TRACE_TPRM_KEY, &TraceTprmDoc { tprm_id }).await?;
    }
    if let Some(flag) = update.delete_orphan_branches {
        upsert_config(
            ctx,
            DELETE_ORPHANS_KEY,
            &DeleteOrphansDoc {
                delete_orphan_branches: flag,
            },
        )
        .await?;
    }
    Ok(())
}

async fn toggle_documents(
    ctx: &ProjectionContext,
    collection: &str,
    flags: &[EnableFlag],
) -> CoreResult<()> {
    if flags.is_empty() {
        return Ok(());
    }
    let docs: Vec<serde_json::Value> = flags
        .iter()
        .map(|flag| json!({ "_key": flag.key, "enabled": flag.enabled }))
        .collect();
    let items: Vec<BulkItem<serde_json::Value>> = ctx
        .db
        .collection(collection)
        .update_many(&docs, BulkOptions::default())
        .await?;
    for item in items {
        item.into_result()
            .map_err(|err| CoreError::Validation(err.to_string()))?;
    }
    Ok(())
}

/// Writes a config singleton under its well-known key, replacing any
/// previous value.
pub async fn upsert_config<T: Serialize>(
    ctx: &ProjectionContext,
    key: &str,
    value: &T,
) -> CoreResult<()> {
    let mut doc = serde_json::to_value(value)?;
    doc["_key"] = json!(key);
    let item: BulkItem<serde_json::Value> = ctx
        .config()
        .insert(&doc, BulkOptions::replacing())
        .await?;
    item.into_result()
        .map_err(|err| CoreError::Validation(err.to_string()))?;
    Ok(())
}

/// Drops a config singleton, ignoring a missing one.
pub async fn delete_config(ctx: &ProjectionContext, key: &str) -> CoreResult<()> {
    ctx.config().remove(key).await?;
    Ok(())
}

/// Removes every reference to the given TMOs from the settings documents.
/// Used when a TMO leaves the projection.
pub async fn drop_tmo_references(ctx: &ProjectionContext, tmo_ids: &[i64]) -> CoreResult<()> {
    if let Some(trace_tmo) = ctx.trace_tmo_id().await? {
        if tmo_ids.contains(&trace_tmo) {
            delete_config(ctx, TRACE_TMO_KEY).await?;
            delete_config(ctx, TRACE_TPRM_KEY).await?;
        }
    }
    let start_from: Option<StartFromDoc> = ctx.config().get(START_FROM_KEY).await?;
    if let Some(start_from) = start_from {
        if tmo_ids.contains(&start_from.tmo_id) {
            delete_config(ctx, START_FROM_KEY).await?;
        }
    }
    let group_by = ctx.group_by_tprms().await?;
    if !group_by.is_empty() {
        let owned = owned_tprms(ctx, tmo_ids, &group_by).await?;
        if !owned.is_empty() {
            let remaining: Vec<i64> = group_by.into_iter().filter(|t| !owned.contains(t)).collect();
            upsert_config(ctx, GROUP_BY_KEY, &GroupByDoc { tprms: remaining }).await?;
        }
    }
    Ok(())
}

/// Of `tprm_ids`, those owned by one of `tmo_ids`.
async fn owned_tprms(
    ctx: &ProjectionContext,
    tmo_ids: &[i64],
    tprm_ids: &[i64],
) -> CoreResult<Vec<i64>> {
    let aql = r"
        FOR node IN @@tmo
            FILTER node.id IN @tmoIds
            FILTER NOT_NULL(node.params)
            FOR param IN node.params
                FILTER param.id IN @tprmIds
                RETURN param.id
    ";
    let vars = topograph_store::database::bind([
        ("@tmo", json!(ctx.names.tmo_collection)),
        ("tmoIds", json!(tmo_ids)),
        ("tprmIds", json!(tprm_ids)),
    ]);
    Ok(ctx.db.query_all(aql, vars).await?)
}
