//! Shared handler helpers: value typing against the stored schema, parsed
//! value resolution, index recomputation and grouping-chain maintenance.

use std::collections::HashMap;

use serde_json::json;

use topograph_core::builder::breadcrumbs::child_breadcrumbs;
use topograph_core::builder::BuildSettings;
use topograph_core::graph_ops;
use topograph_core::{CoreResult, ProjectionContext};
use topograph_inventory::InventoryApi;
use topograph_model::codec::{convert_value, resolve_mo_link, resolve_prm_link};
use topograph_model::record::val_type;
use topograph_model::{Doc, MoNode, ParsedValue, Prm, PrmDto, PrmValue, Tprm};
use topograph_store::database::bind;

use crate::error::UpdaterResult;

/// Types a raw change-stream value against its TPRM. Values that arrived
/// already typed (from the store) pass through.
pub fn type_value(value: PrmValue, tprm: &Tprm) -> UpdaterResult<PrmValue> {
    match value {
        PrmValue::Str(raw) => Ok(convert_value(&raw, tprm)?),
        typed => Ok(typed),
    }
}

/// Resolves the parsed value of a link-typed PRM, fetching the referenced
/// names/PRMs from the inventory.
pub async fn resolve_parsed(
    inventory: &dyn InventoryApi,
    value: &PrmValue,
    tprm: &Tprm,
) -> UpdaterResult<Option<ParsedValue>> {
    let parsed = match tprm.val_type.as_str() {
        val_type::MO_LINK | val_type::TWO_WAY_LINK => {
            let names = inventory.mo_names(&value.ids()).await?;
            Some(resolve_mo_link(value, &names))
        }
        val_type::PRM_LINK => {
            let prms = inventory.prm_map(&value.ids()).await?;
            Some(resolve_prm_link(value, &prms))
        }
        _ => None,
    };
    Ok(parsed)
}

/// Builds a fully typed and resolved [`PrmDto`] from a change-stream PRM.
pub async fn prm_dto(
    inventory: &dyn InventoryApi,
    prm: &Prm,
    tprm: &Tprm,
) -> UpdaterResult<PrmDto> {
    let value = type_value(prm.value.clone(), tprm)?;
    let parsed_value = resolve_parsed(inventory, &value, tprm).await?;
    Ok(PrmDto {
        id: prm.id,
        tprm_id: prm.tprm_id,
        mo_id: prm.mo_id,
        value,
        version: prm.version,
        parsed_value,
    })
}

/// Recomputes a vertex's `indexed` array from its returnable parameters.
pub fn update_index(node: &mut MoNode, tprms: &HashMap<i64, Tprm>) {
    let Some(data) = &node.data else {
        return;
    };
    let mut index = Vec::new();
    for param in &data.params {
        let Some(tprm) = tprms.get(&param.tprm_id) else {
            continue;
        };
        if !tprm.returnable {
            continue;
        }
        let value = param
            .parsed_value
            .as_ref()
            .map(|p| &p.value)
            .unwrap_or(&param.value);
        match value {
            PrmValue::List(items) => index.extend(items.iter().map(PrmValue::stringify)),
            PrmValue::Null => {}
            other => index.push(other.stringify()),
        }
    }
    node.indexed = Some(index);
}

/// Outbound `mo_link` edges for a freshly attached link-typed PRM, plus
/// their path pairs.
pub async fn create_mo_link_edges(
    ctx: &ProjectionContext,
    prm: &PrmDto,
    node: &Doc<MoNode>,
    trace_tmo_id: Option<i64>,
) -> UpdaterResult<Vec<Doc<topograph_model::MoEdge>>> {
    use topograph_model::{ConnectionKind, MoEdge, PathKey};
    use topograph_store::{BulkItem, BulkOptions};

    let targets = graph_ops::find_nodes_by_mo_ids(ctx, &prm.value.ids()).await?;
    if targets.is_empty() {
        return Ok(Vec::new());
    }
    let edges: Vec<MoEdge> = targets
        .iter()
        .map(|target| MoEdge {
            from: node.id.clone(),
            to: target.id.clone(),
            connection_type: ConnectionKind::MoLink,
            prm: Some(vec![prm.id]),
            tprm: Some(prm.tprm_id),
            is_trace: trace_tmo_id == Some(target.body.tmo),
            is_virtual: false,
            source_id: Some(node.id.clone()),
        })
        .collect();
    let stored = graph_ops::insert_edges(ctx, &edges).await?;
    let path_keys: Vec<PathKey> = stored
        .iter()
        .map(|edge| PathKey::new(edge.body.from.clone(), edge.body.to.clone()))
        .collect();
    let items: Vec<BulkItem<serde_json::Value>> = ctx
        .path_edge()
        .insert_many(&path_keys, BulkOptions::default())
        .await
        .map_err(topograph_core::CoreError::from)?;
    for item in items {
        item.into_result().map_err(topograph_core::CoreError::from)?;
    }
    Ok(stored)
}

/// Deletes every edge whose `prm` array carries one of the ids, shrinking
/// multi-PRM arrays instead of deleting when others remain.
pub async fn delete_edges_by_prm_ids(
    ctx: &ProjectionContext,
    prm_ids: &[i64],
) -> UpdaterResult<()> {
    use topograph_model::MoEdge;
    use topograph_store::{BulkItem, BulkOptions};

    if prm_ids.is_empty() {
        return Ok(());
    }
    let aql = r"
        FOR edge IN @@mainEdge
            FILTER NOT_NULL(edge.prm)
            FILTER LENGTH(INTERSECTION(edge.prm, @prmIds)) > 0
            RETURN edge
    ";
    let vars = bind([
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("prmIds", json!(prm_ids)),
    ]);
    let edges: Vec<Doc<MoEdge>> = ctx
        .db
        .query_all(aql, vars)
        .await
        .map_err(topograph_core::CoreError::from)?;
    let mut to_update: Vec<Doc<MoEdge>> = Vec::new();
    let mut to_delete: Vec<serde_json::Value> = Vec::new();
    for mut edge in edges {
        let remaining: Vec<i64> = edge
            .body
            .prm
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter(|id| !prm_ids.contains(id))
            .collect();
        if remaining.is_empty() {
            to_delete.push(json!({ "_key": edge.key }));
        } else {
            edge.body.prm = Some(remaining);
            to_update.push(edge);
        }
    }
    if !to_update.is_empty() {
        let items: Vec<BulkItem<serde_json::Value>> = ctx
            .main_edge()
            .update_many(&to_update, BulkOptions::default())
            .await
            .map_err(topograph_core::CoreError::from)?;
        for item in items {
            item.into_result().map_err(topograph_core::CoreError::from)?;
        }
    }
    if !to_delete.is_empty() {
        ctx.main_edge()
            .delete_many(&to_delete)
            .await
            .map_err(topograph_core::CoreError::from)?;
    }
    Ok(())
}

/// Rewrites a vertex's breadcrumbs from its (possibly new) parent, and every
/// descendant's by prefix substitution.
pub async fn rewrite_breadcrumbs(
    ctx: &ProjectionContext,
    node: &mut Doc<MoNode>,
    parent: Option<&Doc<MoNode>>,
) -> UpdaterResult<()> {
    let new_breadcrumbs = match parent {
        Some(parent) => child_breadcrumbs(&parent.body.breadcrumbs, &parent.key),
        None => MoNode::root_breadcrumbs(),
    };
    let old_prefix = format!("{}{}/", node.body.breadcrumbs, node.key);
    let new_prefix = format!("{new_breadcrumbs}{}/", node.key);
    node.body.breadcrumbs = new_breadcrumbs;
    graph_ops::update_nodes(ctx, std::slice::from_ref(node)).await?;
    if old_prefix != new_prefix {
        graph_ops::substitute_breadcrumbs(ctx, &old_prefix, &new_prefix).await?;
    }
    Ok(())
}

/// Spreads every non-`p_id` edge touching the given vertices or their
/// children, and re-runs service-by-line forwarding for the affected lines.
pub async fn respread_around(
    ctx: &ProjectionContext,
    settings: &BuildSettings,
    node_ids: &[String],
) -> UpdaterResult<()> {
    use topograph_model::MoEdge;

    if node_ids.is_empty() {
        return Ok(());
    }
    let aql = r#"
        LET childrenIds = (
            FOR edge IN @@mainEdge
                FILTER edge.connection_type == "p_id"
                FILTER edge._to IN @nodeIds
                RETURN edge._from
        )
        LET allIds = APPEND(childrenIds, @nodeIds)
        FOR edge IN @@mainEdge
            FILTER edge.connection_type != "p_id"
            FILTER edge._from IN allIds OR edge._to IN allIds
            RETURN edge
    "#;
    let vars = bind([
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("nodeIds", json!(node_ids)),
    ]);
    let edges: Vec<Doc<MoEdge>> = ctx
        .db
        .query_all(aql, vars)
        .await
        .map_err(topograph_core::CoreError::from)?;
    spread_and_connect(ctx, settings, &edges).await
}

/// Spreads an explicit edge delta and forwards service-by-line links for the
/// lines those edges came from.
pub async fn spread_and_connect(
    ctx: &ProjectionContext,
    settings: &BuildSettings,
    edges: &[Doc<topograph_model::MoEdge>],
) -> UpdaterResult<()> {
    use topograph_core::builder::{lines, spread};

    if edges.is_empty() {
        return Ok(());
    }
    spread::spread_edges(ctx, settings, edges).await?;
    let source_ids: Vec<String> = {
        let mut ids: Vec<String> = edges
            .iter()
            .filter_map(|e| e.body.source_id.clone())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    };
    lines::connect_services_by_lines(ctx, settings, Some(source_ids)).await?;
    Ok(())
}

/// Fetches TPRM definitions from the schema layer for a set of PRMs.
pub async fn tprms_for_prms(
    ctx: &ProjectionContext,
    prms: &[Prm],
) -> CoreResult<HashMap<i64, Tprm>> {
    let mut tprm_ids: Vec<i64> = prms.iter().map(|p| p.tprm_id).collect();
    tprm_ids.sort_unstable();
    tprm_ids.dedup();
    graph_ops::tprms_from_store(ctx, &tprm_ids).await
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use topograph_model::{MoDto, ParsedValueTriggers};

    fn tprm(id: i64, val_type_str: &str, returnable: bool) -> Tprm {
        Tprm {
            id,
            tmo_id: 1,
            name: format!("p{id}"),
            val_type: val_type_str.into(),
            required: false,
            returnable,
            multiple: false,
            description: None,
            constraint: None,
            prm_link_filter: None,
            group: None,
            version: None,
        }
    }

    #[test]
    fn raw_strings_are_typed_once() {
        let t = tprm(1, val_type::INT, true);
        assert_eq!(
            type_value(PrmValue::Str("42".into()), &t).unwrap(),
            PrmValue::Int(42)
        );
        // already typed values pass through
        assert_eq!(
            type_value(PrmValue::Int(7), &t).unwrap(),
            PrmValue::Int(7)
        );
    }

    #[test]
    fn index_prefers_parsed_values() {
        let mut tprms = HashMap::new();
        tprms.insert(1, tprm(1, val_type::MO_LINK, true));
        tprms.insert(2, tprm(2, val_type::INT, false));

        let mut node = MoNode {
            grouped_by_tprm: None,
            group_p_id: None,
            name: "n".into(),
            label: None,
            tmo: 1,
            mo_ids: vec![1],
            is_trace: false,
            data: Some(MoDto {
                id: 1,
                tmo_id: 1,
                p_id: None,
                name: "n".into(),
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
                params: vec![
                    PrmDto {
                        id: 50,
                        tprm_id: 1,
                        mo_id: 1,
                        value: PrmValue::Int(7),
                        version: 1,
                        parsed_value: Some(ParsedValue {
                            raw_value: PrmValue::Int(7),
                            value: PrmValue::Str("MW-7".into()),
                            triggers: ParsedValueTriggers::default(),
                        }),
                    },
                    // not returnable: excluded
                    PrmDto {
                        id: 51,
                        tprm_id: 2,
                        mo_id: 1,
                        value: PrmValue::Int(9),
                        version: 1,
                        parsed_value: None,
                    },
                ],
            }),
            indexed: None,
            breadcrumbs: "/".into(),
        };
        update_index(&mut node, &tprms);
        assert_eq!(node.indexed, Some(vec!["MW-7".to_string()]));
    }
}
