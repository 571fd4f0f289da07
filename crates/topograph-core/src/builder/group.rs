//! Pass 7: grouping nodes.
//!
//! For each configured grouping TPRM (outermost first), real vertices
//! carrying that parameter are partitioned by `(parent vertex, value)`; each
//! partition gets one synthetic grouping vertex that takes over the `p_id`
//! link to the former parent, with the members re-parented under it.
//! Chained TPRMs nest by running the partitions in configured order.

use std::collections::{BTreeMap, HashSet};

use serde_json::json;
use tracing::instrument;

use topograph_inventory::InventoryApi;
use topograph_model::record::val_type;
use topograph_model::{Doc, MoEdge, MoNode, PrmDto, PrmValue, Tprm};
use topograph_store::database::bind;

use super::BuildSettings;
use crate::context::ProjectionContext;
use crate::error::CoreResult;
use crate::graph_ops;

/// One partition of member vertices sharing parent and value.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupPartition {
    /// `_id` of the former parent vertex (edge target), if any.
    pub parent_vertex: Option<String>,
    /// Inventory parent id shared by the members.
    pub parent_mo_id: Option<i64>,
    pub value: PrmValue,
    pub member_ids: Vec<String>,
    pub mo_ids: Vec<i64>,
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct MemberRow {
    pub id: String,
    pub mo_ids: Vec<i64>,
    pub tmo_id: i64,
    pub param: PrmDto,
    pub parent_vertex: Option<String>,
    pub p_id: Option<i64>,
}

/// Partitions member rows by `(parent vertex, stringified value)`. Rows are
/// sorted so partitions come out deterministic.
pub(crate) fn partition_members(rows: Vec<MemberRow>) -> Vec<(i64, GroupPartition)> {
    let mut buckets: BTreeMap<(String, String), (i64, GroupPartition)> = BTreeMap::new();
    for row in rows {
        let parent_key = row.parent_vertex.clone().unwrap_or_default();
        let value_key = row.param.value.stringify();
        let entry = buckets
            .entry((parent_key, value_key))
            .or_insert_with(|| {
                (
                    row.tmo_id,
                    GroupPartition {
                        parent_vertex: row.parent_vertex.clone(),
                        parent_mo_id: row.p_id,
                        value: row.param.value.clone(),
                        member_ids: Vec::new(),
                        mo_ids: Vec::new(),
                    },
                )
            });
        entry.1.member_ids.push(row.id);
        for mo_id in row.mo_ids {
            if !entry.1.mo_ids.contains(&mo_id) {
                entry.1.mo_ids.push(mo_id);
            }
        }
    }
    buckets.into_values().collect()
}

/// Runs the grouping pass.
#[instrument(skip_all)]
pub async fn group_nodes(
    ctx: &ProjectionContext,
    inventory: &dyn InventoryApi,
    settings: &BuildSettings,
) -> CoreResult<()> {
    if settings.group_by_tprms.is_empty() {
        return Ok(());
    }
    let tprm_data = graph_ops::tprms_from_store(ctx, &settings.group_by_tprms).await?;
    for tprm_id in &settings.group_by_tprms {
        let Some(tprm) = tprm_data.get(tprm_id) else { continue };
        let rows = member_rows(ctx, *tprm_id).await?;
        for (tmo_id, partition) in partition_members(rows) {
            let name = group_name(inventory, tprm, &partition.value).await?;
            let node = MoNode {
                grouped_by_tprm: Some(*tprm_id),
                group_p_id: partition.parent_mo_id,
                name,
                label: None,
                tmo: tmo_id,
                mo_ids: partition.mo_ids.clone(),
                is_trace: false,
                data: None,
                indexed: None,
                breadcrumbs: MoNode::root_breadcrumbs(),
            };
            let stored = graph_ops::insert_nodes(ctx, &[node]).await?;
            let Some(group_vertex) = stored.into_iter().next() else { continue };
            rewire_partition(ctx, &partition, &group_vertex).await?;
        }
    }
    Ok(())
}

/// Member vertices of one grouping TPRM with their current parent edge.
async fn member_rows(ctx: &ProjectionContext, tprm_id: i64) -> CoreResult<Vec<MemberRow>> {
    let aql = r#"
        FOR doc IN @@main
            FILTER NOT_NULL(doc.data.params)
            FOR param IN doc.data.params
                FILTER param.tprm_id == @tprmId
                LET edges = (
                    FOR edge IN @@mainEdge
                        FILTER edge._from == doc._id
                        FILTER edge.connection_type == "p_id"
                        LIMIT 1
                        RETURN edge._to
                )
                RETURN { "id": doc._id, "mo_ids": doc.mo_ids, "tmo_id": doc.tmo,
                         "param": param, "parent_vertex": FIRST(edges),
                         "p_id": doc.data.p_id }
    "#;
    let vars = bind([
        ("@main", json!(ctx.names.main_collection)),
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("tprmId", json!(tprm_id)),
    ]);
    Ok(ctx.db.query_all(aql, vars).await?)
}

/// The grouping vertex name: link values resolve to the linked MO names /
/// PRM values, everything else stringifies canonically.
pub(crate) async fn group_name(
    inventory: &dyn InventoryApi,
    tprm: &Tprm,
    value: &PrmValue,
) -> CoreResult<String> {
    let resolved = match tprm.val_type.as_str() {
        val_type::MO_LINK | val_type::TWO_WAY_LINK => {
            let ids = value.ids();
            let names = inventory.mo_names(&ids).await?;
            let resolved: Vec<PrmValue> = ids
                .iter()
                .map(|id| PrmValue::Str(names.get(id).cloned().unwrap_or_default()))
                .collect();
            if matches!(value, PrmValue::List(_)) {
                PrmValue::List(resolved)
            } else {
                resolved.into_iter().next().unwrap_or(PrmValue::Null)
            }
        }
        val_type::PRM_LINK => {
            let ids = value.ids();
            let prms = inventory.prm_map(&ids).await?;
            let resolved: Vec<PrmValue> = ids
                .iter()
                .map(|id| prms.get(id).map(|p| p.value.clone()).unwrap_or(PrmValue::Null))
                .collect();
            if matches!(value, PrmValue::List(_)) {
                PrmValue::List(resolved)
            } else {
                resolved.into_iter().next().unwrap_or(PrmValue::Null)
            }
        }
        _ => value.clone(),
    };
    Ok(resolved.stringify())
}

/// Re-parents the members under the grouping vertex and links the grouping
/// vertex to the former parent; the members' old `p_id` edges are dropped.
async fn rewire_partition(
    ctx: &ProjectionContext,
    partition: &GroupPartition,
    group_vertex: &Doc<MoNode>,
) -> CoreResult<()> {
    let mut edges: Vec<MoEdge> = Vec::new();
    if let Some(parent_vertex) = &partition.parent_vertex {
        edges.push(MoEdge::parent_link(&group_vertex.id, parent_vertex, false));
    }
    for member in &partition.member_ids {
        edges.push(MoEdge::parent_link(member, &group_vertex.id, false));
    }
    graph_ops::insert_edges(ctx, &edges).await?;

    if let Some(parent_vertex) = &partition.parent_vertex {
        let aql = r#"
            FOR doc IN @@mainEdge
                FILTER doc.connection_type == "p_id"
                FILTER doc._to != @groupId
                FILTER doc._to == @oldParentId
                FILTER doc._from IN @memberIds
                REMOVE doc._key IN @@mainEdge
        "#;
        let vars = bind([
            ("@mainEdge", json!(ctx.names.main_edge_collection)),
            ("groupId", json!(group_vertex.id)),
            ("oldParentId", json!(parent_vertex)),
            ("memberIds", json!(partition.member_ids)),
        ]);
        ctx.db.execute(aql, vars).await?;
    }
    Ok(())
}

/// Finds or creates the grouping vertex one member joins, by the
/// `(grouped_by_tprm, group_p_id, name)` triple. Used by the updater.
pub async fn find_or_create_group_vertex(
    ctx: &ProjectionContext,
    inventory: &dyn InventoryApi,
    tprm: &Tprm,
    member: &Doc<MoNode>,
    value: &PrmValue,
    parent_mo_id: Option<i64>,
) -> CoreResult<(Doc<MoNode>, bool)> {
    let name = group_name(inventory, tprm, value).await?;
    let aql = r"
        FOR node IN @@main
            FILTER node.grouped_by_tprm == @tprmId
            FILTER node.group_p_id == @pId
            FILTER node.name == @groupName
            LIMIT 1
            RETURN node
    ";
    let vars = bind([
        ("@main", json!(ctx.names.main_collection)),
        ("tprmId", json!(tprm.id)),
        ("pId", json!(parent_mo_id)),
        ("groupName", json!(name)),
    ]);
    let existing: Vec<Doc<MoNode>> = ctx.db.query_all(aql, vars).await?;
    let member_mo_ids: HashSet<i64> = member.body.mo_ids.iter().copied().collect();
    if let Some(mut found) = existing.into_iter().next() {
        let missing: Vec<i64> = member_mo_ids
            .iter()
            .filter(|id| !found.body.mo_ids.contains(id))
            .copied()
            .collect();
        if !missing.is_empty() {
            found.body.mo_ids.extend(missing);
            graph_ops::update_nodes(ctx, std::slice::from_ref(&found)).await?;
        }
        return Ok((found, false));
    }
    let node = MoNode {
        grouped_by_tprm: Some(tprm.id),
        group_p_id: parent_mo_id,
        name,
        label: None,
        tmo: member.body.tmo,
        mo_ids: member.body.mo_ids.clone(),
        is_trace: false,
        data: None,
        indexed: None,
        breadcrumbs: MoNode::root_breadcrumbs(),
    };
    let stored = graph_ops::insert_nodes(ctx, &[node]).await?;
    let vertex = stored.into_iter().next().ok_or_else(|| {
        crate::error::CoreError::GraphBuildingError("grouping vertex not stored".to_string())
    })?;
    Ok((vertex, true))
}

/// Removes one member from a grouping vertex, deleting the vertex when it
/// empties. Returns whether the grouping vertex was deleted.
pub async fn leave_group_vertex(
    ctx: &ProjectionContext,
    group_vertex: &Doc<MoNode>,
    member: &Doc<MoNode>,
) -> CoreResult<bool> {
    // drop the member's p_id edge into the group
    let aql = r#"
        FOR edge IN @@mainEdge
            FILTER edge._from == @memberId
            FILTER edge._to == @groupId
            FILTER edge.connection_type == "p_id"
            REMOVE edge._key IN @@mainEdge
    "#;
    let vars = bind([
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("memberId", json!(member.id)),
        ("groupId", json!(group_vertex.id)),
    ]);
    ctx.db.execute(aql, vars).await?;

    let member_mo_ids: HashSet<i64> = member.body.mo_ids.iter().copied().collect();
    let remaining: Vec<i64> = group_vertex
        .body
        .mo_ids
        .iter()
        .filter(|id| !member_mo_ids.contains(id))
        .copied()
        .collect();
    if remaining.is_empty() {
        graph_ops::delete_edges_touching(ctx, std::slice::from_ref(&group_vertex.id)).await?;
        ctx.main().remove(&group_vertex.key).await?;
        return Ok(true);
    }
    let mut updated = group_vertex.clone();
    updated.body.mo_ids = remaining;
    graph_ops::update_nodes(ctx, &[updated]).await?;
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn row(id: &str, mo_id: i64, parent: Option<&str>, value: PrmValue) -> MemberRow {
        MemberRow {
            id: id.to_string(),
            mo_ids: vec![mo_id],
            tmo_id: 42600,
            param: PrmDto {
                id: mo_id * 10,
                tprm_id: 11,
                mo_id,
                value,
                version: 1,
                parsed_value: None,
            },
            parent_vertex: parent.map(String::from),
            p_id: parent.map(|_| 5),
        }
    }

    #[test]
    fn partitions_by_parent_and_value() {
        let rows = vec![
            row("main/a", 1, Some("main/p"), PrmValue::Str("1G".into())),
            row("main/b", 2, Some("main/p"), PrmValue::Str("1G".into())),
            row("main/c", 3, Some("main/p"), PrmValue::Str("10G".into())),
            row("main/d", 4, Some("main/q"), PrmValue::Str("1G".into())),
        ];
        let partitions = partition_members(rows);
        assert_eq!(partitions.len(), 3);
        // grouped (parent=p, value=1G) has both members with merged mo_ids
        let ab = partitions
            .iter()
            .find(|(_, p)| p.member_ids.contains(&"main/a".to_string()))
            .map(|(_, p)| p)
            .unwrap();
        assert_eq!(ab.member_ids, vec!["main/a", "main/b"]);
        assert_eq!(ab.mo_ids, vec![1, 2]);
        assert_eq!(ab.parent_vertex.as_deref(), Some("main/p"));
    }

    #[test]
    fn parentless_members_partition_together() {
        let rows = vec![
            row("main/a", 1, None, PrmValue::Int(7)),
            row("main/b", 2, None, PrmValue::Int(7)),
        ];
        let partitions = partition_members(rows);
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].1.parent_vertex, None);
    }
}
