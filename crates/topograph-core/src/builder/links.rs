//! Pass 4: semantic links.
//!
//! For every enabled non-`p_id` schema edge leaving a TMO, instance edges
//! are derived by scanning the stored MO parameters (for link TPRMs) or the
//! point ids (for point constraints). Targets resolve by
//! `data.id IN mo_ids AND tmo IN to_tmo_ids`.

use std::collections::HashMap;

use serde_json::json;
use tracing::instrument;

use topograph_model::{ConnectionKind, Doc, LinkKind, MoEdge, MoNode, PrmValue, TmoEdge, TmoNode};
use topograph_store::database::bind;

use super::BuildSettings;
use crate::context::ProjectionContext;
use crate::error::{CoreError, CoreResult};
use crate::graph_ops::{self, QUERY_ITEMS_LIMIT};

/// One group of outgoing schema edges sharing link type and TPRM.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintFilter {
    pub link_type: LinkKind,
    pub tprm_id: Option<i64>,
    pub to_tmo_ids: Vec<i64>,
}

/// Groups a TMO's enabled outgoing non-`p_id` edges by `(link_type, tprm)`.
pub fn constraint_filters(edges: &[Doc<TmoEdge>]) -> Vec<ConstraintFilter> {
    let mut grouped: Vec<ConstraintFilter> = Vec::new();
    let mut sorted: Vec<&Doc<TmoEdge>> = edges.iter().collect();
    sorted.sort_by(|a, b| {
        (a.body.link_type.as_str(), a.body.tprm_id)
            .cmp(&(b.body.link_type.as_str(), b.body.tprm_id))
    });
    for edge in sorted {
        let to_tmo_id = topograph_model::GraphNames::tmo_id_of(&edge.body.to);
        let Some(to_tmo_id) = to_tmo_id else { continue };
        match grouped.last_mut() {
            Some(last)
                if last.link_type == edge.body.link_type && last.tprm_id == edge.body.tprm_id =>
            {
                last.to_tmo_ids.push(to_tmo_id);
            }
            _ => grouped.push(ConstraintFilter {
                link_type: edge.body.link_type,
                tprm_id: edge.body.tprm_id,
                to_tmo_ids: vec![to_tmo_id],
            }),
        }
    }
    grouped
}

/// Walks the TMO tree from the root creating semantic links level by level.
#[instrument(skip_all)]
pub async fn create_links_from_root(
    ctx: &ProjectionContext,
    root_tmo_id: i64,
    settings: &BuildSettings,
) -> CoreResult<()> {
    let root: Doc<TmoNode> = ctx
        .tmo()
        .get(&root_tmo_id.to_string())
        .await?
        .ok_or_else(|| {
            CoreError::StartNodeNotFound(format!("Node with tmo id {root_tmo_id} not found"))
        })?;
    create_links_level(ctx, &root, settings).await
}

async fn create_links_level(
    ctx: &ProjectionContext,
    tmo: &Doc<TmoNode>,
    settings: &BuildSettings,
) -> CoreResult<()> {
    for filter in outgoing_filters(ctx, &tmo.id).await? {
        create_links_by_constraint(ctx, &tmo.body, &filter).await?;
    }
    for child in graph_ops::find_child_tmos(ctx, &tmo.id).await? {
        if settings.trace_tmo_id == Some(child.node.body.tmo_id) {
            continue;
        }
        Box::pin(create_links_level(ctx, &child.node, settings)).await?;
    }
    Ok(())
}

async fn outgoing_filters(
    ctx: &ProjectionContext,
    tmo_doc_id: &str,
) -> CoreResult<Vec<ConstraintFilter>> {
    let aql = r#"
        FOR doc IN @@tmoEdge
            FILTER doc.enabled == true
            FILTER doc.link_type != 'p_id'
            FILTER doc._from == @tmoDbId
            RETURN doc
    "#;
    let vars = bind([
        ("@tmoEdge", json!(ctx.names.tmo_edge_collection)),
        ("tmoDbId", json!(tmo_doc_id)),
    ]);
    let edges: Vec<Doc<TmoEdge>> = ctx.db.query_all(aql, vars).await?;
    Ok(constraint_filters(&edges))
}

/// Creates instance edges for one constraint filter.
pub async fn create_links_by_constraint(
    ctx: &ProjectionContext,
    tmo: &TmoNode,
    filter: &ConstraintFilter,
) -> CoreResult<()> {
    match filter.link_type {
        LinkKind::MoLink => {
            link_by_params(ctx, tmo, filter, ConnectionKind::MoLink).await
        }
        LinkKind::TwoWayLink => {
            link_by_params(ctx, tmo, filter, ConnectionKind::TwoWayLink).await
        }
        LinkKind::PointConstraint => {
            link_by_point(ctx, tmo, filter, "point_a_id", ConnectionKind::PointA).await?;
            link_by_point(ctx, tmo, filter, "point_b_id", ConnectionKind::PointB).await
        }
        LinkKind::PId => Err(CoreError::GraphBuildingError(
            "Edge creation error. Link type not supported".to_string(),
        )),
    }
}

#[derive(Debug, serde::Deserialize)]
struct OutgoingRef {
    #[serde(rename = "_from")]
    from: String,
    to_mo_id: PrmValue,
    #[serde(default)]
    prm_id: Option<i64>,
    #[serde(default)]
    tprm_id: Option<i64>,
}

/// Inverts outgoing references: target MO id → the sources pointing at it.
fn invert_refs(rows: Vec<OutgoingRef>) -> HashMap<i64, Vec<OutgoingRef>> {
    let mut inverted: HashMap<i64, Vec<OutgoingRef>> = HashMap::new();
    for row in rows {
        for target in row.to_mo_id.ids() {
            inverted.entry(target).or_default().push(OutgoingRef {
                from: row.from.clone(),
                to_mo_id: PrmValue::Int(target),
                prm_id: row.prm_id,
                tprm_id: row.tprm_id,
            });
        }
    }
    inverted
}

async fn link_by_params(
    ctx: &ProjectionContext,
    tmo: &TmoNode,
    filter: &ConstraintFilter,
    connection_type: ConnectionKind,
) -> CoreResult<()> {
    let aql = r#"
        FOR doc IN @@main
            FILTER doc.tmo == @tmoId
            FILTER NOT_NULL(doc.data.params)
            FOR param IN doc.data.params
                FILTER param.tprm_id == @tprmId
                LIMIT @offset, @limit
                RETURN { "_from": doc._id, "to_mo_id": param.value,
                         "prm_id": param.id, "tprm_id": param.tprm_id }
    "#;
    let mut rows: Vec<OutgoingRef> = Vec::new();
    let mut offset = 0;
    loop {
        let vars = bind([
            ("@main", json!(ctx.names.main_collection)),
            ("tmoId", json!(tmo.tmo_id)),
            ("tprmId", json!(filter.tprm_id)),
            ("offset", json!(offset)),
            ("limit", json!(QUERY_ITEMS_LIMIT)),
        ]);
        let page: Vec<OutgoingRef> = ctx.db.query_all(aql, vars).await?;
        let page_len = page.len();
        rows.extend(page);
        if page_len < QUERY_ITEMS_LIMIT {
            break;
        }
        offset += page_len;
    }
    emit_links(ctx, filter, invert_refs(rows), connection_type).await
}

async fn link_by_point(
    ctx: &ProjectionContext,
    tmo: &TmoNode,
    filter: &ConstraintFilter,
    point_field: &str,
    connection_type: ConnectionKind,
) -> CoreResult<()> {
    let aql = format!(
        r#"
        FOR doc IN @@main
            FILTER doc.tmo == @tmoId
            FILTER NOT_NULL(doc.data.{point_field})
            LIMIT @offset, @limit
            RETURN {{ "_from": doc._id, "to_mo_id": doc.data.{point_field} }}
    "#
    );
    let mut rows: Vec<OutgoingRef> = Vec::new();
    let mut offset = 0;
    loop {
        let vars = bind([
            ("@main", json!(ctx.names.main_collection)),
            ("tmoId", json!(tmo.tmo_id)),
            ("offset", json!(offset)),
            ("limit", json!(QUERY_ITEMS_LIMIT)),
        ]);
        let page: Vec<OutgoingRef> = ctx.db.query_all(&aql, vars).await?;
        let page_len = page.len();
        rows.extend(page);
        if page_len < QUERY_ITEMS_LIMIT {
            break;
        }
        offset += page_len;
    }
    emit_links(ctx, filter, invert_refs(rows), connection_type).await
}

/// Resolves targets chunk by chunk and writes the edges.
async fn emit_links(
    ctx: &ProjectionContext,
    filter: &ConstraintFilter,
    inverted: HashMap<i64, Vec<OutgoingRef>>,
    connection_type: ConnectionKind,
) -> CoreResult<()> {
    if inverted.is_empty() {
        return Ok(());
    }
    let mo_ids: Vec<i64> = inverted.keys().copied().collect();
    let aql = r"
        FOR doc IN @@main
            FILTER doc.data.id IN @moIds
            FILTER doc.tmo IN @tmoIds
            LIMIT @offset, @limit
            RETURN doc
    ";
    let mut offset = 0;
    loop {
        let vars = bind([
            ("@main", json!(ctx.names.main_collection)),
            ("moIds", json!(mo_ids)),
            ("tmoIds", json!(filter.to_tmo_ids)),
            ("offset", json!(offset)),
            ("limit", json!(QUERY_ITEMS_LIMIT)),
        ]);
        let targets: Vec<Doc<MoNode>> = ctx.db.query_all(aql, vars).await?;
        let page_len = targets.len();
        let mut edges: Vec<MoEdge> = Vec::new();
        for target in &targets {
            let Some(data) = &target.body.data else { continue };
            let Some(sources) = inverted.get(&data.id) else { continue };
            for source in sources {
                edges.push(MoEdge {
                    from: source.from.clone(),
                    to: target.id.clone(),
                    connection_type,
                    prm: source.prm_id.map(|id| vec![id]),
                    tprm: source.tprm_id,
                    is_trace: target.body.is_trace,
                    is_virtual: false,
                    source_id: Some(source.from.clone()),
                });
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

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tmo_edge(link_type: LinkKind, tprm_id: Option<i64>, to: i64) -> Doc<TmoEdge> {
        Doc {
            id: format!("tmoEdge/{to}"),
            key: to.to_string(),
            rev: "1".into(),
            body: TmoEdge {
                from: "tmo/1".into(),
                to: format!("tmo/{to}"),
                link_type,
                enabled: true,
                tprm_id,
            },
        }
    }

    #[test]
    fn filters_group_by_link_type_and_tprm() {
        let edges = vec![
            tmo_edge(LinkKind::MoLink, Some(9), 3),
            tmo_edge(LinkKind::MoLink, Some(9), 4),
            tmo_edge(LinkKind::MoLink, Some(11), 5),
            tmo_edge(LinkKind::PointConstraint, None, 6),
        ];
        let filters = constraint_filters(&edges);
        assert_eq!(filters.len(), 3);
        assert_eq!(
            filters[0],
            ConstraintFilter {
                link_type: LinkKind::MoLink,
                tprm_id: Some(9),
                to_tmo_ids: vec![3, 4],
            }
        );
        assert_eq!(filters[1].tprm_id, Some(11));
        assert_eq!(filters[2].link_type, LinkKind::PointConstraint);
    }

    #[test]
    fn invert_handles_scalar_and_list_targets() {
        let rows = vec![
            OutgoingRef {
                from: "main/a".into(),
                to_mo_id: PrmValue::List(vec![PrmValue::Int(7), PrmValue::Int(8)]),
                prm_id: Some(50),
                tprm_id: Some(9),
            },
            OutgoingRef {
                from: "main/b".into(),
                to_mo_id: PrmValue::Int(7),
                prm_id: Some(51),
                tprm_id: Some(9),
            },
        ];
        let inverted = invert_refs(rows);
        assert_eq!(inverted[&7].len(), 2);
        assert_eq!(inverted[&8].len(), 1);
        assert_eq!(inverted[&8][0].from, "main/a");
    }
}
