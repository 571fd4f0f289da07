//! Shared store operations over one projection: node/edge lookups, bulk
//! writes with typed failures, hierarchy chains, grouping metadata and the
//! path-edge reconciliation used by both the builder and the updater.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value as Json};

use topograph_model::{
    ConnectionKind, Doc, GraphNames, MoEdge, MoNode, PathKey, TmoEdge, TmoNode, Tprm,
};
use topograph_store::database::bind;
use topograph_store::{BulkItem, BulkOptions};

use crate::context::ProjectionContext;
use crate::error::{CoreError, CoreResult};

/// Page size for offset-paginated scans.
pub const QUERY_ITEMS_LIMIT: usize = 1000;

/// A TMO child with the edge that links it to its parent.
#[derive(Debug, Clone)]
pub struct TmoChild {
    pub node: Doc<TmoNode>,
    pub edge: Doc<TmoEdge>,
}

/// Enabled `p_id` children of a TMO vertex, via the schema graph.
pub async fn find_child_tmos(
    ctx: &ProjectionContext,
    tmo_doc_id: &str,
) -> CoreResult<Vec<TmoChild>> {
    #[derive(serde::Deserialize)]
    struct Row {
        node: Doc<TmoNode>,
        edge: Doc<TmoEdge>,
    }
    let aql = r#"
        FOR v, e IN 1..1 INBOUND @tmo GRAPH @tmoGraph
            FILTER e.link_type == "p_id"
            RETURN { "node": v, "edge": e }
    "#;
    let vars = bind([
        ("tmo", json!(tmo_doc_id)),
        ("tmoGraph", json!(ctx.names.tmo_graph)),
    ]);
    let rows: Vec<Row> = ctx.db.query_all(aql, vars).await?;
    Ok(rows
        .into_iter()
        .map(|r| TmoChild {
            node: r.node,
            edge: r.edge,
        })
        .collect())
}

/// The `p_id` parent of a TMO vertex, if any.
pub async fn parent_tmo(
    ctx: &ProjectionContext,
    tmo_doc_id: &str,
) -> CoreResult<Option<Doc<TmoNode>>> {
    let aql = r#"
        FOR edge IN @@tmoEdge
            FILTER edge._from == @childId
            FILTER edge.link_type == "p_id"
            LIMIT 1
            RETURN edge._to
    "#;
    let vars = bind([
        ("@tmoEdge", json!(ctx.names.tmo_edge_collection)),
        ("childId", json!(tmo_doc_id)),
    ]);
    let parents: Vec<String> = ctx.db.query_all(aql, vars).await?;
    let Some(parent_id) = parents.into_iter().next() else {
        return Ok(None);
    };
    let parent = ctx
        .tmo()
        .get(GraphNames::doc_key(&parent_id))
        .await?
        .ok_or_else(|| {
            CoreError::NotFound(format!("Parent Node by link id {parent_id} not found"))
        })?;
    Ok(Some(parent))
}

/// Real MO vertex by its inventory id.
pub async fn find_node_by_mo_id(
    ctx: &ProjectionContext,
    mo_id: i64,
) -> CoreResult<Option<Doc<MoNode>>> {
    let aql = r"
        FOR node IN @@main
            FILTER node.data.id == @moId
            LIMIT 1
            RETURN node
    ";
    let vars = bind([
        ("@main", json!(ctx.names.main_collection)),
        ("moId", json!(mo_id)),
    ]);
    let nodes: Vec<Doc<MoNode>> = ctx.db.query_all(aql, vars).await?;
    Ok(nodes.into_iter().next())
}

/// Real MO vertices by inventory ids.
pub async fn find_nodes_by_mo_ids(
    ctx: &ProjectionContext,
    mo_ids: &[i64],
) -> CoreResult<Vec<Doc<MoNode>>> {
    if mo_ids.is_empty() {
        return Ok(Vec::new());
    }
    let aql = r"
        FOR node IN @@main
            FILTER node.data.id IN @moIds
            RETURN node
    ";
    let vars = bind([
        ("@main", json!(ctx.names.main_collection)),
        ("moIds", json!(mo_ids)),
    ]);
    Ok(ctx.db.query_all(aql, vars).await?)
}

/// The `p_id` ancestor chain of a vertex: the vertex itself first, then its
/// parents up to the root. Follows one parent per level (the invariant: at
/// most one outgoing `p_id` edge).
pub async fn hierarchy_chain(
    ctx: &ProjectionContext,
    node_id: &str,
) -> CoreResult<Vec<Doc<MoNode>>> {
    let mut chain = Vec::new();
    let mut current = node_id.to_string();
    loop {
        let node: Option<Doc<MoNode>> = ctx
            .main()
            .get(GraphNames::doc_key(&current))
            .await?;
        let Some(node) = node else { break };
        chain.push(node);
        let aql = r#"
            FOR edge IN @@mainEdge
                FILTER edge._from == @nodeId
                FILTER edge.connection_type == "p_id"
                LIMIT 1
                RETURN edge._to
        "#;
        let vars = bind([
            ("@mainEdge", json!(ctx.names.main_edge_collection)),
            ("nodeId", json!(current)),
        ]);
        let parents: Vec<String> = ctx.db.query_all(aql, vars).await?;
        match parents.into_iter().next() {
            Some(parent) if !chain.iter().any(|n| n.id == parent) => current = parent,
            _ => break,
        }
    }
    Ok(chain)
}

/// TMO ids whose MOs are line-geometry objects.
pub async fn line_tmo_ids(ctx: &ProjectionContext) -> CoreResult<HashSet<i64>> {
    let aql = r#"
        FOR node IN @@tmo
            FILTER node.geometry_type == "line"
            RETURN node.id
    "#;
    let vars = bind([("@tmo", json!(ctx.names.tmo_collection))]);
    let ids: Vec<i64> = ctx.db.query_all(aql, vars).await?;
    Ok(ids.into_iter().collect())
}

/// Grouping TPRMs per TMO, in configured order.
pub async fn groups_map(ctx: &ProjectionContext) -> CoreResult<HashMap<i64, Vec<i64>>> {
    let group_by = ctx.group_by_tprms().await?;
    if group_by.is_empty() {
        return Ok(HashMap::new());
    }
    #[derive(serde::Deserialize)]
    struct Row {
        tmo_id: i64,
        tprm_id: i64,
    }
    let aql = r#"
        FOR node IN @@tmo
            FILTER NOT_NULL(node.params)
            FOR param IN node.params
                FILTER param.id IN @tprmIds
                RETURN { "tmo_id": node.id, "tprm_id": param.id }
    "#;
    let vars = bind([
        ("@tmo", json!(ctx.names.tmo_collection)),
        ("tprmIds", json!(group_by)),
    ]);
    let rows: Vec<Row> = ctx.db.query_all(aql, vars).await?;
    let order: HashMap<i64, usize> = group_by.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let mut result: HashMap<i64, Vec<i64>> = HashMap::new();
    for row in rows {
        result.entry(row.tmo_id).or_default().push(row.tprm_id);
    }
    for tprms in result.values_mut() {
        tprms.sort_by_key(|id| order.get(id).copied().unwrap_or(usize::MAX));
    }
    Ok(result)
}

/// TPRM definitions by id, pulled from the stored TMO layer.
pub async fn tprms_from_store(
    ctx: &ProjectionContext,
    tprm_ids: &[i64],
) -> CoreResult<HashMap<i64, Tprm>> {
    if tprm_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let aql = r"
        FOR node IN @@tmo
            FILTER NOT_NULL(node.params)
            FOR param IN node.params
                FILTER param.id IN @tprmIds
                RETURN param
    ";
    let vars = bind([
        ("@tmo", json!(ctx.names.tmo_collection)),
        ("tprmIds", json!(tprm_ids)),
    ]);
    let tprms: Vec<Tprm> = ctx.db.query_all(aql, vars).await?;
    Ok(tprms.into_iter().map(|t| (t.id, t)).collect())
}

/// Enabled TMO vertices by id.
pub async fn enabled_tmos_by_ids(
    ctx: &ProjectionContext,
    tmo_ids: &[i64],
) -> CoreResult<HashMap<i64, Doc<TmoNode>>> {
    if tmo_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let aql = r"
        FOR node IN @@tmo
            FILTER node.id IN @tmoIds
            FILTER node.enabled == true
            RETURN node
    ";
    let vars = bind([
        ("@tmo", json!(ctx.names.tmo_collection)),
        ("tmoIds", json!(tmo_ids)),
    ]);
    let nodes: Vec<Doc<TmoNode>> = ctx.db.query_all(aql, vars).await?;
    Ok(nodes.into_iter().map(|n| (n.body.tmo_id, n)).collect())
}

/// Enabled `mo_link` TPRM ids per TMO, derived from the schema edges.
pub async fn enabled_mo_link_tprms(
    ctx: &ProjectionContext,
    tmo_ids: &[i64],
) -> CoreResult<HashMap<i64, HashSet<i64>>> {
    if tmo_ids.is_empty() {
        return Ok(HashMap::new());
    }
    #[derive(serde::Deserialize)]
    struct Row {
        tmo_node_id: String,
        tprm_id: Option<i64>,
    }
    let aql = r#"
        FOR edge IN @@tmoEdge
            FILTER edge.enabled == true
            FILTER edge.link_type == "mo_link"
            FILTER edge._from IN @tmoIds
            RETURN { "tmo_node_id": edge._from, "tprm_id": edge.tprm_id }
    "#;
    let doc_ids: Vec<String> = tmo_ids.iter().map(|id| ctx.names.tmo_doc_id(*id)).collect();
    let vars = bind([
        ("@tmoEdge", json!(ctx.names.tmo_edge_collection)),
        ("tmoIds", json!(doc_ids)),
    ]);
    let rows: Vec<Row> = ctx.db.query_all(aql, vars).await?;
    let mut result: HashMap<i64, HashSet<i64>> = HashMap::new();
    for row in rows {
        let Some(tmo_id) = GraphNames::tmo_id_of(&row.tmo_node_id) else {
            continue;
        };
        if let Some(tprm_id) = row.tprm_id {
            result.entry(tmo_id).or_default().insert(tprm_id);
        }
    }
    Ok(result)
}

// ----------------------------------------------------------------------
// Bulk writes with typed failures
// ----------------------------------------------------------------------

/// Inserts MO vertices, failing the pass on the first bad document.
pub async fn insert_nodes(
    ctx: &ProjectionContext,
    nodes: &[MoNode],
) -> CoreResult<Vec<Doc<MoNode>>> {
    if nodes.is_empty() {
        return Ok(Vec::new());
    }
    let items: Vec<BulkItem<Doc<MoNode>>> = ctx
        .main()
        .insert_many(nodes, BulkOptions::returning_new())
        .await?;
    let mut stored = Vec::with_capacity(items.len());
    for item in items {
        match item {
            BulkItem::Stored { new: Some(doc), .. } => stored.push(doc),
            BulkItem::Stored { id, .. } => {
                return Err(CoreError::GraphBuildingError(format!(
                    "Node insertion error. {id} returned without body"
                )))
            }
            BulkItem::Failed { error_message, .. } => {
                return Err(CoreError::GraphBuildingError(format!(
                    "Node insertion error. {error_message}"
                )))
            }
        }
    }
    Ok(stored)
}

/// Inserts MO edges, failing the pass on the first bad document.
pub async fn insert_edges(
    ctx: &ProjectionContext,
    edges: &[MoEdge],
) -> CoreResult<Vec<Doc<MoEdge>>> {
    if edges.is_empty() {
        return Ok(Vec::new());
    }
    let items: Vec<BulkItem<Doc<MoEdge>>> = ctx
        .main_edge()
        .insert_many(edges, BulkOptions::returning_new())
        .await?;
    let mut stored = Vec::with_capacity(items.len());
    for item in items {
        match item {
            BulkItem::Stored { new: Some(doc), .. } => stored.push(doc),
            BulkItem::Stored { id, .. } => {
                return Err(CoreError::GraphBuildingError(format!(
                    "Edge insertion error. {id} returned without body"
                )))
            }
            BulkItem::Failed { error_message, .. } => {
                return Err(CoreError::GraphBuildingError(format!(
                    "Edge insertion error. {error_message}"
                )))
            }
        }
    }
    Ok(stored)
}

/// Updates MO vertices in place (patch semantics, nulls kept).
pub async fn update_nodes(ctx: &ProjectionContext, nodes: &[Doc<MoNode>]) -> CoreResult<()> {
    if nodes.is_empty() {
        return Ok(());
    }
    let items: Vec<BulkItem<Json>> = ctx
        .main()
        .update_many(nodes, BulkOptions::default())
        .await?;
    for item in items {
        item.into_result().map_err(|err| {
            CoreError::GraphBuildingError(format!("Node updating error. {err}"))
        })?;
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Path-edge reconciliation
// ----------------------------------------------------------------------

/// Real, non-grouping semantic edges touching `node_ids`, as unordered pairs.
async fn real_pairs_around(
    ctx: &ProjectionContext,
    node_ids: &[String],
) -> CoreResult<HashSet<PathKey>> {
    let aql = r"
        FOR edge IN @@mainEdge
            FILTER edge.virtual == false
            FILTER edge._from != edge._to
            FILTER edge._from IN @nodeIds OR edge._to IN @nodeIds
            FOR node IN @@main
                FILTER node._id == edge._to
                FILTER IS_NULL(node.grouped_by_tprm)
            RETURN { '_from': edge._from, '_to': edge._to }
    ";
    let vars = bind([
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("@main", json!(ctx.names.main_collection)),
        ("nodeIds", json!(node_ids)),
    ]);
    let pairs: Vec<PathKey> = ctx.db.query_all(aql, vars).await?;
    Ok(pairs.into_iter().collect())
}

async fn path_pairs_around(
    ctx: &ProjectionContext,
    node_ids: &[String],
) -> CoreResult<HashSet<PathKey>> {
    let aql = r"
        FOR edge IN @@pathEdge
            FILTER edge._from IN @nodeIds OR edge._to IN @nodeIds
            RETURN { '_from': edge._from, '_to': edge._to }
    ";
    let vars = bind([
        ("@pathEdge", json!(ctx.names.path_edge_collection)),
        ("nodeIds", json!(node_ids)),
    ]);
    let pairs: Vec<PathKey> = ctx.db.query_all(aql, vars).await?;
    Ok(pairs.into_iter().collect())
}

/// Adds path edges missing around the given vertices (insert-only delta).
pub async fn create_path_links(ctx: &ProjectionContext, node_ids: &[String]) -> CoreResult<()> {
    if node_ids.is_empty() {
        return Ok(());
    }
    let wanted = real_pairs_around(ctx, node_ids).await?;
    let present = path_pairs_around(ctx, node_ids).await?;
    let missing: Vec<&PathKey> = wanted.difference(&present).collect();
    if missing.is_empty() {
        return Ok(());
    }
    let items: Vec<BulkItem<Json>> = ctx
        .path_edge()
        .insert_many(&missing, BulkOptions::default())
        .await?;
    for item in items {
        item.into_result().map_err(|err| {
            CoreError::GraphBuildingError(format!("Edge insertion error. {err}"))
        })?;
    }
    Ok(())
}

/// Full two-way reconciliation of the path collection around the given
/// vertices: inserts missing pairs and deletes stale ones.
pub async fn refresh_path_links(ctx: &ProjectionContext, node_ids: &[String]) -> CoreResult<()> {
    if node_ids.is_empty() {
        return Ok(());
    }
    let wanted = real_pairs_around(ctx, node_ids).await?;
    let present = path_pairs_around(ctx, node_ids).await?;

    let missing: Vec<&PathKey> = wanted.difference(&present).collect();
    if !missing.is_empty() {
        let items: Vec<BulkItem<Json>> = ctx
            .path_edge()
            .insert_many(&missing, BulkOptions::default())
            .await?;
        for item in items {
            item.into_result().map_err(|err| {
                CoreError::GraphBuildingError(format!("Edge insertion error. {err}"))
            })?;
        }
    }

    let stale: Vec<&PathKey> = present.difference(&wanted).collect();
    if !stale.is_empty() {
        let aql = r"
            FOR old IN @edges
                FOR edge IN @@pathEdge
                    FILTER (edge._from == old._from AND edge._to == old._to)
                        OR (edge._from == old._to AND edge._to == old._from)
                    REMOVE edge._key IN @@pathEdge
        ";
        let vars = bind([
            ("edges", serde_json::to_value(&stale)?),
            ("@pathEdge", json!(ctx.names.path_edge_collection)),
        ]);
        ctx.db.execute(aql, vars).await?;
    }
    Ok(())
}

/// Ensures the path edge for one parent link exists.
pub async fn ensure_path_pair(
    ctx: &ProjectionContext,
    from: &str,
    to: &str,
) -> CoreResult<()> {
    let aql = r"
        FOR edge IN @@pathEdge
            FILTER (edge._from == @fromId AND edge._to == @toId)
                OR (edge._from == @toId AND edge._to == @fromId)
            LIMIT 1
            RETURN edge
    ";
    let vars = bind([
        ("@pathEdge", json!(ctx.names.path_edge_collection)),
        ("fromId", json!(from)),
        ("toId", json!(to)),
    ]);
    let existing: Vec<Json> = ctx.db.query_all(aql, vars).await?;
    if existing.is_empty() {
        let key = PathKey::new(from, to);
        let item: BulkItem<Json> = ctx
            .path_edge()
            .insert(&key, BulkOptions::default())
            .await?;
        item.into_result().map_err(|err| {
            CoreError::GraphBuildingError(format!("Edge insertion error. {err}"))
        })?;
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Breadcrumbs
// ----------------------------------------------------------------------

/// Rewrites the breadcrumbs of every descendant after a subtree re-parent:
/// prefix `old_prefix` becomes `new_prefix` on all matching vertices.
pub async fn substitute_breadcrumbs(
    ctx: &ProjectionContext,
    old_prefix: &str,
    new_prefix: &str,
) -> CoreResult<()> {
    let aql = r#"
        FOR node IN @@main
            FILTER STARTS_WITH(node.breadcrumbs, @oldPrefix)
            UPDATE node._key
                WITH { "breadcrumbs": SUBSTITUTE(node.breadcrumbs, @oldPrefix, @newPrefix, 1) }
                IN @@main
    "#;
    let vars = bind([
        ("@main", json!(ctx.names.main_collection)),
        ("oldPrefix", json!(old_prefix)),
        ("newPrefix", json!(new_prefix)),
    ]);
    ctx.db.execute(aql, vars).await?;
    Ok(())
}

/// Deletes every main edge touching the given vertices.
pub async fn delete_edges_touching(
    ctx: &ProjectionContext,
    node_ids: &[String],
) -> CoreResult<()> {
    if node_ids.is_empty() {
        return Ok(());
    }
    let aql = r"
        FOR edge IN @@mainEdge
            FILTER edge._from IN @nodeIds OR edge._to IN @nodeIds
            REMOVE edge._key IN @@mainEdge
    ";
    let vars = bind([
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("nodeIds", json!(node_ids)),
    ]);
    ctx.db.execute(aql, vars).await?;
    Ok(())
}

/// Deletes every path edge touching the given vertices.
pub async fn delete_path_edges_touching(
    ctx: &ProjectionContext,
    node_ids: &[String],
) -> CoreResult<()> {
    if node_ids.is_empty() {
        return Ok(());
    }
    let aql = r"
        FOR edge IN @@pathEdge
            FILTER edge._from IN @nodeIds OR edge._to IN @nodeIds
            REMOVE edge._key IN @@pathEdge
    ";
    let vars = bind([
        ("@pathEdge", json!(ctx.names.path_edge_collection)),
        ("nodeIds", json!(node_ids)),
    ]);
    ctx.db.execute(aql, vars).await?;
    Ok(())
}

/// Children of a vertex over `p_id`, one page at a time.
pub async fn children_page(
    ctx: &ProjectionContext,
    node_id: &str,
    offset: usize,
    limit: usize,
) -> CoreResult<Vec<Doc<MoNode>>> {
    let aql = r#"
        FOR v, e IN 1 INBOUND @nodeId GRAPH @mainGraph
            FILTER e.connection_type == "p_id"
            LIMIT @offset, @limit
            RETURN v
    "#;
    let vars = bind([
        ("nodeId", json!(node_id)),
        ("mainGraph", json!(ctx.names.main_graph)),
        ("offset", json!(offset)),
        ("limit", json!(limit)),
    ]);
    Ok(ctx.db.query_all(aql, vars).await?)
}

/// All children of a vertex over `p_id`.
pub async fn all_children(
    ctx: &ProjectionContext,
    node_id: &str,
) -> CoreResult<Vec<Doc<MoNode>>> {
    let mut results = Vec::new();
    let mut offset = 0;
    loop {
        let page = children_page(ctx, node_id, offset, 50).await?;
        let page_len = page.len();
        results.extend(page);
        if page_len < 50 {
            break;
        }
        offset += page_len;
    }
    Ok(results)
}

/// Builds a `p_id` edge value for connecting consecutive chain nodes,
/// skipping pairs already linked.
pub async fn connect_chain(
    ctx: &ProjectionContext,
    chain_ids: &[String],
) -> CoreResult<()> {
    if chain_ids.len() < 2 {
        return Ok(());
    }
    let mut pairs: HashSet<(String, String)> = chain_ids
        .windows(2)
        .map(|w| (w[0].clone(), w[1].clone()))
        .collect();
    let aql = r#"
        FOR edge IN @@mainEdge
            FILTER edge._from IN @nodeIds
            FILTER edge._to IN @nodeIds
            FILTER edge.connection_type == "p_id"
            RETURN [edge._to, edge._from]
    "#;
    let vars = bind([
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("nodeIds", json!(chain_ids)),
    ]);
    let existing: Vec<(String, String)> = ctx.db.query_all(aql, vars).await?;
    for (to, from) in existing {
        pairs.remove(&(to, from));
    }
    let edges: Vec<MoEdge> = pairs
        .into_iter()
        .map(|(parent, child)| MoEdge {
            from: child,
            to: parent,
            connection_type: ConnectionKind::PId,
            prm: None,
            tprm: None,
            is_trace: false,
            is_virtual: false,
            source_id: None,
        })
        .collect();
    insert_edges(ctx, &edges).await?;
    Ok(())
}
