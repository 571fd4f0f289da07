//! Pass 11: breadcrumbs.
//!
//! Deterministic from the `p_id` chain: every vertex gets
//! `parent.breadcrumbs + parent.key + "/"`, root-level vertices keep `"/"`.
//! The walk follows the TMO tree top-down (grouping vertices included per
//! level) so parents are always written before their children.

use std::collections::HashMap;

use serde_json::json;
use tracing::instrument;

use topograph_model::{Doc, MoNode};
use topograph_store::database::bind;

use crate::context::ProjectionContext;
use crate::error::CoreResult;
use crate::graph_ops::{self, QUERY_ITEMS_LIMIT};
use crate::settings::schema_config;

/// Computes a child's breadcrumbs from its parent's.
#[must_use]
pub fn child_breadcrumbs(parent_breadcrumbs: &str, parent_key: &str) -> String {
    let base = if parent_breadcrumbs.is_empty() {
        "/"
    } else {
        parent_breadcrumbs
    };
    format!("{base}{parent_key}/")
}

/// One level of the TMO walk: a TMO id plus the grouping TPRM whose
/// synthetic vertices sit at this level (if any).
#[derive(Debug, Clone, Default)]
pub struct TmoLevel {
    pub tmo_id: i64,
    pub grouped_by_tprm: Option<i64>,
    pub children: Vec<TmoLevel>,
}

/// Builds the level tree from the schema layer and grouping config. Each
/// grouped TMO contributes two levels: the grouping vertices first, the real
/// vertices under them.
pub(crate) fn level_tree(
    parents: &HashMap<i64, Option<i64>>,
    groups: &HashMap<i64, Vec<i64>>,
) -> Vec<TmoLevel> {
    fn build(
        tmo_id: i64,
        children_of: &HashMap<i64, Vec<i64>>,
        groups: &HashMap<i64, Vec<i64>>,
    ) -> TmoLevel {
        let child_levels: Vec<TmoLevel> = children_of
            .get(&tmo_id)
            .into_iter()
            .flatten()
            .map(|child| build(*child, children_of, groups))
            .collect();
        // grouping chain nests innermost-last: group(level0) > ... > real
        let mut level = TmoLevel {
            tmo_id,
            grouped_by_tprm: None,
            children: child_levels,
        };
        if let Some(tprms) = groups.get(&tmo_id) {
            for tprm in tprms.iter().rev() {
                level = TmoLevel {
                    tmo_id,
                    grouped_by_tprm: Some(*tprm),
                    children: vec![level],
                };
            }
        }
        level
    }

    let mut children_of: HashMap<i64, Vec<i64>> = HashMap::new();
    let mut roots: Vec<i64> = Vec::new();
    for (tmo_id, parent) in parents {
        match parent {
            Some(parent) if parents.contains_key(parent) => {
                children_of.entry(*parent).or_default().push(*tmo_id);
            }
            _ => roots.push(*tmo_id),
        }
    }
    for children in children_of.values_mut() {
        children.sort_unstable();
    }
    roots.sort_unstable();
    roots
        .into_iter()
        .map(|root| build(root, &children_of, groups))
        .collect()
}

#[instrument(skip_all)]
pub async fn add_breadcrumbs(ctx: &ProjectionContext) -> CoreResult<()> {
    let schema = schema_config(ctx).await?;
    let parents: HashMap<i64, Option<i64>> = schema
        .nodes
        .iter()
        .map(|node| (node.body.tmo_id, node.body.p_id))
        .collect();
    let groups = graph_ops::groups_map(ctx).await?;
    let levels = level_tree(&parents, &groups);
    for level in &levels {
        walk_level(ctx, level).await?;
    }
    Ok(())
}

async fn walk_level(ctx: &ProjectionContext, level: &TmoLevel) -> CoreResult<()> {
    let mut offset = 0;
    loop {
        let nodes = level_page(ctx, level, offset).await?;
        let page_len = nodes.len();
        if page_len > 0 {
            let updated = with_parent_breadcrumbs(ctx, nodes).await?;
            graph_ops::update_nodes(ctx, &updated).await?;
        }
        if page_len < QUERY_ITEMS_LIMIT {
            break;
        }
        offset += page_len;
    }
    for child in &level.children {
        Box::pin(walk_level(ctx, child)).await?;
    }
    Ok(())
}

async fn level_page(
    ctx: &ProjectionContext,
    level: &TmoLevel,
    offset: usize,
) -> CoreResult<Vec<Doc<MoNode>>> {
    let aql = r"
        FOR node IN @@main
            FILTER node.tmo == @tmoId
            FILTER node.grouped_by_tprm == @tprmId
            LIMIT @offset, @limit
            RETURN node
    ";
    let vars = bind([
        ("@main", json!(ctx.names.main_collection)),
        ("tmoId", json!(level.tmo_id)),
        ("tprmId", json!(level.grouped_by_tprm)),
        ("offset", json!(offset)),
        ("limit", json!(QUERY_ITEMS_LIMIT)),
    ]);
    Ok(ctx.db.query_all(aql, vars).await?)
}

/// Resolves each node's parent breadcrumbs in one query and applies them.
async fn with_parent_breadcrumbs(
    ctx: &ProjectionContext,
    mut nodes: Vec<Doc<MoNode>>,
) -> CoreResult<Vec<Doc<MoNode>>> {
    #[derive(serde::Deserialize)]
    struct Row {
        child_id: String,
        parent_key: String,
        parent_breadcrumbs: Option<String>,
    }
    let node_ids: Vec<&String> = nodes.iter().map(|n| &n.id).collect();
    let aql = r#"
        FOR edge IN @@mainEdge
            FILTER edge.connection_type == "p_id"
            FILTER edge._from IN @nodeIds
            FOR node IN @@main
                FILTER node._id == edge._to
                RETURN { "child_id": edge._from, "parent_key": node._key,
                         "parent_breadcrumbs": node.breadcrumbs }
    "#;
    let vars = bind([
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("@main", json!(ctx.names.main_collection)),
        ("nodeIds", json!(node_ids)),
    ]);
    let rows: Vec<Row> = ctx.db.query_all(aql, vars).await?;
    let by_child: HashMap<String, String> = rows
        .into_iter()
        .map(|row| {
            let crumbs = child_breadcrumbs(
                row.parent_breadcrumbs.as_deref().unwrap_or("/"),
                &row.parent_key,
            );
            (row.child_id, crumbs)
        })
        .collect();
    for node in &mut nodes {
        node.body.breadcrumbs = by_child
            .get(&node.id)
            .cloned()
            .unwrap_or_else(MoNode::root_breadcrumbs);
    }
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn breadcrumbs_concatenate_parent_chain() {
        assert_eq!(child_breadcrumbs("/", "p1"), "/p1/");
        assert_eq!(child_breadcrumbs("/p1/", "p2"), "/p1/p2/");
        assert_eq!(child_breadcrumbs("", "p1"), "/p1/");
    }

    #[test]
    fn level_tree_nests_group_levels_above_real_ones() {
        let mut parents = HashMap::new();
        parents.insert(1, None);
        parents.insert(2, Some(1));
        let mut groups = HashMap::new();
        groups.insert(2, vec![11, 12]);

        let tree = level_tree(&parents, &groups);
        assert_eq!(tree.len(), 1);
        let root = &tree[0];
        assert_eq!(root.tmo_id, 1);
        assert_eq!(root.grouped_by_tprm, None);
        // tmo 2: group(11) -> group(12) -> real
        let outer = &root.children[0];
        assert_eq!(outer.grouped_by_tprm, Some(11));
        let inner = &outer.children[0];
        assert_eq!(inner.grouped_by_tprm, Some(12));
        let real = &inner.children[0];
        assert_eq!(real.grouped_by_tprm, None);
        assert!(real.children.is_empty());
    }

    #[test]
    fn parentless_tmos_are_roots() {
        let mut parents = HashMap::new();
        parents.insert(1, None);
        parents.insert(2, Some(99)); // parent outside the projection
        let tree = level_tree(&parents, &HashMap::new());
        assert_eq!(tree.len(), 2);
    }
}
