//! K-shortest-paths over the path graph.
//!
//! The store answers `K_SHORTEST_PATHS` on the undirected path graph; the
//! engine swaps each hop for its preferred real edge, deduplicates paths by
//! signature (the keys of their non-line vertices), reconstructs each
//! surviving path with the tracker + linearizer, and returns at most
//! `response_limit` of them, shortest first.

use std::collections::{HashMap, HashSet};

use serde_json::json;
use tracing::{instrument, warn};

use topograph_model::{Doc, MoEdge, MoNode, SquashLevel, Status, TmoNode};
use topograph_store::database::{bind, QueryOptions};
use topograph_store::StoreError;
use topograph_util::env::env_parse_or;

use super::chain::SortedGraph;
use super::straight::straight_way;
use super::tracker::Tracker;
use super::PathResponse;
use crate::checks;
use crate::context::ProjectionContext;
use crate::error::{CoreError, CoreResult};

/// Path-finder limits (`PATH_FINDER_*`).
#[derive(Debug, Clone, Copy)]
pub struct PathFinderConfig {
    /// Paths returned to the caller.
    pub response_limit: usize,
    /// Paths requested from the store before dedup.
    pub search_limit: usize,
}

impl Default for PathFinderConfig {
    fn default() -> Self {
        PathFinderConfig {
            response_limit: 5,
            search_limit: 20,
        }
    }
}

impl PathFinderConfig {
    /// Reads the limits, clamping to the documented ranges and forcing
    /// `search_limit >= response_limit`.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = PathFinderConfig::default();
        let response_limit =
            env_parse_or("PATH_FINDER_RESPONSE_LIMIT", defaults.response_limit).clamp(1, 10);
        let search_limit =
            env_parse_or("PATH_FINDER_SEARCH_LIMIT", defaults.search_limit).clamp(1, 50);
        PathFinderConfig {
            response_limit,
            search_limit: search_limit.max(response_limit),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
struct RawPath {
    vertices: Vec<Doc<MoNode>>,
    #[serde(default)]
    edges: Vec<serde_json::Value>,
    #[serde(default)]
    weight: usize,
}

/// A found path with real edges substituted in.
#[derive(Debug, Clone)]
pub struct FoundPath {
    pub nodes: Vec<Doc<MoNode>>,
    pub edges: Vec<Doc<MoEdge>>,
    pub weight: usize,
    pub tmos: Vec<Doc<TmoNode>>,
}

/// Signature of a path: the sorted keys of its non-line vertices. Two paths
/// through the same stations differ only in line objects and collapse.
#[must_use]
pub fn path_signature(path: &FoundPath) -> Vec<String> {
    let line_tmos: HashSet<i64> = path
        .tmos
        .iter()
        .filter(|t| t.body.is_line())
        .map(|t| t.body.tmo_id)
        .collect();
    let mut keys: Vec<String> = path
        .nodes
        .iter()
        .filter(|n| !line_tmos.contains(&n.body.tmo))
        .map(|n| n.key.clone())
        .collect();
    keys.sort_unstable();
    keys
}

/// Keeps the shortest path per signature, sorted by weight, capped.
#[must_use]
pub fn dedup_paths(paths: Vec<FoundPath>, response_limit: usize) -> Vec<FoundPath> {
    let mut by_signature: HashMap<Vec<String>, FoundPath> = HashMap::new();
    for path in paths {
        let signature = path_signature(&path);
        match by_signature.get(&signature) {
            Some(existing) if existing.weight <= path.weight => {}
            _ => {
                by_signature.insert(signature, path);
            }
        }
    }
    let mut deduped: Vec<FoundPath> = by_signature.into_values().collect();
    deduped.sort_by_key(|p| p.weight);
    deduped.truncate(response_limit);
    deduped
}

/// Finds and reconstructs paths between two vertices.
#[instrument(skip(ctx), fields(key = %ctx.key))]
pub async fn find_path_between(
    ctx: &ProjectionContext,
    node_key_a: &str,
    node_key_b: &str,
    level: SquashLevel,
) -> CoreResult<Vec<PathResponse>> {
    checks::check_status_in(ctx, &[Status::Complete])?;
    checks::check_start_node(ctx).await?;
    checks::check_nodes_exist(ctx, &[node_key_a, node_key_b]).await?;
    checks::check_view_exists(ctx).await?;

    let config = PathFinderConfig::from_env();
    let raw_paths = shortest_paths(ctx, node_key_a, node_key_b, &config).await?;

    let mut found: Vec<FoundPath> = Vec::new();
    for raw in raw_paths {
        let edges = replace_with_real_edges(ctx, &raw.edges).await?;
        let tmo_ids: Vec<i64> = {
            let mut ids: Vec<i64> = raw.vertices.iter().map(|v| v.body.tmo).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        let tmos = ctx.tmos_by_ids(&tmo_ids).await?;
        found.push(FoundPath {
            nodes: raw.vertices,
            edges,
            weight: raw.weight,
            tmos,
        });
    }
    let deduped = dedup_paths(found, config.response_limit);

    let mut results = Vec::with_capacity(deduped.len());
    for path in deduped {
        let all_edges = edges_between(ctx, &path.nodes).await?;
        let tracker = Tracker::new(path.nodes, all_edges, &path.tmos, false);
        let mut trace = tracker.get_trace(level);
        if level != SquashLevel::Graph {
            trace = SortedGraph::new(trace, true).execute();
        }
        if level == SquashLevel::Straight {
            trace = straight_way(trace);
        }
        let length = trace.edges.len();
        results.push(PathResponse {
            nodes: trace.nodes,
            edges: trace.edges,
            tmo: path.tmos,
            length,
        });
    }
    Ok(results)
}

/// Raw `K_SHORTEST_PATHS` with the documented timeout fallback: a killed
/// query retries once with limit 1; a second kill surfaces the dedicated
/// timeout error.
async fn shortest_paths(
    ctx: &ProjectionContext,
    node_key_a: &str,
    node_key_b: &str,
    config: &PathFinderConfig,
) -> CoreResult<Vec<RawPath>> {
    match run_path_query(ctx, node_key_a, node_key_b, config.search_limit).await {
        Ok(paths) => Ok(paths),
        Err(CoreError::Timeout(_)) => {
            warn!("path search timed out, retrying with limit 1");
            match run_path_query(ctx, node_key_a, node_key_b, 1).await {
                Ok(paths) => Ok(paths),
                Err(CoreError::Timeout(_)) => Err(CoreError::path_timeout()),
                Err(err) => Err(err),
            }
        }
        Err(err) => Err(err),
    }
}

async fn run_path_query(
    ctx: &ProjectionContext,
    node_key_a: &str,
    node_key_b: &str,
    limit: usize,
) -> CoreResult<Vec<RawPath>> {
    let aql = r"
        FOR p IN ANY K_SHORTEST_PATHS @pointA TO @pointB
            GRAPH @pathGraph
            LIMIT @limit
            RETURN p
    ";
    let vars = bind([
        ("pointA", json!(ctx.names.node_doc_id(node_key_a))),
        ("pointB", json!(ctx.names.node_doc_id(node_key_b))),
        ("pathGraph", json!(ctx.names.path_graph)),
        ("limit", json!(limit)),
    ]);
    let cursor = ctx
        .db
        .query_with_options::<RawPath>(aql, vars, &QueryOptions::default())
        .await
        .map_err(|err| match err {
            StoreError::Timeout(msg) => CoreError::Timeout(msg),
            other => other.into(),
        })?;
    let paths = cursor.collect_all().await.map_err(|err| match err {
        StoreError::Timeout(msg) => CoreError::Timeout(msg),
        other => other.into(),
    })?;
    Ok(paths)
}

/// Replaces each path-graph hop with its preferred real counterpart:
/// non-virtual, non-trace, and the lexicographically larger connection type
/// when several match.
async fn replace_with_real_edges(
    ctx: &ProjectionContext,
    hops: &[serde_json::Value],
) -> CoreResult<Vec<Doc<MoEdge>>> {
    if hops.is_empty() {
        return Ok(Vec::new());
    }
    let aql = r"
        FOR connection IN @connections
            LET real = (
                FOR edge IN @@mainEdge
                    FILTER edge.virtual == false
                    FILTER edge.is_trace == false
                    FILTER (edge._from == connection._from AND edge._to == connection._to)
                        OR (edge._to == connection._from AND edge._from == connection._to)
                    SORT edge.connection_type DESC
                    LIMIT 1
                    RETURN edge
            )
            RETURN FIRST(real)
    ";
    let vars = bind([
        ("connections", json!(hops)),
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
    ]);
    let edges: Vec<Option<Doc<MoEdge>>> = ctx.db.query_all(aql, vars).await?;
    Ok(edges.into_iter().flatten().collect())
}

/// Every non-geometry edge between the path's vertices.
async fn edges_between(
    ctx: &ProjectionContext,
    nodes: &[Doc<MoNode>],
) -> CoreResult<Vec<Doc<MoEdge>>> {
    if nodes.is_empty() {
        return Ok(Vec::new());
    }
    let node_ids: Vec<&String> = nodes.iter().map(|n| &n.id).collect();
    let aql = r#"
        FOR edge IN @@mainEdge
            FILTER edge._from IN @nodeIds
            FILTER edge._to IN @nodeIds
            FILTER edge.connection_type != "geometry_line"
            RETURN edge
    "#;
    let vars = bind([
        ("@mainEdge", json!(ctx.names.main_edge_collection)),
        ("nodeIds", json!(node_ids)),
    ]);
    Ok(ctx.db.query_all(aql, vars).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tmo(tmo_id: i64, line: bool) -> Doc<TmoNode> {
        Doc {
            id: format!("tmo/{tmo_id}"),
            key: tmo_id.to_string(),
            rev: "1".into(),
            body: TmoNode {
                tmo_id,
                p_id: None,
                name: format!("tmo-{tmo_id}"),
                enabled: true,
                global_uniqueness: true,
                is_virtual: false,
                materialize: true,
                icon: None,
                description: None,
                geometry_type: line.then(|| "line".to_string()),
                line_type: None,
                minimize: false,
                label: vec![],
                points_constraint_by_tmo: vec![],
                params: vec![],
                commutation_tprms: None,
                show_as_a_table: true,
                busy_parameter_groups: vec![],
            },
        }
    }

    fn mo_node(key: &str, tmo_id: i64) -> Doc<MoNode> {
        Doc {
            id: format!("main/{key}"),
            key: key.to_string(),
            rev: "1".into(),
            body: MoNode {
                grouped_by_tprm: None,
                group_p_id: None,
                name: key.to_string(),
                label: None,
                tmo: tmo_id,
                mo_ids: vec![1],
                is_trace: false,
                data: None,
                indexed: None,
                breadcrumbs: "/".into(),
            },
        }
    }

    fn path(keys: &[(&str, i64)], weight: usize, tmos: Vec<Doc<TmoNode>>) -> FoundPath {
        FoundPath {
            nodes: keys.iter().map(|(k, t)| mo_node(k, *t)).collect(),
            edges: Vec::new(),
            weight,
            tmos,
        }
    }

    #[test]
    fn signature_ignores_line_vertices() {
        let tmos = vec![tmo(1, false), tmo(2, true)];
        let a = path(&[("s1", 1), ("line1", 2), ("s2", 1)], 2, tmos.clone());
        let b = path(&[("s2", 1), ("line2", 2), ("s1", 1)], 3, tmos);
        assert_eq!(path_signature(&a), path_signature(&b));
        assert_eq!(path_signature(&a), vec!["s1".to_string(), "s2".to_string()]);
    }

    #[test]
    fn dedup_keeps_shortest_per_signature() {
        let tmos = vec![tmo(1, false), tmo(2, true)];
        let long = path(&[("s1", 1), ("lineA", 2), ("s2", 1)], 5, tmos.clone());
        let short = path(&[("s1", 1), ("lineB", 2), ("s2", 1)], 2, tmos.clone());
        let other = path(&[("s3", 1)], 1, tmos);
        let deduped = dedup_paths(vec![long, short, other], 5);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].weight, 1);
        assert_eq!(deduped[1].weight, 2);
    }

    #[test]
    fn response_limit_caps_results() {
        let tmos = vec![tmo(1, false)];
        let paths: Vec<FoundPath> = (0..10)
            .map(|i| path(&[(&format!("s{i}"), 1)], i, tmos.clone()))
            .collect();
        let deduped = dedup_paths(paths, 3);
        assert_eq!(deduped.len(), 3);
        assert_eq!(deduped[0].weight, 0);
    }

    #[test]
    fn config_clamps_and_orders_limits() {
        std::env::set_var("PATH_FINDER_RESPONSE_LIMIT", "50");
        std::env::set_var("PATH_FINDER_SEARCH_LIMIT", "2");
        let config = PathFinderConfig::from_env();
        assert_eq!(config.response_limit, 10);
        assert!(config.search_limit >= config.response_limit);
        std::env::remove_var("PATH_FINDER_RESPONSE_LIMIT");
        std::env::remove_var("PATH_FINDER_SEARCH_LIMIT");
    }
}
