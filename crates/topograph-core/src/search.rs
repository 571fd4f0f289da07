//! Free-text search over the projection.
//!
//! Exact name/label hits come first (a disabled trace TMO is excluded),
//! then the search view is consulted with the normalizing analyzer; name
//! matches outrank `indexed`/label matches.

use serde_json::json;

use topograph_model::{Doc, MoNode, Status};
use topograph_store::database::bind;

use crate::checks;
use crate::context::ProjectionContext;
use crate::error::CoreResult;

const SEARCH_LIMIT: usize = 30;
const NAME_WEIGHT: f64 = 10.0;

/// Searches the projection for MO vertices matching `value`.
pub async fn find_in_graph(
    ctx: &ProjectionContext,
    value: &str,
) -> CoreResult<Vec<Doc<MoNode>>> {
    checks::check_status_in(ctx, &[Status::Complete])?;
    checks::check_start_node(ctx).await?;
    checks::check_view_exists(ctx).await?;

    // A configured but disabled trace TMO is invisible to search.
    let excluded_trace_tmo = match ctx.trace_tmo_data().await? {
        Some(tmo) if !tmo.body.enabled => tmo.body.tmo_id,
        _ => -1,
    };

    let exact_aql = r"
        FOR doc IN @@main
            FILTER doc.name == @value OR doc.label == @value
            FILTER doc.tmo != @traceTmoId
            LIMIT @limit
            RETURN doc
    ";
    let vars = bind([
        ("@main", json!(ctx.names.main_collection)),
        ("value", json!(value)),
        ("traceTmoId", json!(excluded_trace_tmo)),
        ("limit", json!(SEARCH_LIMIT)),
    ]);
    let mut results: Vec<Doc<MoNode>> = ctx.db.query_all(exact_aql, vars).await?;
    if results.len() >= SEARCH_LIMIT {
        return Ok(results);
    }
    let exclude_ids: Vec<String> = results.iter().map(|doc| doc.id.clone()).collect();

    let view_aql = r#"
        LET needle = CONCAT("%", TOKENS(@value, @analyzer)[0], "%")
        FOR doc IN @@view
            SEARCH ANALYZER(
                LIKE(doc.name, needle) OR LIKE(doc.label, needle) OR LIKE(doc.indexed, needle),
                @analyzer
            )
            FILTER doc.tmo != @traceTmoId
            FILTER doc._id NOT IN @excludeIds
            LET score = LIKE(doc.name, needle) ? @nameWeight : 1
            SORT score DESC
            LIMIT @limit
            RETURN doc
    "#;
    let vars = bind([
        ("@view", json!(ctx.names.search_view)),
        ("value", json!(value)),
        ("analyzer", json!(ctx.names.analyzer)),
        ("traceTmoId", json!(excluded_trace_tmo)),
        ("excludeIds", json!(exclude_ids)),
        ("nameWeight", json!(NAME_WEIGHT)),
        ("limit", json!(SEARCH_LIMIT - results.len())),
    ]);
    let fuzzy: Vec<Doc<MoNode>> = ctx.db.query_all(view_aql, vars).await?;
    results.extend(fuzzy);
    Ok(results)
}
