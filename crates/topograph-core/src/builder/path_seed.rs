//! Pass 5: seed the path collection.
//!
//! Every distinct real, non-trace edge contributes one undirected path edge.
//! The `PathKey` hash folds endpoint order, so a pair connected both ways
//! stores once.

use std::collections::HashSet;

use serde_json::json;
use tracing::{debug, instrument};

use topograph_model::PathKey;
use topograph_store::database::bind;
use topograph_store::{BulkItem, BulkOptions};

use crate::context::ProjectionContext;
use crate::error::{CoreError, CoreResult};

#[instrument(skip_all)]
pub async fn fill_path_edges(ctx: &ProjectionContext) -> CoreResult<()> {
    let aql = r"
        FOR edge IN @@mainEdge
            FILTER edge.virtual == false
            FILTER edge.is_trace == false
            RETURN DISTINCT { '_from': edge._from, '_to': edge._to }
    ";
    let vars = bind([("@mainEdge", json!(ctx.names.main_edge_collection))]);
    let pairs: Vec<PathKey> = ctx.db.query_all(aql, vars).await?;
    let unique: HashSet<PathKey> = pairs.into_iter().collect();
    if unique.is_empty() {
        return Ok(());
    }
    let docs: Vec<&PathKey> = unique.iter().collect();
    let items: Vec<BulkItem<serde_json::Value>> = ctx
        .path_edge()
        .insert_many(&docs, BulkOptions::default())
        .await?;
    for item in items {
        item.into_result().map_err(|err| {
            CoreError::GraphBuildingError(format!("Edge insertion error. {err}"))
        })?;
    }
    debug!(count = unique.len(), "path edges seeded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reversed_pairs_collapse() {
        let pairs = vec![
            PathKey::new("main/1", "main/2"),
            PathKey::new("main/2", "main/1"),
            PathKey::new("main/1", "main/3"),
        ];
        let unique: HashSet<PathKey> = pairs.into_iter().collect();
        assert_eq!(unique.len(), 2);
    }
}
