//! Precondition checks shared by operations.

use serde_json::json;

use topograph_model::record::val_type;
use topograph_model::{Doc, Status, TmoNode};
use topograph_store::database::bind;

use crate::context::ProjectionContext;
use crate::error::{CoreError, CoreResult};

/// Fails unless the projection status is one of `allowed`.
pub fn check_status_in(ctx: &ProjectionContext, allowed: &[Status]) -> CoreResult<()> {
    let status = ctx.record.body.status;
    if !allowed.contains(&status) {
        return Err(CoreError::StatusError(format!(
            "The status {status} does not allow this operation to be performed"
        )));
    }
    Ok(())
}

/// Fails when the projection status is one of `forbidden`.
pub fn check_status_not_in(ctx: &ProjectionContext, forbidden: &[Status]) -> CoreResult<()> {
    let status = ctx.record.body.status;
    if forbidden.contains(&status) {
        return Err(CoreError::StatusError(format!(
            "The status {status} does not allow this operation to be performed"
        )));
    }
    Ok(())
}

/// The root TMO vertex must exist in the projection.
pub async fn check_start_node(ctx: &ProjectionContext) -> CoreResult<Doc<TmoNode>> {
    let key = ctx.record.body.tmo_id.to_string();
    ctx.tmo()
        .get(&key)
        .await?
        .ok_or_else(|| CoreError::StartNodeNotFound("Start node not found".to_string()))
}

/// All listed instance vertices must exist.
pub async fn check_nodes_exist(ctx: &ProjectionContext, keys: &[&str]) -> CoreResult<()> {
    if keys.is_empty() {
        return Ok(());
    }
    let aql = r"
        FOR doc IN @@main
            FILTER doc._key IN @keys
            COLLECT WITH COUNT INTO length
            RETURN length
    ";
    let vars = bind([
        ("@main", json!(ctx.names.main_collection)),
        ("keys", json!(keys)),
    ]);
    let counts: Vec<usize> = ctx.db.query_all(aql, vars).await?;
    if counts.first().copied().unwrap_or(0) != keys.len() {
        return Err(CoreError::NotFound("Nodes not found in database".to_string()));
    }
    Ok(())
}

/// The search view must exist (built projections only).
pub async fn check_view_exists(ctx: &ProjectionContext) -> CoreResult<()> {
    if !ctx.db.has_view(&ctx.names.search_view).await? {
        return Err(CoreError::NotFound(
            "Search indexes not found. Please rebuild the graph".to_string(),
        ));
    }
    Ok(())
}

/// Trace queries need a configured trace TMO.
pub fn check_trace_configured(trace_tmo_id: Option<i64>) -> CoreResult<i64> {
    trace_tmo_id
        .ok_or_else(|| CoreError::TraceNodeNotFound("The Trace TMO ID not set".to_string()))
}

/// Grouping TPRMs must lie on one enabled `p_id` chain from the start TMO,
/// listed root-first: each TPRM's owner must be at least as deep as the
/// previous one.
pub async fn check_group_by_order(
    ctx: &ProjectionContext,
    group_by_tprms: &[i64],
    start_tmo_id: i64,
) -> CoreResult<()> {
    if group_by_tprms.is_empty() {
        return Ok(());
    }
    let aql = r#"
        FOR tprm IN @tprms
            FOR doc IN @@tmo
                FILTER doc.params[*].id ANY == tprm

                LET path = (
                    FOR v, e IN ANY SHORTEST_PATH
                        doc._id TO @startFrom
                        GRAPH @tmoGraph

                        FILTER v[*].enabled ALL == true
                        FILTER e[*].enabled ALL == true
                        FILTER e[*].link_type ALL == "p_id"

                        RETURN e
                    )
                RETURN LENGTH(path)
    "#;
    let vars = bind([
        ("tprms", json!(group_by_tprms)),
        ("startFrom", json!(ctx.names.tmo_doc_id(start_tmo_id))),
        ("tmoGraph", json!(ctx.names.tmo_graph)),
        ("@tmo", json!(ctx.names.tmo_collection)),
    ]);
    let depths: Vec<usize> = ctx.db.query_all(aql, vars).await?;
    if depths.len() != group_by_tprms.len() {
        return Err(CoreError::NotFound("Tprm not found".to_string()));
    }
    if depths.windows(2).any(|pair| pair[0] > pair[1]) {
        return Err(CoreError::Validation(
            "The order of the tprms is out of order".to_string(),
        ));
    }
    Ok(())
}

/// `start_from` must name an existing TMO; its TPRM (when set) must belong
/// to that TMO and be one of the grouping keys.
pub async fn check_start_from(
    ctx: &ProjectionContext,
    tmo_id: Option<i64>,
    tprm_id: Option<i64>,
    group_by_tprms: &[i64],
) -> CoreResult<()> {
    let Some(tmo_id) = tmo_id else {
        if tprm_id.is_some() {
            return Err(CoreError::Validation(
                "TPRM ID must be used only with TMO ID".to_string(),
            ));
        }
        return Ok(());
    };
    let tmos = ctx.tmos_by_ids(&[tmo_id]).await?;
    let Some(tmo) = tmos.into_iter().next() else {
        return Err(CoreError::NotFound("TMO ID not found".to_string()));
    };
    if let Some(tprm_id) = tprm_id {
        if tmo.body.param(tprm_id).is_none() {
            return Err(CoreError::NotFound(
                "TPRM ID not found or refers to another TMO".to_string(),
            ));
        }
        if !group_by_tprms.contains(&tprm_id) {
            return Err(CoreError::Validation(
                "The parameter type must be specified in the grouping".to_string(),
            ));
        }
    }
    Ok(())
}

/// The trace TMO must exist, differ from the root, and own the trace TPRM.
pub async fn check_trace_settings(
    ctx: &ProjectionContext,
    trace_tmo_id: Option<i64>,
    trace_tprm_id: Option<i64>,
) -> CoreResult<()> {
    let Some(trace_tmo_id) = trace_tmo_id else {
        return Ok(());
    };
    if ctx.record.body.tmo_id == trace_tmo_id {
        return Err(CoreError::Validation(
            "Trace ID cannot be equal to the starting TMO ID element".to_string(),
        ));
    }
    let node: Option<Doc<TmoNode>> = ctx.tmo().get(&trace_tmo_id.to_string()).await?;
    let Some(node) = node else {
        return Err(CoreError::Validation(
            "Trace ID not found in TMO IDs list".to_string(),
        ));
    };
    if let Some(trace_tprm_id) = trace_tprm_id {
        if node.body.param(trace_tprm_id).is_none() {
            return Err(CoreError::Validation("Trace TPRM ID not found".to_string()));
        }
    }
    Ok(())
}

/// Commutation TPRMs must be link-typed parameters of a non-global TMO.
pub async fn check_commutation_tprms(
    ctx: &ProjectionContext,
    tmo_id: i64,
    tprm_ids: &[i64],
) -> CoreResult<()> {
    if tprm_ids.is_empty() {
        return Ok(());
    }
    let tmos = ctx.tmos_by_ids(&[tmo_id]).await?;
    let Some(tmo) = tmos.into_iter().next() else {
        return Err(CoreError::NotFound("TMO ID not found".to_string()));
    };
    if tmo.body.global_uniqueness {
        return Err(CoreError::Validation(
            "The value can only be set for TMOs with non-global uniqueness".to_string(),
        ));
    }
    let link_params: std::collections::HashSet<i64> = tmo
        .body
        .params
        .iter()
        .filter(|p| {
            p.val_type == val_type::MO_LINK || p.val_type == val_type::TWO_WAY_LINK
        })
        .map(|p| p.id)
        .collect();
    let unique: std::collections::HashSet<i64> = tprm_ids.iter().copied().collect();
    if !unique.is_subset(&link_params) {
        return Err(CoreError::Validation("Wrong TPRM ids".to_string()));
    }
    Ok(())
}

/// Busy-parameter groups may not share a TPRM.
pub fn check_busy_param_uniqueness(groups: &[Vec<i64>]) -> CoreResult<()> {
    let mut seen = std::collections::HashSet::new();
    for group in groups {
        for tprm_id in group {
            if !seen.insert(*tprm_id) {
                return Err(CoreError::Validation("TPRM id must be unique".to_string()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_groups_reject_duplicates() {
        assert!(check_busy_param_uniqueness(&[vec![1, 2], vec![3]]).is_ok());
        assert!(check_busy_param_uniqueness(&[vec![1, 2], vec![2, 3]]).is_err());
        assert!(check_busy_param_uniqueness(&[vec![1, 1]]).is_err());
    }

    #[test]
    fn trace_check_requires_configuration() {
        assert!(check_trace_configured(Some(42622)).is_ok());
        assert!(matches!(
            check_trace_configured(None),
            Err(CoreError::TraceNodeNotFound(_))
        ));
    }
}
