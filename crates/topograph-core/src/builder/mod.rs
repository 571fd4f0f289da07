//! Full build pipeline.
//!
//! Passes execute in a strict order; each assumes the invariants of the
//! previous one. The TMO layer is preserved; the instance layer is rebuilt
//! from scratch. Progress is visible only through the main record's status
//! (`New`/`Error`/`Complete` → `In Process` → `Complete` | `Error`).

pub mod breadcrumbs;
pub mod from_tmo;
pub mod group;
pub mod lines;
pub mod links;
pub mod orphans;
pub mod path_seed;
pub mod prm_values;
pub mod service_forward;
pub mod spread;

use tracing::{info, instrument};

use topograph_inventory::InventoryApi;
use topograph_model::Status;

use crate::checks;
use crate::context::ProjectionContext;
use crate::error::{CoreError, CoreResult};
use crate::registry::Registry;

/// Settings snapshot taken once at the start of a build.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub root_tmo_id: i64,
    pub trace_tmo_id: Option<i64>,
    pub group_by_tprms: Vec<i64>,
    pub delete_orphan_branches: bool,
}

impl BuildSettings {
    pub async fn load(ctx: &ProjectionContext) -> CoreResult<Self> {
        Ok(BuildSettings {
            root_tmo_id: ctx.record.body.tmo_id,
            trace_tmo_id: ctx.trace_tmo_id().await?,
            group_by_tprms: ctx.group_by_tprms().await?,
            delete_orphan_branches: ctx.delete_orphan_branches().await?,
        })
    }
}

/// Runs the full build for one projection.
///
/// Preconditions: not already `In Process`, and the root TMO vertex exists.
/// On any pass failure the record flips to `Error` with the description and
/// the error re-raises.
#[instrument(skip_all, fields(key = %ctx.key))]
pub async fn run_build(
    ctx: &mut ProjectionContext,
    inventory: &dyn InventoryApi,
) -> CoreResult<()> {
    checks::check_status_not_in(ctx, &[Status::InProcess])?;
    checks::check_start_node(ctx).await?;

    let registry = Registry::new(ctx.client.clone(), ctx.names.clone());
    let settings = BuildSettings::load(ctx).await?;

    // Pass 1: truncate the instance layer.
    ctx.main().truncate().await?;
    ctx.main_edge().truncate().await?;
    ctx.path_edge().truncate().await?;

    registry
        .set_status(&ctx.key, Status::InProcess, None)
        .await?;
    ctx.reload_record().await?;
    info!(key = %ctx.key, "build started");

    let result = run_passes(ctx, inventory, &settings).await;
    match result {
        Ok(()) => {
            registry.set_status(&ctx.key, Status::Complete, None).await?;
            ctx.reload_record().await?;
            info!(key = %ctx.key, "build finished");
            Ok(())
        }
        Err(err) => {
            registry
                .set_status(&ctx.key, Status::Error, Some(err.to_string()))
                .await?;
            Err(CoreError::GraphBuildingError(format!(
                "Error when building a graph with key {}: {err}",
                ctx.key
            )))
        }
    }
}

async fn run_passes(
    ctx: &ProjectionContext,
    inventory: &dyn InventoryApi,
    settings: &BuildSettings,
) -> CoreResult<()> {
    // Pass 2: instance vertices and parent links from the root TMO.
    from_tmo::build_from_root(ctx, inventory, settings.root_tmo_id, false, settings).await?;

    // Pass 3: the trace layer, when configured.
    if let Some(trace_tmo_id) = settings.trace_tmo_id {
        from_tmo::build_trace_layer(ctx, inventory, trace_tmo_id, settings).await?;
    }

    // Pass 4: semantic links from TPRM constraints and point ids.
    links::create_links_from_root(ctx, settings.root_tmo_id, settings).await?;

    // Pass 5: seed the path collection from real non-trace edges.
    path_seed::fill_path_edges(ctx).await?;

    // Pass 6: forward service connections over mo_links.
    service_forward::forward_service_connections(ctx, settings, None).await?;

    // Pass 7: grouping nodes.
    group::group_nodes(ctx, inventory, settings).await?;

    // Pass 8: geometry-line edges between point endpoints (+ their trace
    // forwarding and spread).
    lines::forward_line_connections(ctx, settings).await?;

    // Pass 9: virtual spread of every real cross-link up the hierarchy.
    spread::spread_all(ctx, settings).await?;

    // Pass 10: connect services through lines whose both endpoints serve them.
    lines::connect_services_by_lines(ctx, settings, None).await?;

    // Pass 11: breadcrumbs.
    breadcrumbs::add_breadcrumbs(ctx).await?;

    // Pass 12: optional orphan-branch pruning.
    if settings.delete_orphan_branches {
        orphans::delete_orphan_branches(ctx).await?;
    }

    Ok(())
}
