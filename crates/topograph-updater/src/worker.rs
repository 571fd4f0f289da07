//! Per-projection worker: one consumer, one store handle, one inventory
//! channel, processing change messages in delivery order.

use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use topograph_core::ProjectionContext;
use topograph_inventory::{InventoryClient, InventoryConfig};
use topograph_model::{EntityClass, GraphNames, Status};
use topograph_store::GraphClient;

use crate::cache::TmoCache;
use crate::config::KafkaConfig;
use crate::consumer::{decode_borrowed, ChangeConsumer};
use crate::error::{UpdaterError, UpdaterResult};
use crate::handlers;

/// How long the worker sleeps between status polls while a full build is in
/// progress.
const STATUS_WAIT: Duration = Duration::from_secs(5);

/// Runs the worker loop until cancelled, the projection disappears, or an
/// unrecoverable error occurs (the supervisor respawns on its next tick).
#[instrument(skip_all, fields(key))]
pub async fn run(
    client: GraphClient,
    names: GraphNames,
    kafka: KafkaConfig,
    inventory_config: InventoryConfig,
    key: String,
    database: String,
    status: watch::Receiver<Status>,
    cancel: CancellationToken,
) {
    if let Err(err) = run_inner(
        client,
        names,
        kafka,
        inventory_config,
        &key,
        &database,
        status,
        cancel,
    )
    .await
    {
        match err {
            UpdaterError::ProjectionDeleted(_) => {
                info!(key, "worker exiting: projection deleted");
            }
            err => {
                error!(key, %err, "worker exiting on error");
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_inner(
    client: GraphClient,
    names: GraphNames,
    kafka: KafkaConfig,
    inventory_config: InventoryConfig,
    key: &str,
    database: &str,
    status: watch::Receiver<Status>,
    cancel: CancellationToken,
) -> UpdaterResult<()> {
    let mut ctx = ProjectionContext::open(client, names, key).await?;
    // Each worker opens its own channel: multiplexing one across workers
    // would serialize their bulk reads.
    let inventory = InventoryClient::connect(&inventory_config).await?;
    let consumer = ChangeConsumer::subscribe(&kafka, database)?;
    let mut cache = load_cache(&ctx).await?;
    info!(key, tmos = cache.tmo.len(), "worker started");

    loop {
        let message = tokio::select! {
            () = cancel.cancelled() => {
                consumer.unsubscribe();
                info!(key, "worker stopped");
                return Ok(());
            }
            message = consumer.recv() => message?,
        };

        // Never race the full builder: wait out In Process.
        while *status.borrow() == Status::InProcess {
            tokio::select! {
                () = cancel.cancelled() => {
                    consumer.unsubscribe();
                    return Ok(());
                }
                () = tokio::time::sleep(STATUS_WAIT) => {}
            }
        }

        let change = match decode_borrowed(&message) {
            Ok(change) => change,
            Err(err) => {
                warn!(key, %err, "skipping undecodable change message");
                consumer.commit(&message)?;
                continue;
            }
        };
        let schema_class =
            matches!(change.class, EntityClass::Tmo | EntityClass::Tprm);

        cache.update_before(&change);
        let filtered = cache.filter(change.payload);
        let change = crate::decode::ChangeMessage {
            class: change.class,
            op: change.op,
            payload: filtered,
        };
        cache.update_after(&change);

        if change.payload.is_empty() {
            consumer.commit(&message)?;
            continue;
        }

        match handlers::apply(&mut ctx, &inventory, change).await {
            Ok(()) => {}
            Err(UpdaterError::ProjectionDeleted(key)) => {
                consumer.unsubscribe();
                return Err(UpdaterError::ProjectionDeleted(key));
            }
            Err(err) => {
                consumer.unsubscribe();
                return Err(err);
            }
        }
        consumer.commit(&message)?;

        // schema changes shift the active sets; reseed the cache
        if schema_class {
            cache = load_cache(&ctx).await?;
        }
    }
}

async fn load_cache(ctx: &ProjectionContext) -> UpdaterResult<TmoCache> {
    let tmos = ctx.all_tmos().await?;
    let trace_tmo_id = ctx.trace_tmo_id().await?;
    Ok(TmoCache::from_schema(&tmos, trace_tmo_id))
}
