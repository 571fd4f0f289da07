//! Worker supervisor.
//!
//! An infinite poll loop over the registry: new projections spawn a worker,
//! status changes refresh the worker's gauge, vanished projections cancel
//! theirs. Workers that exited on their own (error, projection deletion)
//! are reaped and respawned on the next tick if their record still exists.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use topograph_core::registry::Registry;
use topograph_inventory::InventoryConfig;
use topograph_model::{GraphNames, Status};
use topograph_store::GraphClient;

use crate::config::{KafkaConfig, SupervisorConfig};
use crate::error::UpdaterResult;
use crate::worker;

struct WorkerState {
    status: watch::Sender<Status>,
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// The worker fleet of this process.
pub struct Supervisor {
    client: GraphClient,
    names: GraphNames,
    kafka: KafkaConfig,
    inventory: InventoryConfig,
    config: SupervisorConfig,
    workers: HashMap<String, WorkerState>,
}

impl Supervisor {
    #[must_use]
    pub fn new(
        client: GraphClient,
        names: GraphNames,
        kafka: KafkaConfig,
        inventory: InventoryConfig,
        config: SupervisorConfig,
    ) -> Self {
        Supervisor {
            client,
            names,
            kafka,
            inventory,
            config,
            workers: HashMap::new(),
        }
    }

    /// Runs forever, polling the registry with the configured period.
    pub async fn run(mut self) -> UpdaterResult<()> {
        let period = Duration::from_secs(self.config.poll_period_secs);
        loop {
            if let Err(err) = self.tick().await {
                warn!(%err, "supervisor tick failed");
            }
            tokio::time::sleep(period).await;
        }
    }

    /// One reconciliation pass.
    #[instrument(skip_all)]
    pub async fn tick(&mut self) -> UpdaterResult<()> {
        self.reap_finished();

        let registry = Registry::new(self.client.clone(), self.names.clone());
        let records = registry.list().await?;
        let current: HashMap<String, (Status, String)> = records
            .into_iter()
            .map(|record| {
                (
                    record.key,
                    (record.body.status, record.body.database),
                )
            })
            .collect();

        let known: HashSet<&String> = self.workers.keys().collect();
        let created: Vec<&String> = current
            .keys()
            .filter(|key| !known.contains(key))
            .collect();
        let deleted: Vec<String> = self
            .workers
            .keys()
            .filter(|key| !current.contains_key(*key))
            .cloned()
            .collect();

        for (key, state) in &self.workers {
            if let Some((status, _)) = current.get(key) {
                if *state.status.borrow() != *status {
                    let _ = state.status.send(*status);
                }
            }
        }
        for key in created {
            let Some((status, database)) = current.get(key) else { continue };
            self.spawn_worker(key.clone(), database.clone(), *status);
        }
        for key in deleted {
            self.stop_worker(&key).await;
        }
        Ok(())
    }

    fn spawn_worker(&mut self, key: String, database: String, status: Status) {
        let (status_tx, status_rx) = watch::channel(status);
        let cancel = CancellationToken::new();
        let join = tokio::spawn(worker::run(
            self.client.clone(),
            self.names.clone(),
            self.kafka.clone(),
            self.inventory.clone(),
            key.clone(),
            database,
            status_rx,
            cancel.clone(),
        ));
        info!(key, "worker spawned");
        self.workers.insert(
            key,
            WorkerState {
                status: status_tx,
                cancel,
                join,
            },
        );
    }

    async fn stop_worker(&mut self, key: &str) {
        let Some(state) = self.workers.remove(key) else {
            return;
        };
        state.cancel.cancel();
        // the worker acknowledges at its next poll boundary
        if tokio::time::timeout(Duration::from_secs(30), state.join)
            .await
            .is_err()
        {
            warn!(key, "worker did not stop in time");
        }
        info!(key, "worker stopped");
    }

    /// Drops workers that exited on their own; the next tick respawns the
    /// ones whose projection still exists.
    fn reap_finished(&mut self) {
        let finished: Vec<String> = self
            .workers
            .iter()
            .filter(|(_, state)| state.join.is_finished())
            .map(|(key, _)| key.clone())
            .collect();
        for key in finished {
            self.workers.remove(&key);
            info!(key, "worker reaped");
        }
    }

    /// Worker count (for observability and tests).
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}
