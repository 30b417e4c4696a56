//! Background maintenance: periodic expiry sweep and storage-pressure checks

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::MaintenanceConfig;
use crate::store::{CacheStore, SweepReport};

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Running maintenance task
///
/// Dropping the handle stops the task without a final sweep.
pub struct MaintenanceHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
    store: Arc<CacheStore>,
}

impl MaintenanceHandle {
    /// Stop the task and run one last sweep
    pub async fn shutdown(self) -> SweepReport {
        let _ = self.shutdown.send(());
        if let Err(e) = self.task.await {
            warn!("Cache maintenance task failed: {}", e);
        }
        self.store.sweep_expired()
    }
}

/// Spawn the maintenance loop on the current tokio runtime
///
/// The first sweep and the first storage check happen one full interval
/// after spawning; the store already swept at open.
pub fn spawn_maintenance(store: Arc<CacheStore>, config: &MaintenanceConfig) -> MaintenanceHandle {
    let (shutdown, mut stop) = oneshot::channel();
    let sweep_every = config.sweep_interval().max(MIN_INTERVAL);
    let check_every = config.storage_check_interval().max(MIN_INTERVAL);

    info!(
        "Cache maintenance started (sweep every {:?}, storage check every {:?})",
        sweep_every, check_every
    );

    let task_store = store.clone();
    let task = tokio::spawn(async move {
        let mut sweep = interval_at(Instant::now() + sweep_every, sweep_every);
        let mut check = interval_at(Instant::now() + check_every, check_every);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    task_store.sweep_expired();
                }
                _ = check.tick() => {
                    task_store.check_storage_usage();
                }
                _ = &mut stop => break,
            }
        }

        debug!("Cache maintenance stopped");
    });

    MaintenanceHandle {
        shutdown,
        task,
        store,
    }
}
