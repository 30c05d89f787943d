//! Periodic maintenance driven by [`CoreConfig`](core_runtime::config::CoreConfig):
//! the startup sync, interval syncs and asset cache enforcement.
//!
//! Every loop exits when [`MediaCore::shutdown`] cancels the shared token.

use std::sync::Arc;
use std::time::Duration;

use core_sync::SyncError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::service::MediaCore;

impl MediaCore {
    /// Spawn the maintenance loops the configuration asks for.
    ///
    /// Safe to call once per core; the handles are joined by `shutdown`.
    pub fn start_background_tasks(self: &Arc<Self>) {
        let mut handles = Vec::new();

        match self.config().scan_interval {
            Some(interval) => {
                let first_tick_now = self.config().scan_on_startup;
                handles.push(spawn_sync_loop(self.clone(), interval, first_tick_now));
            }
            None if self.config().scan_on_startup => {
                handles.push(spawn_startup_sync(self.clone()));
            }
            None => {}
        }

        if let Some(interval) = self.config().cache_enforce_interval {
            handles.push(spawn_cache_loop(self.clone(), interval));
        }

        info!(tasks = handles.len(), "Background maintenance started");
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.extend(handles),
            Err(poisoned) => poisoned.into_inner().extend(handles),
        }
    }
}

fn spawn_startup_sync(core: Arc<MediaCore>) -> JoinHandle<()> {
    tokio::spawn(async move {
        run_scheduled_sync(&core).await;
    })
}

fn spawn_sync_loop(core: Arc<MediaCore>, period: Duration, first_tick_now: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        let token = core.shutdown_token().clone();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        if !first_tick_now {
            // The first tick completes immediately.
            ticker.tick().await;
        }

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => run_scheduled_sync(&core).await,
            }
        }
        debug!("Sync loop stopped");
    })
}

fn spawn_cache_loop(core: Arc<MediaCore>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let token = core.shutdown_token().clone();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = core.enforce_cache_bound().await {
                        warn!(error = %e, "Cache enforcement failed");
                    }
                }
            }
        }
        debug!("Cache loop stopped");
    })
}

async fn run_scheduled_sync(core: &MediaCore) {
    match core.run_full_sync().await {
        Ok(summary) => debug!(job_id = %summary.job_id, "Scheduled sync finished"),
        Err(CoreError::Sync(SyncError::SyncInProgress)) => {
            debug!("Skipping scheduled sync, one is already running")
        }
        Err(CoreError::Sync(SyncError::Cancelled)) => {}
        Err(e) => warn!(error = %e, "Scheduled sync failed"),
    }
}
