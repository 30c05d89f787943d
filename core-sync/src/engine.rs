//! # Sync Engine
//!
//! Brings the catalog in line with the scan roots.
//!
//! ## Workflow
//!
//! 1. Discover media files under every root (see [`Scanner`])
//! 2. Persist them in fixed-size batches: categories first, then one
//!    transactional upsert per batch
//! 3. Remove records whose file no longer exists, then categories nothing
//!    references, in a single transaction
//! 4. Refresh the stats snapshot with the scan time
//!
//! Reconciliation only starts after every batch has committed, so a delete
//! never races an insert of the same file.
//!
//! Only one sync runs at a time. A second call while one is active fails with
//! [`SyncError::SyncInProgress`]; it is not queued. Progress can be polled
//! through [`SyncEngine::progress`] and is also published on the event bus.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let engine = SyncEngine::new(store, scanner, event_bus);
//! let summary = engine
//!     .run_full_sync(&[PathBuf::from("/music")], &CancellationToken::new())
//!     .await?;
//! println!("{} files indexed", summary.upserted);
//! ```

use chrono::Utc;
use core_library::repositories::{delete_unused_categories, delete_urls};
use core_library::{
    BatchResult, CategoryRepository, LibraryError, MediaRepository, NewMediaCategory, Store,
};
use core_runtime::events::{CoreEvent, EventBus, LibraryEvent, SyncEvent};
use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{Result, SyncError};
use crate::progress::{ProgressSnapshot, ProgressTracker};
use crate::scanner::{DiscoveredFile, Scanner};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Progress events during discovery are emitted every this many files.
const DISCOVERY_EVENT_INTERVAL: u64 = 50;

const PHASE_DISCOVERING: &str = "discovering";
const PHASE_PERSISTING: &str = "persisting";
const PHASE_RECONCILING: &str = "reconciling";
const PHASE_REFRESHING: &str = "refreshing-stats";
const PHASE_PAUSED: &str = "paused";

/// Outcome of one full sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub job_id: String,
    /// Media files found on disk
    pub scanned: u64,
    pub upserted: u64,
    pub failed: u64,
    pub removed_missing: u64,
    pub removed_categories: u64,
    pub duration_ms: u64,
    /// Per-row and per-category failures, in the order they occurred
    pub errors: Vec<String>,
}

pub struct SyncEngine {
    store: Arc<Store>,
    scanner: Scanner,
    event_bus: EventBus,
    batch_size: usize,
    progress: ProgressTracker,
}

/// Held single-flight slot from [`SyncEngine::pause`]. Dropping it lets
/// syncs start again.
#[must_use = "the pause ends when the guard is dropped"]
pub struct SyncPause<'a> {
    progress: &'a ProgressTracker,
}

impl Drop for SyncPause<'_> {
    fn drop(&mut self) {
        self.progress.release();
        debug!("Sync resumed");
    }
}

impl SyncEngine {
    pub fn new(store: Arc<Store>, scanner: Scanner, event_bus: EventBus) -> Self {
        Self {
            store,
            scanner,
            event_bus,
            batch_size: DEFAULT_BATCH_SIZE,
            progress: ProgressTracker::new(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.progress.is_active()
    }

    /// Take the single-flight slot without syncing, so every sync started
    /// while the guard lives fails with [`SyncError::SyncInProgress`].
    ///
    /// Returns `None` when a sync already holds the slot.
    pub fn pause(&self) -> Option<SyncPause<'_>> {
        if !self.progress.try_begin(PHASE_PAUSED) {
            return None;
        }
        debug!("Sync paused");
        Some(SyncPause {
            progress: &self.progress,
        })
    }

    /// Scan `roots` and reconcile the catalog with what was found.
    ///
    /// `cancel` is checked between files and between batches. A cancelled
    /// sync keeps the batches already committed and skips reconciliation.
    #[instrument(skip(self, roots, cancel), fields(roots = roots.len()))]
    pub async fn run_full_sync(
        &self,
        roots: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<SyncSummary> {
        if !self.progress.try_begin(PHASE_DISCOVERING) {
            warn!("Rejected sync request, another sync is running");
            return Err(SyncError::SyncInProgress);
        }

        let job_id = Uuid::new_v4().to_string();
        info!(job_id = %job_id, "Starting full sync");
        self.emit(SyncEvent::Started {
            job_id: job_id.clone(),
            roots: roots.iter().map(|r| r.display().to_string()).collect(),
        });

        let started = Instant::now();
        match self.execute(&job_id, roots, cancel, started).await {
            Ok(summary) => {
                self.progress.complete();
                info!(
                    job_id = %job_id,
                    scanned = summary.scanned,
                    upserted = summary.upserted,
                    failed = summary.failed,
                    duration_ms = summary.duration_ms,
                    "Sync completed"
                );
                self.emit(SyncEvent::Completed {
                    job_id: summary.job_id.clone(),
                    scanned: summary.scanned,
                    upserted: summary.upserted,
                    failed: summary.failed,
                    removed_missing: summary.removed_missing,
                    removed_categories: summary.removed_categories,
                    duration_ms: summary.duration_ms,
                });
                Ok(summary)
            }
            Err(SyncError::Cancelled) => {
                let items_processed = self.progress.snapshot().processed_files;
                self.progress.cancel();
                info!(job_id = %job_id, items_processed, "Sync cancelled");
                self.emit(SyncEvent::Cancelled {
                    job_id,
                    items_processed,
                });
                Err(SyncError::Cancelled)
            }
            Err(e) => {
                let items_processed = self.progress.snapshot().processed_files;
                self.progress.fail(e.to_string());
                error!(job_id = %job_id, error = %e, "Sync failed");
                self.emit(SyncEvent::Failed {
                    job_id,
                    message: e.to_string(),
                    items_processed,
                });
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        job_id: &str,
        roots: &[PathBuf],
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<SyncSummary> {
        info!("Phase 1: Discovering media files");
        let files = self
            .scanner
            .discover_with_progress(roots, cancel, |described| {
                self.progress.set_processed(described);
                if described % DISCOVERY_EVENT_INTERVAL == 0 {
                    self.emit_progress(job_id, described, None, PHASE_DISCOVERING);
                }
            })
            .await?;
        let scanned = files.len() as u64;
        info!(scanned, "Discovered media files");

        self.progress.set_total(scanned, PHASE_PERSISTING);
        self.progress.set_processed(0);

        info!("Phase 2: Persisting {} files in batches of {}", scanned, self.batch_size);
        let batch = self.persist(job_id, &files, cancel).await?;

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        info!("Phase 3: Reconciling missing files");
        self.progress.set_phase(PHASE_RECONCILING);
        let (removed_missing, removed_categories) = self.reconcile().await?;

        info!("Phase 4: Refreshing statistics");
        self.progress.set_phase(PHASE_REFRESHING);
        let stats = self
            .store
            .refresh_stats_snapshot(Some(Utc::now().timestamp()))
            .await?;
        self.emit_library(LibraryEvent::StatsRefreshed {
            total_files: stats.total_files.max(0) as u64,
            total_size: stats.total_size.max(0) as u64,
        });

        Ok(SyncSummary {
            job_id: job_id.to_string(),
            scanned,
            upserted: batch.success,
            failed: batch.failed,
            removed_missing,
            removed_categories,
            duration_ms: started.elapsed().as_millis() as u64,
            errors: batch.errors,
        })
    }

    /// Upsert discovered files batch by batch, categories before records.
    async fn persist(
        &self,
        job_id: &str,
        files: &[DiscoveredFile],
        cancel: &CancellationToken,
    ) -> Result<BatchResult> {
        let media = self.store.media().await?;
        let categories = self.store.categories().await?;
        let total = files.len() as u64;
        let mut result = BatchResult::default();
        let mut processed = 0u64;

        for chunk in files.chunks(self.batch_size) {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let mut seen: HashSet<&NewMediaCategory> = HashSet::new();
            for file in chunk {
                if !seen.insert(&file.category) {
                    continue;
                }
                if let Err(e) = categories.upsert(&file.category).await {
                    warn!(prepose = %file.category.prepose, error = %e, "Failed to upsert category");
                    result
                        .errors
                        .push(format!("category {}: {}", file.category.prepose, e));
                }
            }

            let records: Vec<_> = chunk.iter().map(DiscoveredFile::to_new_media_file).collect();
            let outcome = media.upsert_batch(&records).await?;
            debug!(
                success = outcome.success,
                failed = outcome.failed,
                "Batch persisted"
            );

            processed += chunk.len() as u64;
            self.progress.advance(chunk.len() as u64);
            self.progress.push_errors(outcome.errors.iter().cloned());
            result.merge(outcome);

            self.emit_progress(job_id, processed, Some(total), PHASE_PERSISTING);
        }

        Ok(result)
    }

    /// Delete records for vanished files and the categories left unused.
    async fn reconcile(&self) -> Result<(u64, u64)> {
        let missing = self.store.media().await?.find_missing_urls().await?;
        if !missing.is_empty() {
            debug!(count = missing.len(), "Files missing from disk");
        }

        let (removed_missing, removed_categories) = self
            .store
            .transaction(move |conn| {
                Box::pin(async move {
                    let removed = delete_urls(conn, &missing).await?;
                    let pruned = delete_unused_categories(conn).await?;
                    Ok::<_, LibraryError>((removed, pruned))
                })
            })
            .await?;

        if removed_missing > 0 {
            info!(count = removed_missing, "Removed records for missing files");
            self.emit_library(LibraryEvent::MissingFilesRemoved {
                count: removed_missing,
            });
        }
        if removed_categories > 0 {
            info!(count = removed_categories, "Removed unused categories");
            self.emit_library(LibraryEvent::CategoriesPruned {
                count: removed_categories,
            });
        }

        Ok((removed_missing, removed_categories))
    }

    fn emit_progress(&self, job_id: &str, processed: u64, total: Option<u64>, phase: &str) {
        let percent = match total {
            Some(total) if total > 0 => ((processed * 100) / total).min(100) as u8,
            _ => 0,
        };
        self.emit(SyncEvent::Progress {
            job_id: job_id.to_string(),
            items_processed: processed,
            total_items: total,
            percent,
            phase: phase.to_string(),
        });
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is not an error.
        self.event_bus.emit(CoreEvent::Sync(event)).ok();
    }

    fn emit_library(&self, event: LibraryEvent) {
        self.event_bus.emit(CoreEvent::Library(event)).ok();
    }
}
