use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use core_library::{
    BackupCoordinator, BackupRecord, BackupStats, DatabaseConfig, DatabaseStats,
    IntegrityReport, RestoreReport, SettingValue, SettingsRepository, Store,
};
use core_metadata::{
    AssetCache, AssetCacheConfig, EvictOptions, EvictionReport, MediaInspector, MetadataExtractor,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{
    BackupEvent, CacheEvent, CoreEvent, EventBus, LibraryEvent, DEFAULT_EVENT_BUFFER_SIZE,
};
use core_sync::{
    ImportReport, LegacyImporter, ProgressSnapshot, Scanner, ScannerConfig, SyncEngine,
    SyncSummary,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::error::{CoreError, Result};

/// Setting that overrides the configured scan roots.
pub const SCAN_PATHS_SETTING: &str = "scanPaths";

/// Process-wide handle to the indexing core.
///
/// Owns the store, the asset cache, the sync engine and the backup
/// coordinator, and publishes their activity on one [`EventBus`].
pub struct MediaCore {
    config: CoreConfig,
    store: Arc<Store>,
    asset_cache: Arc<AssetCache>,
    extractor: Arc<MetadataExtractor>,
    sync_engine: Arc<SyncEngine>,
    backups: Arc<BackupCoordinator>,
    event_bus: EventBus,
    shutdown: CancellationToken,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MediaCore {
    /// Bring up every component in dependency order.
    ///
    /// Storage directories are created, the store is connected (running
    /// pending migrations), the asset cache index is rebuilt from disk and
    /// brought under its size ceiling. A migration failure aborts bootstrap.
    #[instrument(skip(config), fields(database = %config.database_path.display()))]
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        if let Some(parent) = config.database_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::create_dir_all(&config.asset_cache_dir).await?;
        tokio::fs::create_dir_all(&config.backup_dir).await?;

        let event_bus = EventBus::new(DEFAULT_EVENT_BUFFER_SIZE);

        let store = Arc::new(Store::new(DatabaseConfig::new(&config.database_path)));
        store.connect().await?;
        info!(
            version = ?store.schema_version().await?,
            "Catalog connected"
        );

        let cache_config =
            AssetCacheConfig::new(&config.asset_cache_dir).max_size_bytes(config.cache_max_size_bytes());
        let asset_cache = Arc::new(AssetCache::new(cache_config)?);
        let indexed = asset_cache.initialize().await?;
        info!(count = indexed, "Asset cache index rebuilt");

        let mut extractor = MetadataExtractor::new(asset_cache.clone());
        match config.frame_capture() {
            Ok(capture) => extractor = extractor.with_frame_capture(capture),
            Err(e) => warn!(error = %e, "Videos will be indexed without thumbnails"),
        }
        let extractor = Arc::new(extractor);

        let inspector: Arc<dyn MediaInspector> = extractor.clone();
        let scanner = Scanner::with_config(
            inspector,
            ScannerConfig::default().workers(config.scan_workers),
        );
        let sync_engine = Arc::new(
            SyncEngine::new(store.clone(), scanner, event_bus.clone())
                .with_batch_size(config.sync_batch_size),
        );

        let backups = Arc::new(BackupCoordinator::new(
            store.clone(),
            &config.backup_dir,
            config.max_backups,
        ));

        let core = Self {
            config,
            store,
            asset_cache,
            extractor,
            sync_engine,
            backups,
            event_bus,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        };

        core.enforce_cache_bound().await?;
        info!("Media core ready");
        Ok(core)
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<Store> {
        self.store.clone()
    }

    pub fn asset_cache(&self) -> Arc<AssetCache> {
        self.asset_cache.clone()
    }

    pub fn extractor(&self) -> Arc<MetadataExtractor> {
        self.extractor.clone()
    }

    pub fn sync_engine(&self) -> Arc<SyncEngine> {
        self.sync_engine.clone()
    }

    pub fn backups(&self) -> Arc<BackupCoordinator> {
        self.backups.clone()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    // ------------------------------------------------------------------
    // Sync
    // ------------------------------------------------------------------

    /// Roots for the next sync: the `scanPaths` setting when it holds at
    /// least one path, the configured roots otherwise.
    pub async fn resolve_scan_roots(&self) -> Result<Vec<PathBuf>> {
        let setting = self
            .store
            .settings()
            .await?
            .get_value(SCAN_PATHS_SETTING)
            .await?;
        Ok(scan_roots_from_setting(setting.as_ref())
            .unwrap_or_else(|| self.config.scan_roots.clone()))
    }

    /// Full sync over the resolved roots. Stops early on shutdown.
    pub async fn run_full_sync(&self) -> Result<SyncSummary> {
        let roots = self.resolve_scan_roots().await?;
        self.run_full_sync_with(&roots, &self.shutdown.child_token())
            .await
    }

    pub async fn run_full_sync_with(
        &self,
        roots: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<SyncSummary> {
        Ok(self.sync_engine.run_full_sync(roots, cancel).await?)
    }

    pub fn sync_progress(&self) -> ProgressSnapshot {
        self.sync_engine.progress()
    }

    /// Importer for the JSON files written by earlier releases.
    pub fn legacy_importer(&self, source_dir: impl Into<PathBuf>) -> LegacyImporter {
        LegacyImporter::new(self.store.clone(), source_dir)
    }

    /// Import legacy JSON data from `source_dir` when any is present.
    pub async fn import_legacy(&self, source_dir: &Path) -> Result<Option<ImportReport>> {
        let importer = self.legacy_importer(source_dir);
        if !importer.has_legacy_data().await {
            return Ok(None);
        }
        let report = importer.import().await?;
        self.emit(CoreEvent::Library(LibraryEvent::LegacyImportCompleted {
            imported: report.media.success,
            failed: report.media.failed,
        }));
        Ok(Some(report))
    }

    // ------------------------------------------------------------------
    // Asset cache
    // ------------------------------------------------------------------

    /// Delete cached assets no media record or category references.
    #[instrument(skip(self, options), fields(dry_run = options.dry_run))]
    pub async fn cleanup_unused_assets(&self, options: &EvictOptions) -> Result<EvictionReport> {
        let used = self.store.referenced_assets().await?;
        let report = self.asset_cache.evict_unused(&used, options).await?;
        if !options.dry_run {
            self.emit_eviction(&report, "unused");
        }
        Ok(report)
    }

    /// Shrink the asset cache below its ceiling.
    pub async fn enforce_cache_bound(&self) -> Result<EvictionReport> {
        let report = self.asset_cache.enforce_size_bound().await?;
        self.emit_eviction(&report, "size-bound");
        Ok(report)
    }

    fn emit_eviction(&self, report: &EvictionReport, reason: &str) {
        if report.deleted_count == 0 {
            return;
        }
        info!(
            count = report.deleted_count,
            freed_bytes = report.freed_bytes,
            reason,
            "Evicted cached assets"
        );
        self.emit(CoreEvent::Cache(CacheEvent::Evicted {
            deleted_count: report.deleted_count as u64,
            freed_bytes: report.freed_bytes,
            reason: reason.to_string(),
        }));
    }

    // ------------------------------------------------------------------
    // Catalog maintenance
    // ------------------------------------------------------------------

    /// Stats snapshot from the last sync, computed live when none exists.
    pub async fn stats(&self) -> Result<DatabaseStats> {
        match self.store.cached_stats().await? {
            Some(stats) => Ok(stats),
            None => Ok(self.store.collect_stats().await?),
        }
    }

    pub async fn integrity_check(&self) -> Result<IntegrityReport> {
        Ok(self.store.integrity_check().await?)
    }

    pub async fn optimize(&self) -> Result<()> {
        self.store.optimize().await?;
        self.emit(CoreEvent::Library(LibraryEvent::Optimized));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Backups
    // ------------------------------------------------------------------

    pub async fn create_backup(&self, label: Option<&str>) -> Result<BackupRecord> {
        let record = self.backups.create_backup(label).await?;
        self.emit(CoreEvent::Backup(BackupEvent::Created {
            backup_id: record.id.clone(),
            file_name: record.file_name.clone(),
            size_bytes: record.size,
        }));
        Ok(record)
    }

    pub async fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        Ok(self.backups.list_backups().await?)
    }

    pub async fn backup_stats(&self) -> Result<BackupStats> {
        Ok(self.backups.backup_stats().await?)
    }

    pub async fn delete_backup(&self, id: &str) -> Result<()> {
        self.backups.delete_backup(id).await?;
        self.emit(CoreEvent::Backup(BackupEvent::Deleted {
            backup_id: id.to_string(),
        }));
        Ok(())
    }

    /// Restore a snapshot. Refused while a sync is writing to the catalog;
    /// syncs requested during the restore are rejected.
    pub async fn restore_backup(&self, id: &str) -> Result<RestoreReport> {
        let _paused = self
            .sync_engine
            .pause()
            .ok_or(CoreError::Sync(core_sync::SyncError::SyncInProgress))?;

        match self.backups.restore_backup(id).await {
            Ok(report) => {
                self.emit(CoreEvent::Backup(BackupEvent::Restored {
                    backup_id: id.to_string(),
                }));
                Ok(report)
            }
            Err(e) => {
                self.emit(CoreEvent::Backup(BackupEvent::RestoreFailed {
                    backup_id: id.to_string(),
                    message: e.to_string(),
                }));
                Err(e.into())
            }
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Stop background work and close the catalog.
    pub async fn shutdown(&self) {
        info!("Shutting down media core");
        self.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        self.store.disconnect().await;
    }

    pub(crate) fn emit(&self, event: CoreEvent) {
        self.event_bus.emit(event).ok();
    }
}

/// Paths held by a `scanPaths` setting.
///
/// Accepts a JSON array of strings, or a string containing one. Returns
/// `None` when the setting is absent or lists no paths.
pub fn scan_roots_from_setting(setting: Option<&SettingValue>) -> Option<Vec<PathBuf>> {
    let parsed;
    let value = match setting? {
        SettingValue::Object(value) => value,
        SettingValue::Text(text) => {
            parsed = serde_json::from_str::<serde_json::Value>(text).ok()?;
            &parsed
        }
        _ => return None,
    };

    let roots: Vec<PathBuf> = value
        .as_array()?
        .iter()
        .filter_map(|entry| entry.as_str())
        .map(str::trim)
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
        .collect();

    (!roots.is_empty()).then_some(roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scan_roots_from_array() {
        let setting = SettingValue::Object(json!(["/music", "  ", "/videos", 3]));
        assert_eq!(
            scan_roots_from_setting(Some(&setting)),
            Some(vec![PathBuf::from("/music"), PathBuf::from("/videos")])
        );
    }

    #[test]
    fn test_scan_roots_from_encoded_string() {
        let setting = SettingValue::Text(r#"["/music"]"#.to_string());
        assert_eq!(
            scan_roots_from_setting(Some(&setting)),
            Some(vec![PathBuf::from("/music")])
        );
    }

    #[test]
    fn test_scan_roots_fall_back_when_empty_or_absent() {
        assert_eq!(scan_roots_from_setting(None), None);
        assert_eq!(
            scan_roots_from_setting(Some(&SettingValue::Object(json!([])))),
            None
        );
        assert_eq!(
            scan_roots_from_setting(Some(&SettingValue::Text("not json".into()))),
            None
        );
        assert_eq!(
            scan_roots_from_setting(Some(&SettingValue::Boolean(true))),
            None
        );
    }
}
