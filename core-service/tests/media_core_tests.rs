//! Bootstrap and facade behavior against temp directories.

use async_trait::async_trait;
use bridge_traits::{BridgeError, CapturedFrame, FrameCapture};
use core_library::{SettingValue, SettingsRepository};
use core_metadata::{AssetFormat, EvictOptions};
use core_runtime::events::{BackupEvent, CacheEvent, SyncEvent};
use core_service::{CoreConfig, CoreError, CoreEvent, MediaCore, SCAN_PATHS_SETTING};
use core_sync::SyncError;
use mockall::mock;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

mock! {
    Capture {}

    #[async_trait]
    impl FrameCapture for Capture {
        async fn capture_frame(&self, video_path: &std::path::Path) -> bridge_traits::Result<CapturedFrame>;
    }
}

fn no_decoder() -> Arc<dyn FrameCapture> {
    let mut capture = MockCapture::new();
    capture
        .expect_capture_frame()
        .returning(|_| Err(BridgeError::NotAvailable("ffmpeg".to_string())));
    Arc::new(capture)
}

struct Fixture {
    root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let root = std::env::temp_dir().join(format!("media-core-it-{}", Uuid::new_v4()));
        Self { root }
    }

    fn config(&self) -> core_runtime::config::CoreConfigBuilder {
        CoreConfig::builder()
            .database_path(self.root.join("data").join("library.db"))
            .asset_cache_dir(self.root.join("cache"))
            .backup_dir(self.root.join("backups"))
            .scan_root(self.root.join("configured"))
            .frame_capture(no_decoder())
    }

    async fn write(&self, relative: &str, contents: &[u8]) -> PathBuf {
        let path = self.root.join(relative);
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(&path, contents).await.unwrap();
        path
    }

    async fn cleanup(self) {
        tokio::fs::remove_dir_all(&self.root).await.ok();
    }
}

#[tokio::test]
async fn test_bootstrap_creates_storage_layout() {
    let fixture = Fixture::new();
    let core = MediaCore::bootstrap(fixture.config().build().unwrap())
        .await
        .unwrap();

    assert!(fixture.root.join("data").join("library.db").exists());
    assert!(fixture.root.join("cache").is_dir());
    assert!(fixture.root.join("backups").is_dir());
    assert!(core.store().is_connected().await);
    assert!(core.extractor().has_frame_capture());
    assert!(core.store().schema_version().await.unwrap().is_some());

    core.shutdown().await;
    assert!(!core.store().is_connected().await);
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_scan_paths_setting_overrides_configured_roots() {
    let fixture = Fixture::new();
    fixture.write("configured/ignored.mp3", b"configured").await;
    fixture.write("library/song.mp3", b"from settings").await;

    let core = MediaCore::bootstrap(fixture.config().build().unwrap())
        .await
        .unwrap();
    assert_eq!(
        core.resolve_scan_roots().await.unwrap(),
        vec![fixture.root.join("configured")]
    );

    let library = fixture.root.join("library").display().to_string();
    core.store()
        .settings()
        .await
        .unwrap()
        .set(SCAN_PATHS_SETTING, &SettingValue::Object(json!([library])), None)
        .await
        .unwrap();

    let summary = core.run_full_sync().await.unwrap();
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.upserted, 1);

    let stats = core.stats().await.unwrap();
    assert_eq!(stats.total_files, 1);

    core.shutdown().await;
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_cleanup_unused_assets_keeps_referenced_pictures() {
    let fixture = Fixture::new();
    let core = MediaCore::bootstrap(fixture.config().build().unwrap())
        .await
        .unwrap();
    let mut events = core.subscribe_events();

    let cache = core.asset_cache();
    let orphan = cache
        .save_content(vec![1u8; 64], Some(AssetFormat::Png))
        .await
        .unwrap()
        .unwrap();

    let dry = core
        .cleanup_unused_assets(&EvictOptions {
            dry_run: true,
            ..EvictOptions::default()
        })
        .await
        .unwrap();
    assert_eq!(dry.deleted_paths, vec![orphan.clone()]);
    assert!(cache.contains(&orphan).await);

    let report = core
        .cleanup_unused_assets(&EvictOptions::default())
        .await
        .unwrap();
    assert_eq!(report.deleted_count, 1);
    assert!(!cache.contains(&orphan).await);

    let event = events.try_recv().unwrap();
    assert_eq!(
        event,
        CoreEvent::Cache(CacheEvent::Evicted {
            deleted_count: 1,
            freed_bytes: 64,
            reason: "unused".to_string(),
        })
    );

    core.shutdown().await;
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_backup_lifecycle_publishes_events() {
    let fixture = Fixture::new();
    let core = MediaCore::bootstrap(fixture.config().build().unwrap())
        .await
        .unwrap();
    let mut events = core.subscribe_events();

    let record = core.create_backup(Some("before upgrade")).await.unwrap();
    assert_eq!(core.list_backups().await.unwrap().len(), 1);

    let report = core.restore_backup(&record.id).await.unwrap();
    assert_eq!(report.backup_id, record.id);
    assert!(core.store().is_connected().await);

    core.delete_backup(&record.id).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(CoreEvent::Backup(event)) = events.try_recv() {
        seen.push(event);
    }
    assert!(matches!(seen.first(), Some(BackupEvent::Created { .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, BackupEvent::Restored { backup_id } if *backup_id == record.id)));
    assert!(matches!(seen.last(), Some(BackupEvent::Deleted { .. })));

    core.shutdown().await;
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_restore_holds_off_syncs() {
    let fixture = Fixture::new();
    let core = MediaCore::bootstrap(fixture.config().build().unwrap())
        .await
        .unwrap();
    let record = core.create_backup(None).await.unwrap();

    let engine = core.sync_engine();
    let pause = engine.pause().unwrap();
    assert!(matches!(
        core.restore_backup(&record.id).await,
        Err(CoreError::Sync(SyncError::SyncInProgress))
    ));
    drop(pause);

    core.restore_backup(&record.id).await.unwrap();
    assert!(!core.sync_engine().is_running());
    core.run_full_sync().await.unwrap();

    core.shutdown().await;
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_background_sync_runs_on_startup_and_stops_on_shutdown() {
    let fixture = Fixture::new();
    fixture.write("configured/a.flac", b"flac").await;

    let config = fixture
        .config()
        .scan_on_startup(true)
        .scan_interval(Duration::from_secs(3600))
        .build()
        .unwrap();
    let core = Arc::new(MediaCore::bootstrap(config).await.unwrap());
    let mut events = core.subscribe_events();
    core.start_background_tasks();

    let completed = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Ok(CoreEvent::Sync(SyncEvent::Completed { scanned, .. })) = events.recv().await {
                return scanned;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(completed, 1);

    tokio::time::timeout(Duration::from_secs(10), core.shutdown())
        .await
        .unwrap();
    fixture.cleanup().await;
}
