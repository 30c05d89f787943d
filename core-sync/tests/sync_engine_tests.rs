//! Full sync against a real directory tree and an in-memory catalog.

use async_trait::async_trait;
use core_library::{
    CategoryRepository, DatabaseConfig, MediaFile, MediaRepository, SearchOptions, Store,
};
use core_metadata::{classify_quality, MediaAttributes, MediaInspector};
use core_runtime::events::{CoreEvent, EventBus, SyncEvent};
use core_sync::{ProgressStatus, Scanner, SyncEngine, SyncError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Returns fixed attributes for every file, optionally waiting on a gate.
struct StubInspector {
    attributes: MediaAttributes,
    gate: Option<Arc<Semaphore>>,
}

#[async_trait]
impl MediaInspector for StubInspector {
    async fn extract(&self, _path: &Path) -> MediaAttributes {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await;
        }
        self.attributes.clone()
    }
}

fn tagged_attributes() -> MediaAttributes {
    MediaAttributes {
        duration: 180.0,
        artist: "X".to_string(),
        quality: classify_quality(320, 44_100).to_string(),
        picture: Some("images/cover.jpg".to_string()),
        bitrate_kbps: Some(320),
        sample_rate: Some(44_100),
        ..MediaAttributes::unknown()
    }
}

struct Fixture {
    root: PathBuf,
    music: PathBuf,
    store: Arc<Store>,
    event_bus: EventBus,
    engine: Arc<SyncEngine>,
}

impl Fixture {
    async fn new() -> Self {
        Self::with_gate(None).await
    }

    async fn with_gate(gate: Option<Arc<Semaphore>>) -> Self {
        let root = std::env::temp_dir().join(format!("sync-engine-it-{}", Uuid::new_v4()));
        let music = root.join("music");
        tokio::fs::create_dir_all(&music).await.unwrap();

        let store = Arc::new(Store::new(DatabaseConfig::in_memory()));
        store.connect().await.unwrap();

        let inspector = Arc::new(StubInspector {
            attributes: tagged_attributes(),
            gate,
        });
        let event_bus = EventBus::new(256);
        let engine = Arc::new(
            SyncEngine::new(store.clone(), Scanner::new(inspector), event_bus.clone())
                .with_batch_size(2),
        );

        Self {
            root,
            music,
            store,
            event_bus,
            engine,
        }
    }

    async fn write(&self, relative: &str, contents: &[u8]) -> PathBuf {
        let path = self.music.join(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.unwrap();
        }
        tokio::fs::write(&path, contents).await.unwrap();
        path
    }

    async fn sync(&self) -> core_sync::Result<core_sync::SyncSummary> {
        self.engine
            .run_full_sync(&[self.music.clone()], &CancellationToken::new())
            .await
    }

    async fn all_records(&self) -> Vec<MediaFile> {
        let mut records = self
            .store
            .media()
            .await
            .unwrap()
            .query(&SearchOptions::new())
            .await
            .unwrap();
        records.sort_by(|a, b| a.url.cmp(&b.url));
        records
    }

    async fn cleanup(self) {
        self.store.disconnect().await;
        tokio::fs::remove_dir_all(&self.root).await.ok();
    }
}

#[tokio::test]
async fn test_sync_indexes_media_and_skips_other_files() {
    let fixture = Fixture::new().await;
    let track = fixture.write("a.mp3", b"ID3 not really audio").await;
    fixture.write("b.txt", b"notes").await;
    fixture.write("node_modules/c.mp3", b"ignored").await;

    let summary = fixture.sync().await.unwrap();
    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.upserted, 1);
    assert_eq!(summary.failed, 0);

    let hits = fixture
        .store
        .media()
        .await
        .unwrap()
        .query(&SearchOptions::new().artist("X"))
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    let record = &hits[0];
    assert_eq!(record.url, track.to_string_lossy());
    assert_eq!(record.name, "a.mp3");
    assert_eq!(record.suffix, ".mp3");
    assert_eq!(record.quality, "very-high");
    assert_eq!(record.duration, 180.0);
    assert!(record.file_hash.is_some());

    let categories = fixture.store.categories().await.unwrap().list().await.unwrap();
    assert_eq!(categories.len(), 1);
    assert_eq!(categories[0].prepose, "music");
    assert_eq!(categories[0].picture.as_deref(), Some("images/cover.jpg"));

    let stats = fixture.store.cached_stats().await.unwrap().unwrap();
    assert_eq!(stats.total_files, 1);
    assert_eq!(stats.music_files, 1);
    assert!(stats.last_scanned.is_some());

    assert_eq!(fixture.engine.progress().status, ProgressStatus::Completed);
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_rescan_is_idempotent() {
    let fixture = Fixture::new().await;
    for name in ["a.mp3", "b.flac", "c.mkv", "nested/d.ogg", "nested/e.mp4"] {
        fixture.write(name, name.as_bytes()).await;
    }

    let first = fixture.sync().await.unwrap();
    let before = fixture.all_records().await;

    let second = fixture.sync().await.unwrap();
    let after = fixture.all_records().await;

    assert_eq!(first.scanned, 5);
    assert_eq!(second.scanned, 5);
    assert_eq!(second.removed_missing, 0);
    assert_eq!(before.len(), after.len());

    let strip = |records: Vec<MediaFile>| -> Vec<MediaFile> {
        records
            .into_iter()
            .map(|mut r| {
                r.updated_at = 0;
                r
            })
            .collect()
    };
    assert_eq!(strip(before), strip(after));
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_sync_removes_records_for_deleted_files() {
    let fixture = Fixture::new().await;
    let keep = fixture.write("keep.mp3", b"keep").await;
    let gone = fixture.write("gone/gone.mp3", b"gone").await;

    fixture.sync().await.unwrap();
    assert_eq!(fixture.all_records().await.len(), 2);

    tokio::fs::remove_file(&gone).await.unwrap();
    let summary = fixture.sync().await.unwrap();

    assert_eq!(summary.scanned, 1);
    assert_eq!(summary.removed_missing, 1);
    let remaining = fixture.all_records().await;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].url, keep.to_string_lossy());
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_concurrent_sync_is_rejected() {
    let gate = Arc::new(Semaphore::new(0));
    let fixture = Fixture::with_gate(Some(gate.clone())).await;
    fixture.write("a.mp3", b"a").await;

    let engine = fixture.engine.clone();
    let roots = vec![fixture.music.clone()];
    let running = tokio::spawn(async move {
        engine
            .run_full_sync(&roots, &CancellationToken::new())
            .await
    });

    while !fixture.engine.is_running() {
        tokio::task::yield_now().await;
    }

    let second = fixture.sync().await;
    assert!(matches!(second, Err(SyncError::SyncInProgress)));

    gate.add_permits(1);
    let first = running.await.unwrap().unwrap();
    assert_eq!(first.upserted, 1);
    assert!(!fixture.engine.is_running());
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_cancelled_sync_writes_nothing() {
    let fixture = Fixture::new().await;
    fixture.write("a.mp3", b"a").await;
    let mut events = fixture.event_bus.subscribe();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = fixture
        .engine
        .run_full_sync(&[fixture.music.clone()], &cancel)
        .await;

    assert!(matches!(result, Err(SyncError::Cancelled)));
    assert_eq!(fixture.engine.progress().status, ProgressStatus::Cancelled);
    assert!(fixture.all_records().await.is_empty());

    let mut saw_cancelled = false;
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Sync(SyncEvent::Cancelled { .. }) = event {
            saw_cancelled = true;
        }
    }
    assert!(saw_cancelled);
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_sync_publishes_lifecycle_events() {
    let fixture = Fixture::new().await;
    fixture.write("a.mp3", b"a").await;
    fixture.write("b.mp3", b"b").await;
    fixture.write("c.mp3", b"c").await;
    let mut events = fixture.event_bus.subscribe();

    fixture.sync().await.unwrap();

    let mut received = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CoreEvent::Sync(event) = event {
            received.push(event);
        }
    }
    assert!(matches!(received.first(), Some(SyncEvent::Started { .. })));
    assert!(matches!(
        received.last(),
        Some(SyncEvent::Completed { scanned: 3, upserted: 3, .. })
    ));
    // Two batches of at most two files each.
    let persisting = received
        .iter()
        .filter(|e| matches!(e, SyncEvent::Progress { phase, .. } if phase == "persisting"))
        .count();
    assert_eq!(persisting, 2);
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_missing_root_yields_empty_sync() {
    let fixture = Fixture::new().await;
    let summary = fixture
        .engine
        .run_full_sync(
            &[fixture.root.join("does-not-exist")],
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(summary.scanned, 0);
    assert_eq!(summary.upserted, 0);
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_paused_engine_rejects_sync_until_resumed() {
    let fixture = Fixture::new().await;
    fixture.write("a.mp3", b"a").await;

    let pause = fixture.engine.pause().unwrap();
    assert!(fixture.engine.is_running());
    assert!(fixture.engine.pause().is_none());
    assert!(matches!(fixture.sync().await, Err(SyncError::SyncInProgress)));
    assert!(fixture.all_records().await.is_empty());

    drop(pause);
    assert_eq!(fixture.engine.progress().status, ProgressStatus::Idle);
    let summary = fixture.sync().await.unwrap();
    assert_eq!(summary.upserted, 1);
    fixture.cleanup().await;
}
