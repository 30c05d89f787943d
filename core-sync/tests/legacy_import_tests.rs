use core_library::{
    CategoryRepository, DatabaseConfig, MediaRepository, SettingValue, SettingsRepository, Store,
};
use core_sync::{LegacyImporter, ProgressStatus, SyncError};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

async fn setup() -> (PathBuf, Arc<Store>, LegacyImporter) {
    let dir = std::env::temp_dir().join(format!("legacy-import-it-{}", Uuid::new_v4()));
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let store = Arc::new(Store::new(DatabaseConfig::in_memory()));
    store.connect().await.unwrap();
    let importer = LegacyImporter::new(store.clone(), &dir);
    (dir, store, importer)
}

async fn write_json(dir: &PathBuf, name: &str, value: serde_json::Value) {
    tokio::fs::write(dir.join(name), serde_json::to_vec(&value).unwrap())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_import_media_categories_and_settings() {
    let (dir, store, importer) = setup().await;
    assert!(!importer.has_legacy_data().await);

    write_json(
        &dir,
        "fileCache.json",
        json!([
            {
                "Url": "/old/music/a.mp3",
                "Name": "a.mp3",
                "Suffix": ".mp3",
                "Size": 2048,
                "info": {
                    "duration": 215.5,
                    "artist": "X",
                    "album": "Y",
                    "quality": "high",
                    "picture": "images/abc.jpg"
                },
                "classify": "ignored"
            },
            { "Url": "", "Name": "broken.mp3", "Suffix": ".mp3", "Size": 1 }
        ]),
    )
    .await;
    write_json(
        &dir,
        "classifyType.json",
        json!([{ "year": "2022", "month": "4", "day": "09", "prepose": "music", "picture": "images/abc.jpg" }]),
    )
    .await;
    write_json(
        &dir,
        "config.json",
        json!({
            "theme": "dark",
            "scanOnStartup": true,
            "scanInterval": 30,
            "scanPaths": ["/old/music"]
        }),
    )
    .await;
    assert!(importer.has_legacy_data().await);

    let report = importer.import().await.unwrap();
    assert_eq!(report.media.success, 1);
    assert_eq!(report.media.failed, 1);
    assert_eq!(report.categories_imported, 1);
    // Four present keys plus the always-written password.
    assert_eq!(report.settings_imported, 5);

    let record = store
        .media()
        .await
        .unwrap()
        .find_by_url("/old/music/a.mp3")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.artist, "X");
    assert_eq!(record.duration, 215.5);
    assert_eq!(record.picture.as_deref(), Some("images/abc.jpg"));

    let categories = store.categories().await.unwrap().list().await.unwrap();
    assert_eq!(categories[0].month, "04");

    let settings = store.settings().await.unwrap();
    assert_eq!(
        settings.get_value("scanPaths").await.unwrap(),
        Some(SettingValue::Object(json!(["/old/music"])))
    );
    assert_eq!(
        settings.get_value("scanOnStartup").await.unwrap(),
        Some(SettingValue::Boolean(true))
    );

    let progress = importer.progress();
    assert_eq!(progress.status, ProgressStatus::Completed);
    assert_eq!(progress.total_files, 2);
    assert_eq!(progress.processed_files, 1);
    assert_eq!(progress.errors.len(), 1);

    let validation = importer.validate().await.unwrap();
    assert!(validation.is_valid, "{:?}", validation.issues);

    store.disconnect().await;
    tokio::fs::remove_dir_all(&dir).await.ok();
}

#[tokio::test]
async fn test_malformed_file_fails_import() {
    let (dir, store, importer) = setup().await;
    tokio::fs::write(dir.join("fileCache.json"), b"{ not json").await.unwrap();

    let result = importer.import().await;
    assert!(matches!(
        result,
        Err(SyncError::InvalidLegacyData { ref file, .. }) if file == "fileCache.json"
    ));
    assert_eq!(importer.progress().status, ProgressStatus::Failed);

    store.disconnect().await;
    tokio::fs::remove_dir_all(&dir).await.ok();
}

#[tokio::test]
async fn test_validate_reports_empty_catalog() {
    let (dir, store, importer) = setup().await;
    let validation = importer.validate().await.unwrap();
    assert!(!validation.is_valid);
    assert_eq!(validation.issues.len(), 2);

    store.disconnect().await;
    tokio::fs::remove_dir_all(&dir).await.ok();
}

#[tokio::test]
async fn test_archive_moves_legacy_files() {
    let (dir, store, importer) = setup().await;
    write_json(&dir, "config.json", json!({ "theme": "light" })).await;

    let archive = importer.archive_legacy_files().await.unwrap();
    assert!(archive.join("config.json").exists());
    assert!(!dir.join("config.json").exists());
    assert!(!importer.has_legacy_data().await);

    store.disconnect().await;
    tokio::fs::remove_dir_all(&dir).await.ok();
}
