//! # Legacy JSON Import
//!
//! One-shot import of the flat JSON files written by earlier releases into
//! the relational catalog.
//!
//! ## Input Files
//!
//! All three live in one directory and are optional:
//!
//! - `fileCache.json`: array of `{Url, Name, Suffix, Size, info: {...}}`
//! - `classifyType.json`: array of `{year, month, day, prepose, picture}`
//! - `config.json`: application settings object
//!
//! Media records are written in batches of [`LEGACY_BATCH_SIZE`]. Row and
//! category failures are collected in the progress error list; a file that
//! cannot be parsed at all fails the import.

use chrono::Utc;
use core_library::{
    BatchResult, CategoryRepository, MediaRepository, NewMediaCategory, NewMediaFile,
    SettingValue, SettingsRepository, Store, UNKNOWN,
};
use core_metadata::sample_hash;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SyncError};
use crate::progress::{ProgressSnapshot, ProgressTracker};

pub const FILE_CACHE_JSON: &str = "fileCache.json";
pub const CATEGORIES_JSON: &str = "classifyType.json";
pub const CONFIG_JSON: &str = "config.json";
pub const LEGACY_BATCH_SIZE: usize = 1000;

/// Settings carried over from `config.json`, with their stored type.
const SETTING_KEYS: &[(&str, LegacySettingKind)] = &[
    ("theme", LegacySettingKind::Text),
    ("scanOnStartup", LegacySettingKind::Boolean),
    ("scanInterval", LegacySettingKind::Number),
    ("port", LegacySettingKind::Number),
    ("autoPlay", LegacySettingKind::Boolean),
    ("defaultVolume", LegacySettingKind::Number),
    ("rememberLastPlayed", LegacySettingKind::Boolean),
    ("showTray", LegacySettingKind::Boolean),
    ("minimization", LegacySettingKind::Boolean),
    ("isRole", LegacySettingKind::Boolean),
    ("scanPaths", LegacySettingKind::Object),
    ("password", LegacySettingKind::Text),
];

#[derive(Debug, Clone, Copy)]
enum LegacySettingKind {
    Text,
    Number,
    Boolean,
    Object,
}

#[derive(Debug, Deserialize)]
struct LegacyFile {
    #[serde(rename = "Url")]
    url: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Suffix", default)]
    suffix: String,
    #[serde(rename = "Size", default)]
    size: f64,
    #[serde(default)]
    info: Option<LegacyInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LegacyInfo {
    duration: Option<f64>,
    artist: Option<String>,
    album: Option<String>,
    quality: Option<String>,
    resolution: Option<String>,
    picture: Option<String>,
    lyrics: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyCategory {
    #[serde(deserialize_with = "date_part")]
    year: String,
    #[serde(deserialize_with = "date_part")]
    month: String,
    #[serde(deserialize_with = "date_part")]
    day: String,
    #[serde(default)]
    prepose: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

/// Accepts `"03"`, `"3"` or `3`, padding to two digits.
fn date_part<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        other => {
            return Err(serde::de::Error::custom(format!(
                "expected string or number, found {}",
                other
            )))
        }
    };
    Ok(match raw.trim().parse::<u32>() {
        Ok(n) => format!("{:02}", n),
        Err(_) => raw,
    })
}

/// Counts from a finished import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub media: BatchResult,
    pub categories_imported: u64,
    pub settings_imported: u64,
    pub errors: Vec<String>,
}

/// Post-import sanity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportValidation {
    pub is_valid: bool,
    pub issues: Vec<String>,
}

pub struct LegacyImporter {
    store: Arc<Store>,
    source_dir: PathBuf,
    progress: ProgressTracker,
}

impl LegacyImporter {
    pub fn new(store: Arc<Store>, source_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            source_dir: source_dir.into(),
            progress: ProgressTracker::new(),
        }
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.subscribe()
    }

    /// True when any of the legacy files is present. Empty data files do
    /// not count; an empty `config.json` does.
    pub async fn has_legacy_data(&self) -> bool {
        let non_empty = |name: &'static str| {
            let path = self.source_dir.join(name);
            async move {
                tokio::fs::metadata(&path)
                    .await
                    .map(|meta| meta.len() > 0)
                    .unwrap_or(false)
            }
        };
        non_empty(FILE_CACHE_JSON).await
            || non_empty(CATEGORIES_JSON).await
            || tokio::fs::try_exists(self.source_dir.join(CONFIG_JSON))
                .await
                .unwrap_or(false)
    }

    /// Import media records, then categories, then settings, and refresh the
    /// stats snapshot.
    #[instrument(skip(self), fields(source = %self.source_dir.display()))]
    pub async fn import(&self) -> Result<ImportReport> {
        if !self.progress.try_begin("importing") {
            return Err(SyncError::ImportInProgress);
        }
        info!("Starting legacy import");

        match self.run_import().await {
            Ok(report) => {
                self.progress.complete();
                info!(
                    imported = report.media.success,
                    failed = report.media.failed,
                    categories = report.categories_imported,
                    settings = report.settings_imported,
                    "Legacy import completed"
                );
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "Legacy import failed");
                self.progress.fail(format!("import failed: {}", e));
                Err(e)
            }
        }
    }

    async fn run_import(&self) -> Result<ImportReport> {
        let mut report = ImportReport::default();

        report.media = self.import_media().await?;

        self.progress.set_phase("categories");
        let (imported, errors) = self.import_categories().await?;
        report.categories_imported = imported;
        report.errors.extend(errors);

        self.progress.set_phase("settings");
        let (imported, errors) = self.import_settings().await?;
        report.settings_imported = imported;
        report.errors.extend(errors);

        self.progress.push_errors(report.errors.iter().cloned());
        self.store.refresh_stats_snapshot(None).await?;
        Ok(report)
    }

    async fn import_media(&self) -> Result<BatchResult> {
        let Some(files) = self.read_array::<LegacyFile>(FILE_CACHE_JSON).await? else {
            debug!("No legacy media cache found");
            return Ok(BatchResult::default());
        };
        if files.is_empty() {
            return Ok(BatchResult::default());
        }

        self.progress.set_total(files.len() as u64, "media");
        let media = self.store.media().await?;
        let mut result = BatchResult::default();
        let mut imported = 0u64;

        for chunk in files.chunks(LEGACY_BATCH_SIZE) {
            let mut records = Vec::with_capacity(chunk.len());
            for file in chunk {
                records.push(to_media_file(file).await);
            }
            let outcome = media.upsert_batch(&records).await?;
            if outcome.failed > 0 {
                warn!(failed = outcome.failed, "Legacy batch had failing rows");
            }
            imported += outcome.success;
            self.progress.set_processed(imported);
            self.progress.push_errors(outcome.errors.iter().cloned());
            result.merge(outcome);
            debug!(imported, total = files.len(), "Legacy batch imported");
        }

        Ok(result)
    }

    async fn import_categories(&self) -> Result<(u64, Vec<String>)> {
        let Some(categories) = self.read_array::<LegacyCategory>(CATEGORIES_JSON).await? else {
            return Ok((0, Vec::new()));
        };

        let repo = self.store.categories().await?;
        let mut imported = 0;
        let mut errors = Vec::new();
        for legacy in categories {
            let prepose = legacy
                .prepose
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| UNKNOWN.to_string());
            let category = NewMediaCategory {
                year: legacy.year,
                month: legacy.month,
                day: legacy.day,
                prepose: prepose.clone(),
                picture: legacy.picture.filter(|p| !p.is_empty()),
            };
            match repo.upsert(&category).await {
                Ok(_) => imported += 1,
                Err(e) => errors.push(format!("category {}: {}", prepose, e)),
            }
        }
        Ok((imported, errors))
    }

    async fn import_settings(&self) -> Result<(u64, Vec<String>)> {
        let path = self.source_dir.join(CONFIG_JSON);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, Vec::new())),
            Err(e) => return Err(e.into()),
        };
        let config: Value = serde_json::from_str(&raw).map_err(|e| SyncError::InvalidLegacyData {
            file: CONFIG_JSON.to_string(),
            message: e.to_string(),
        })?;

        let repo = self.store.settings().await?;
        let mut imported = 0;
        let mut errors = Vec::new();
        for (key, kind) in SETTING_KEYS {
            let Some(value) = legacy_setting(&config, key, *kind) else {
                continue;
            };
            match repo.set(key, &value, None).await {
                Ok(()) => imported += 1,
                Err(e) => errors.push(format!("setting {}: {}", key, e)),
            }
        }
        Ok((imported, errors))
    }

    /// Parse a JSON array file. `None` when the file does not exist.
    async fn read_array<T>(&self, name: &str) -> Result<Option<Vec<T>>>
    where
        T: for<'de> Deserialize<'de>,
    {
        let path = self.source_dir.join(name);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Some(Vec::new()));
        }
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| SyncError::InvalidLegacyData {
                file: name.to_string(),
                message: e.to_string(),
            })
    }

    /// Check the imported catalog for obvious gaps.
    pub async fn validate(&self) -> Result<ImportValidation> {
        let mut issues = Vec::new();

        let stats = self.store.collect_stats().await?;
        if stats.total_files == 0 {
            issues.push("no media records in the catalog".to_string());
        }
        if stats.settings == 0 {
            issues.push("no settings in the catalog".to_string());
        }

        let pool = self.store.pool().await?;
        let duplicate_urls: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM (SELECT url FROM media_files GROUP BY url HAVING COUNT(*) > 1)",
        )
        .fetch_one(&pool)
        .await
        .map_err(core_library::LibraryError::from)?;
        if duplicate_urls > 0 {
            issues.push(format!("{} duplicated urls", duplicate_urls));
        }

        let duplicate_hashes: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM (SELECT file_hash FROM media_files \
             WHERE file_hash IS NOT NULL GROUP BY file_hash HAVING COUNT(*) > 1)",
        )
        .fetch_one(&pool)
        .await
        .map_err(core_library::LibraryError::from)?;
        if duplicate_hashes > 0 {
            issues.push(format!("{} content hashes shared by several files", duplicate_hashes));
        }

        Ok(ImportValidation {
            is_valid: issues.is_empty(),
            issues,
        })
    }

    /// Move the legacy files into `backup/<timestamp>/` under the source
    /// directory. Returns the archive directory.
    pub async fn archive_legacy_files(&self) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S").to_string();
        let archive = self.source_dir.join("backup").join(stamp);
        tokio::fs::create_dir_all(&archive).await?;

        for name in [FILE_CACHE_JSON, CATEGORIES_JSON, CONFIG_JSON] {
            let source = self.source_dir.join(name);
            if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
                continue;
            }
            tokio::fs::copy(&source, archive.join(name)).await?;
            tokio::fs::remove_file(&source).await?;
            info!(file = name, "Archived legacy file");
        }
        Ok(archive)
    }
}

async fn to_media_file(file: &LegacyFile) -> NewMediaFile {
    let info = file.info.as_ref();
    let text = |value: Option<&String>| {
        value
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| UNKNOWN.to_string())
    };

    let mut record = NewMediaFile::new(
        file.url.clone(),
        file.name.clone(),
        file.suffix.clone(),
        file.size.max(0.0) as i64,
    );
    record.duration = info.and_then(|i| i.duration).unwrap_or(0.0).max(0.0);
    record.artist = text(info.and_then(|i| i.artist.as_ref()));
    record.album = text(info.and_then(|i| i.album.as_ref()));
    record.quality = text(info.and_then(|i| i.quality.as_ref()));
    record.resolution = info.and_then(|i| i.resolution.clone());
    record.picture = info.and_then(|i| i.picture.clone()).filter(|p| !p.is_empty());
    record.lyrics = info.and_then(|i| i.lyrics.clone());

    // Files that moved since the legacy cache was written import unhashed.
    record.file_hash = sample_hash(Path::new(&file.url)).await.ok();
    record
}

fn legacy_setting(config: &Value, key: &str, kind: LegacySettingKind) -> Option<SettingValue> {
    let value = config.get(key);
    match kind {
        LegacySettingKind::Text => match value {
            Some(Value::String(s)) => Some(SettingValue::Text(s.clone())),
            // Password is always written so the key exists after import.
            None | Some(Value::Null) if key == "password" => Some(SettingValue::Text(String::new())),
            _ => None,
        },
        LegacySettingKind::Number => value?.as_f64().map(SettingValue::Number),
        LegacySettingKind::Boolean => value?.as_bool().map(SettingValue::Boolean),
        LegacySettingKind::Object => match value? {
            Value::Null => None,
            other => Some(SettingValue::Object(other.clone())),
        },
    }
}
