//! Content-addressed asset store.
//!
//! Files live at `<root>/images/<hash>.<ext>`. The in-memory index is an
//! unbounded [`LruCache`] keyed by hash whose recency order always matches
//! `last_used_at`, so size enforcement can pop from the cold end. The index is
//! rebuilt from the directory on [`AssetCache::initialize`] and reconciled by
//! [`AssetCache::validate`].

use bridge_traits::{Clock, SystemClock};
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{Cursor, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cache::asset::{hash_from_reference, AssetEntry, AssetFormat, ASSET_DIR};
use crate::cache::config::AssetCacheConfig;
use crate::error::Result;
use crate::hasher::full_hash;

/// Filters for [`AssetCache::evict_unused`].
#[derive(Debug, Clone, Default)]
pub struct EvictOptions {
    /// Only evict entries unused for longer than this many days
    pub max_age_days: Option<u32>,
    /// References that are never evicted, in any form `lookup` accepts
    pub excluded: HashSet<String>,
    /// Report what would be deleted without deleting it
    pub dry_run: bool,
}

/// Outcome of an eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvictionReport {
    pub deleted_count: usize,
    pub freed_bytes: u64,
    pub deleted_paths: Vec<String>,
    pub errors: Vec<String>,
}

/// Aggregate view of the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_images: usize,
    pub total_size: u64,
    pub formats: BTreeMap<String, usize>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub average_size: u64,
}

/// Differences found between the index and the directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheValidation {
    /// Indexed entries whose file had disappeared, now dropped
    pub missing_removed: Vec<String>,
    /// Files on disk that were not indexed, now added
    pub orphans_indexed: Vec<String>,
}

impl CacheValidation {
    pub fn is_consistent(&self) -> bool {
        self.missing_removed.is_empty() && self.orphans_indexed.is_empty()
    }
}

pub struct AssetCache {
    config: AssetCacheConfig,
    images_dir: PathBuf,
    index: RwLock<LruCache<String, AssetEntry>>,
    hash_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    clock: Arc<dyn Clock>,
}

impl AssetCache {
    /// Create a cache over `config.root_dir`. Nothing is read until
    /// [`initialize`](Self::initialize).
    pub fn new(config: AssetCacheConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: AssetCacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let images_dir = config.root_dir.join(ASSET_DIR);
        Ok(Self {
            config,
            images_dir,
            index: RwLock::new(LruCache::unbounded()),
            hash_locks: Mutex::new(HashMap::new()),
            clock,
        })
    }

    pub fn config(&self) -> &AssetCacheConfig {
        &self.config
    }

    pub fn root_dir(&self) -> &Path {
        &self.config.root_dir
    }

    /// Rebuild the index from the cache directory.
    ///
    /// Access time stands in for last use. Leftover temp files from an
    /// interrupted write are removed.
    #[instrument(skip(self), fields(root = %self.config.root_dir.display()))]
    pub async fn initialize(&self) -> Result<usize> {
        tokio::fs::create_dir_all(&self.images_dir).await?;
        let mut entries = self.scan_dir().await?;
        entries.sort_by_key(|entry| entry.last_used_at);

        let mut index = self.index.write().await;
        index.clear();
        for entry in entries {
            index.push(entry.hash.clone(), entry);
        }

        info!(count = index.len(), "Asset cache index rebuilt");
        Ok(index.len())
    }

    /// Store `data`, returning its relative path.
    ///
    /// Returns `None` for empty input. Identical content always maps to the
    /// same path and a single file.
    pub async fn save_content(
        &self,
        data: impl Into<Bytes>,
        format_hint: Option<AssetFormat>,
    ) -> Result<Option<String>> {
        let data = data.into();
        if data.is_empty() {
            return Ok(None);
        }
        let format = format_hint
            .or_else(|| AssetFormat::sniff(&data))
            .unwrap_or(self.config.default_format);
        self.store(data, format).await.map(Some)
    }

    /// Store the file at `source`, returning its relative path.
    ///
    /// Without a hint the format comes from the magic bytes, then the source
    /// extension.
    pub async fn save_file(
        &self,
        source: &Path,
        format_hint: Option<AssetFormat>,
    ) -> Result<Option<String>> {
        let data = Bytes::from(tokio::fs::read(source).await?);
        if data.is_empty() {
            return Ok(None);
        }
        let format = format_hint
            .or_else(|| AssetFormat::sniff(&data))
            .or_else(|| AssetFormat::from_path(source))
            .unwrap_or(self.config.default_format);
        self.store(data, format).await.map(Some)
    }

    async fn store(&self, data: Bytes, format: AssetFormat) -> Result<String> {
        let hash = full_hash(&data);
        let lock = self.hash_lock(&hash);
        let result = {
            let _guard = lock.lock().await;
            self.store_locked(&hash, data, format).await
        };
        self.release_hash_lock(&hash, lock);
        result
    }

    async fn store_locked(&self, hash: &str, data: Bytes, format: AssetFormat) -> Result<String> {
        let existing = self.index.read().await.peek(hash).cloned();
        if let Some(entry) = existing {
            if tokio::fs::try_exists(&entry.stored_path).await.unwrap_or(false) {
                self.touch(hash).await;
                debug!(hash, "Asset already cached");
                return Ok(entry.relative_path);
            }
            warn!(hash, "Indexed asset missing on disk, rewriting");
            self.index.write().await.pop(hash);
        }

        let data = match self.config.max_dimension {
            Some(max) => downscale(data, format, max).await,
            None => data,
        };

        tokio::fs::create_dir_all(&self.images_dir).await?;
        let relative_path = AssetEntry::relative_path_for(hash, format);
        let stored_path = self.config.root_dir.join(&relative_path);
        let temp_path = self
            .images_dir
            .join(format!(".{}.{}.tmp", hash, Uuid::new_v4().simple()));

        tokio::fs::write(&temp_path, &data).await?;
        if let Err(e) = tokio::fs::rename(&temp_path, &stored_path).await {
            tokio::fs::remove_file(&temp_path).await.ok();
            return Err(e.into());
        }

        let now = self.clock.now();
        let entry = AssetEntry {
            hash: hash.to_string(),
            relative_path: relative_path.clone(),
            stored_path,
            size: data.len() as u64,
            format,
            created_at: now,
            last_used_at: now,
            access_count: 1,
        };
        self.index.write().await.push(hash.to_string(), entry);

        debug!(hash, size = data.len(), %format, "Asset stored");
        Ok(relative_path)
    }

    /// Resolve a hash, relative path or stored path to its entry, marking it
    /// used.
    pub async fn lookup(&self, reference: &str) -> Option<AssetEntry> {
        let hash = hash_from_reference(reference)?;
        self.touch(hash).await
    }

    /// Whether `reference` names an indexed asset. Does not count as a use.
    pub async fn contains(&self, reference: &str) -> bool {
        match hash_from_reference(reference) {
            Some(hash) => self.index.read().await.contains(hash),
            None => false,
        }
    }

    /// Absolute path for a relative asset path, for the serving layer.
    pub async fn resolve_path(&self, relative_path: &str) -> Option<PathBuf> {
        self.lookup(relative_path).await.map(|entry| entry.stored_path)
    }

    async fn touch(&self, hash: &str) -> Option<AssetEntry> {
        let now = self.clock.now();
        let mut index = self.index.write().await;
        let entry = index.get_mut(hash)?;
        entry.last_used_at = now;
        entry.access_count += 1;
        Some(entry.clone())
    }

    /// Delete every asset not referenced by `used`.
    #[instrument(skip(self, used, options), fields(used = used.len(), dry_run = options.dry_run))]
    pub async fn evict_unused(
        &self,
        used: &HashSet<String>,
        options: &EvictOptions,
    ) -> Result<EvictionReport> {
        let keep: HashSet<&str> = used
            .iter()
            .chain(options.excluded.iter())
            .filter_map(|reference| hash_from_reference(reference))
            .collect();
        let cutoff = options
            .max_age_days
            .map(|days| self.clock.now() - ChronoDuration::days(i64::from(days)));

        let mut index = self.index.write().await;
        let victims: Vec<AssetEntry> = index
            .iter()
            .rev()
            .map(|(_, entry)| entry)
            .filter(|entry| !keep.contains(entry.hash.as_str()))
            .filter(|entry| cutoff.map_or(true, |cutoff| entry.last_used_at < cutoff))
            .cloned()
            .collect();

        let report = self.delete_entries(&mut index, victims, options.dry_run).await;
        info!(
            deleted = report.deleted_count,
            freed_bytes = report.freed_bytes,
            errors = report.errors.len(),
            "Unused assets evicted"
        );
        Ok(report)
    }

    /// Trim least-recently-used assets once the cache exceeds its ceiling.
    ///
    /// Shrinks to `target_ratio` of the ceiling. Within the bound this is a
    /// no-op.
    #[instrument(skip(self))]
    pub async fn enforce_size_bound(&self) -> Result<EvictionReport> {
        let mut index = self.index.write().await;
        let total: u64 = index.iter().map(|(_, entry)| entry.size).sum();
        if total <= self.config.max_size_bytes {
            return Ok(EvictionReport::default());
        }

        let target = self.config.target_size_bytes();
        let mut remaining = total;
        let mut victims = Vec::new();
        for (_, entry) in index.iter().rev() {
            if remaining <= target {
                break;
            }
            remaining -= entry.size;
            victims.push(entry.clone());
        }

        let report = self.delete_entries(&mut index, victims, false).await;
        info!(
            before_bytes = total,
            target_bytes = target,
            deleted = report.deleted_count,
            freed_bytes = report.freed_bytes,
            "Asset cache trimmed to size bound"
        );
        Ok(report)
    }

    async fn delete_entries(
        &self,
        index: &mut LruCache<String, AssetEntry>,
        victims: Vec<AssetEntry>,
        dry_run: bool,
    ) -> EvictionReport {
        let mut report = EvictionReport::default();
        for entry in victims {
            if !dry_run {
                match tokio::fs::remove_file(&entry.stored_path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        report
                            .errors
                            .push(format!("{}: {}", entry.relative_path, e));
                        continue;
                    }
                }
                index.pop(&entry.hash);
            }
            report.deleted_count += 1;
            report.freed_bytes += entry.size;
            report.deleted_paths.push(entry.relative_path);
        }
        report
    }

    /// Reconcile the index with the directory.
    pub async fn validate(&self) -> Result<CacheValidation> {
        tokio::fs::create_dir_all(&self.images_dir).await?;
        let on_disk = self.scan_dir().await?;
        let mut index = self.index.write().await;
        let mut validation = CacheValidation::default();

        let disk_hashes: HashSet<&str> = on_disk.iter().map(|entry| entry.hash.as_str()).collect();
        let missing: Vec<String> = index
            .iter()
            .filter(|(hash, _)| !disk_hashes.contains(hash.as_str()))
            .map(|(hash, _)| hash.clone())
            .collect();
        for hash in missing {
            if let Some(entry) = index.pop(&hash) {
                validation.missing_removed.push(entry.relative_path);
            }
        }

        for entry in on_disk {
            if !index.contains(&entry.hash) {
                validation.orphans_indexed.push(entry.relative_path.clone());
                index.push(entry.hash.clone(), entry);
            }
        }

        if !validation.is_consistent() {
            warn!(
                missing = validation.missing_removed.len(),
                orphans = validation.orphans_indexed.len(),
                "Asset cache index repaired"
            );
        }
        Ok(validation)
    }

    pub async fn stats(&self) -> CacheStats {
        let index = self.index.read().await;
        let mut stats = CacheStats::default();
        for (_, entry) in index.iter() {
            stats.total_images += 1;
            stats.total_size += entry.size;
            *stats.formats.entry(entry.format.to_string()).or_default() += 1;
            stats.oldest = Some(stats.oldest.map_or(entry.created_at, |t| t.min(entry.created_at)));
            stats.newest = Some(stats.newest.map_or(entry.created_at, |t| t.max(entry.created_at)));
        }
        if stats.total_images > 0 {
            stats.average_size = stats.total_size / stats.total_images as u64;
        }
        stats
    }

    pub async fn total_size(&self) -> u64 {
        self.index.read().await.iter().map(|(_, entry)| entry.size).sum()
    }

    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.read().await.is_empty()
    }

    /// Entries from least to most recently used.
    pub async fn entries(&self) -> Vec<AssetEntry> {
        self.index
            .read()
            .await
            .iter()
            .rev()
            .map(|(_, entry)| entry.clone())
            .collect()
    }

    async fn scan_dir(&self) -> Result<Vec<AssetEntry>> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.images_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(entries),
            Err(e) => return Err(e.into()),
        };

        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if file_name.starts_with('.') {
                if file_name.ends_with(".tmp") {
                    tokio::fs::remove_file(&path).await.ok();
                }
                continue;
            }
            let Some(format) = AssetFormat::from_path(&path) else {
                continue;
            };
            let Some(hash) = hash_from_reference(file_name) else {
                continue;
            };
            let metadata = item.metadata().await?;
            if !metadata.is_file() {
                continue;
            }

            let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
            let created = metadata
                .created()
                .ok()
                .map(DateTime::<Utc>::from)
                .or(modified)
                .unwrap_or_else(|| self.clock.now());
            let last_used = metadata
                .accessed()
                .ok()
                .map(DateTime::<Utc>::from)
                .or(modified)
                .unwrap_or(created);

            entries.push(AssetEntry {
                hash: hash.to_string(),
                relative_path: AssetEntry::relative_path_for(hash, format),
                stored_path: path.clone(),
                size: metadata.len(),
                format,
                created_at: created,
                last_used_at: last_used,
                access_count: 0,
            });
        }
        Ok(entries)
    }

    fn hash_lock(&self, hash: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .hash_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(hash.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn release_hash_lock(&self, hash: &str, lock: Arc<AsyncMutex<()>>) {
        let mut locks = self
            .hash_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // The map holds one reference and `lock` another.
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(hash);
        }
    }
}

/// Shrink `data` so its longest edge is at most `max_dimension`.
///
/// Undecodable images are stored as-is.
async fn downscale(data: Bytes, format: AssetFormat, max_dimension: u32) -> Bytes {
    let original = data.clone();
    let result = tokio::task::spawn_blocking(move || -> Result<Option<Vec<u8>>> {
        let img = image::load_from_memory(&data)?;
        if img.width() <= max_dimension && img.height() <= max_dimension {
            return Ok(None);
        }
        let resized = img.resize(
            max_dimension,
            max_dimension,
            image::imageops::FilterType::Lanczos3,
        );
        let mut buffer = Vec::new();
        resized.write_to(&mut Cursor::new(&mut buffer), format.image_format())?;
        Ok(Some(buffer))
    })
    .await;

    match result {
        Ok(Ok(Some(resized))) => Bytes::from(resized),
        Ok(Ok(None)) => original,
        Ok(Err(e)) => {
            debug!(error = %e, "Image not downscaled");
            original
        }
        Err(e) => {
            warn!(error = %e, "Downscale task failed");
            original
        }
    }
}
