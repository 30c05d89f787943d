//! # File System Scanner
//!
//! Walks scan roots and describes every media file it finds.
//!
//! ## Overview
//!
//! - Roots are walked one after another with `walkdir` on the blocking pool.
//!   Ignored directories are pruned before descent; unreadable directories
//!   are logged and skipped.
//! - Files are kept when their extension is on the music or video list.
//! - Each candidate is stat'ed, fingerprinted and passed to the
//!   [`MediaInspector`], with up to `workers` files in flight.
//! - The result is deduplicated by `url` and sorted.
//!
//! Missing or empty roots produce no files rather than an error.

use chrono::{DateTime, Datelike, Local, Utc};
use core_library::{MediaType, NewMediaCategory, NewMediaFile, UNKNOWN};
use core_metadata::{sample_hash, MediaAttributes, MediaInspector};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::{Result, SyncError};

/// Directory names never descended into.
pub const DEFAULT_IGNORED_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "System Volume Information",
    "$RECYCLE.BIN",
    "dist",
];

pub const DEFAULT_SCAN_WORKERS: usize = 4;

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Concurrent extractions
    pub workers: usize,
    /// Directory names pruned from the walk, compared case-insensitively
    pub ignored_dirs: Vec<String>,
    pub follow_links: bool,
    /// Compute the sampled content fingerprint for each file
    pub compute_hash: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_SCAN_WORKERS,
            ignored_dirs: DEFAULT_IGNORED_DIRS.iter().map(|d| d.to_string()).collect(),
            follow_links: true,
            compute_hash: true,
        }
    }
}

impl ScannerConfig {
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn ignore_dir(mut self, name: impl Into<String>) -> Self {
        self.ignored_dirs.push(name.into());
        self
    }

    pub fn compute_hash(mut self, enabled: bool) -> Self {
        self.compute_hash = enabled;
        self
    }
}

/// A media file found on disk, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredFile {
    /// Absolute path, the catalog key
    pub url: String,
    /// File name including extension
    pub name: String,
    /// Lowercased extension with its leading dot
    pub extension: String,
    pub media_type: MediaType,
    pub size: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub file_hash: Option<String>,
    pub attributes: MediaAttributes,
    /// Creation-date and parent-folder bucket
    pub category: NewMediaCategory,
}

impl DiscoveredFile {
    pub fn to_new_media_file(&self) -> NewMediaFile {
        let attrs = &self.attributes;
        let mut file = NewMediaFile::new(
            self.url.clone(),
            self.name.clone(),
            self.extension.clone(),
            i64::try_from(self.size).unwrap_or(i64::MAX),
        );
        file.file_hash = self.file_hash.clone();
        file.duration = attrs.duration;
        file.artist = attrs.artist.clone();
        file.album = attrs.album.clone();
        file.quality = attrs.quality.clone();
        file.resolution = attrs.resolution.clone();
        file.picture = attrs.picture.clone();
        file.lyrics = attrs.lyrics.clone();
        file
    }
}

/// Candidate produced by the walk, before extraction.
#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    media_type: MediaType,
}

pub struct Scanner {
    inspector: Arc<dyn MediaInspector>,
    config: ScannerConfig,
}

impl Scanner {
    pub fn new(inspector: Arc<dyn MediaInspector>) -> Self {
        Self::with_config(inspector, ScannerConfig::default())
    }

    pub fn with_config(inspector: Arc<dyn MediaInspector>, config: ScannerConfig) -> Self {
        Self { inspector, config }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Discover every media file under `roots`.
    pub async fn discover_all(
        &self,
        roots: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredFile>> {
        self.discover_with_progress(roots, cancel, |_| {}).await
    }

    /// Like [`discover_all`](Self::discover_all), calling `on_file` with the
    /// running count after each file is described.
    #[instrument(skip(self, roots, cancel, on_file), fields(roots = roots.len()))]
    pub async fn discover_with_progress<F>(
        &self,
        roots: &[PathBuf],
        cancel: &CancellationToken,
        on_file: F,
    ) -> Result<Vec<DiscoveredFile>>
    where
        F: Fn(u64) + Send + Sync,
    {
        let mut by_url: BTreeMap<String, DiscoveredFile> = BTreeMap::new();
        let mut described = 0u64;

        for root in roots {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let candidates = self.walk_root(root).await?;
            debug!(root = %root.display(), candidates = candidates.len(), "Root walked");

            let mut results = stream::iter(candidates)
                .map(|candidate| self.describe(candidate))
                .buffer_unordered(self.config.workers.max(1));

            while let Some(result) = results.next().await {
                if cancel.is_cancelled() {
                    return Err(SyncError::Cancelled);
                }
                match result {
                    Ok(file) => {
                        by_url.insert(file.url.clone(), file);
                    }
                    Err(e) => warn!(error = %e, "Skipping file that vanished during scan"),
                }
                described += 1;
                on_file(described);
            }
        }

        info!(files = by_url.len(), "Discovery finished");
        let mut files: Vec<DiscoveredFile> = by_url.into_values().collect();
        settle_category_pictures(&mut files);
        Ok(files)
    }

    async fn walk_root(&self, root: &Path) -> Result<Vec<Candidate>> {
        let root = absolute(root);
        let ignored = self.config.ignored_dirs.clone();
        let follow_links = self.config.follow_links;

        let candidates = tokio::task::spawn_blocking(move || {
            if !root.is_dir() {
                debug!(root = %root.display(), "Scan root missing or not a directory");
                return Vec::new();
            }

            WalkDir::new(&root)
                .follow_links(follow_links)
                .into_iter()
                .filter_entry(|entry| !is_ignored_dir(entry, &ignored))
                .filter_map(|entry| match entry {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!(error = %e, "Cannot read directory entry");
                        None
                    }
                })
                .filter(|entry| entry.file_type().is_file())
                .filter_map(|entry| {
                    let extension = entry.path().extension()?.to_str()?;
                    let media_type = MediaType::from_extension(extension)?;
                    Some(Candidate {
                        path: entry.into_path(),
                        media_type,
                    })
                })
                .collect::<Vec<_>>()
        })
        .await?;

        Ok(candidates)
    }

    async fn describe(&self, candidate: Candidate) -> Result<DiscoveredFile> {
        let path = candidate.path;
        let metadata = tokio::fs::metadata(&path).await?;

        let created_at = metadata
            .created()
            .or_else(|_| metadata.modified())
            .ok()
            .map(DateTime::<Utc>::from);

        let file_hash = if self.config.compute_hash {
            match sample_hash(&path).await {
                Ok(hash) => Some(hash),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to fingerprint file");
                    None
                }
            }
        } else {
            None
        };

        let attributes = self.inspector.extract(&path).await;
        let category = category_for(&path, created_at.unwrap_or_else(Utc::now))
            .with_picture(attributes.picture.clone());

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
            .unwrap_or_default();

        Ok(DiscoveredFile {
            url: path.to_string_lossy().into_owned(),
            name,
            extension,
            media_type: candidate.media_type,
            size: metadata.len(),
            created_at,
            file_hash,
            attributes,
            category,
        })
    }
}

/// Bucket for a file: its creation date in local time and parent folder name.
pub fn category_for(path: &Path, created_at: DateTime<Utc>) -> NewMediaCategory {
    let local = created_at.with_timezone(&Local);
    let parent = path
        .parent()
        .and_then(|parent| parent.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string());
    NewMediaCategory::for_date(local.year(), local.month(), local.day(), parent)
}

/// Give every file of a category bucket the first cover in `files` order.
///
/// Discovery returns files sorted by url, so the category picture does not
/// depend on which file finished extraction first.
fn settle_category_pictures(files: &mut [DiscoveredFile]) {
    let mut covers: HashMap<NewMediaCategory, Option<String>> = HashMap::new();
    for file in files.iter() {
        let cover = covers
            .entry(file.category.clone().with_picture(None))
            .or_insert(None);
        if cover.is_none() {
            *cover = file.attributes.picture.clone();
        }
    }
    for file in files.iter_mut() {
        let bucket = file.category.clone().with_picture(None);
        file.category.picture = covers.get(&bucket).cloned().flatten();
    }
}

fn is_ignored_dir(entry: &DirEntry, ignored: &[String]) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    ignored.iter().any(|dir| dir.eq_ignore_ascii_case(&name))
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
