//! # Core Configuration Module
//!
//! Provides configuration management for the media indexing core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! holding storage locations, scan roots, maintenance cadences and the optional
//! video decoder. `build()` validates eagerly so a bad value fails at startup
//! instead of midway through a scan.
//!
//! When the `desktop-shims` feature is enabled, unset storage paths default to
//! the per-user platform directories and the decoder defaults to `ffmpeg`.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/library.db")
//!     .asset_cache_dir("/path/to/cache")
//!     .scan_root("/home/me/Music")
//!     .scan_interval(Duration::from_secs(600))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::FrameCapture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_CACHE_MAX_SIZE_MB: u64 = 500;
pub const DEFAULT_MAX_BACKUPS: usize = 10;
pub const DEFAULT_SYNC_BATCH_SIZE: usize = 1000;
pub const DEFAULT_SCAN_WORKERS: usize = 4;
pub const DEFAULT_CACHE_ENFORCE_INTERVAL: Duration = Duration::from_secs(60 * 60);

const MAX_CACHE_SIZE_MB: u64 = 100_000;
const MAX_SYNC_BATCH_SIZE: usize = 10_000;
const MAX_SCAN_WORKERS: usize = 64;

/// Core configuration.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Path to the SQLite database file
    pub database_path: PathBuf,

    /// Root of the content-addressed asset cache (covers, thumbnails)
    pub asset_cache_dir: PathBuf,

    /// Directory holding database snapshots and their `metadata.json` index
    pub backup_dir: PathBuf,

    /// Directories walked by a full sync
    pub scan_roots: Vec<PathBuf>,

    /// Run a full sync right after bootstrap
    pub scan_on_startup: bool,

    /// Period between background syncs, `None` disables them
    pub scan_interval: Option<Duration>,

    /// Asset cache ceiling in megabytes
    pub cache_max_size_mb: u64,

    /// Period between cache size enforcement passes
    pub cache_enforce_interval: Option<Duration>,

    /// Number of snapshots kept before the oldest are deleted
    pub max_backups: usize,

    /// Records per upsert transaction during sync
    pub sync_batch_size: usize,

    /// Concurrent metadata extractions per scan
    pub scan_workers: usize,

    /// Video frame decoder
    pub frame_capture: Option<Arc<dyn FrameCapture>>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database_path", &self.database_path)
            .field("asset_cache_dir", &self.asset_cache_dir)
            .field("backup_dir", &self.backup_dir)
            .field("scan_roots", &self.scan_roots)
            .field("scan_on_startup", &self.scan_on_startup)
            .field("scan_interval", &self.scan_interval)
            .field("cache_max_size_mb", &self.cache_max_size_mb)
            .field("cache_enforce_interval", &self.cache_enforce_interval)
            .field("max_backups", &self.max_backups)
            .field("sync_batch_size", &self.sync_batch_size)
            .field("scan_workers", &self.scan_workers)
            .field(
                "frame_capture",
                &self.frame_capture.as_ref().map(|_| "FrameCapture { ... }"),
            )
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Storage paths are not empty
    /// - Cache ceiling is > 0 and < 100GB
    /// - Batch size, worker count and retention are within range
    /// - Intervals, when set, are non-zero
    pub fn validate(&self) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.asset_cache_dir.as_os_str().is_empty() {
            return Err(Error::Config(
                "Asset cache directory cannot be empty".to_string(),
            ));
        }

        if self.backup_dir.as_os_str().is_empty() {
            return Err(Error::Config("Backup directory cannot be empty".to_string()));
        }

        if self.cache_max_size_mb == 0 {
            return Err(Error::Config(
                "Cache size must be greater than 0 MB".to_string(),
            ));
        }

        if self.cache_max_size_mb > MAX_CACHE_SIZE_MB {
            return Err(Error::Config(
                "Cache size exceeds maximum of 100GB (100,000 MB)".to_string(),
            ));
        }

        if self.max_backups == 0 {
            return Err(Error::Config(
                "At least one backup must be retained".to_string(),
            ));
        }

        if self.sync_batch_size == 0 || self.sync_batch_size > MAX_SYNC_BATCH_SIZE {
            return Err(Error::Config(format!(
                "Sync batch size must be between 1 and {}",
                MAX_SYNC_BATCH_SIZE
            )));
        }

        if self.scan_workers == 0 || self.scan_workers > MAX_SCAN_WORKERS {
            return Err(Error::Config(format!(
                "Scan workers must be between 1 and {}",
                MAX_SCAN_WORKERS
            )));
        }

        if self.scan_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(Error::Config("Scan interval must be non-zero".to_string()));
        }

        if self
            .cache_enforce_interval
            .is_some_and(|interval| interval.is_zero())
        {
            return Err(Error::Config(
                "Cache enforcement interval must be non-zero".to_string(),
            ));
        }

        for root in &self.scan_roots {
            if root.as_os_str().is_empty() {
                return Err(Error::Config("Scan roots cannot be empty paths".to_string()));
            }
        }

        Ok(())
    }

    /// Cache ceiling in bytes.
    pub fn cache_max_size_bytes(&self) -> u64 {
        self.cache_max_size_mb * 1024 * 1024
    }

    /// The configured decoder, or an actionable error when there is none.
    pub fn frame_capture(&self) -> Result<Arc<dyn FrameCapture>> {
        self.frame_capture
            .clone()
            .ok_or_else(frame_capture_missing_error)
    }
}

fn frame_capture_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "FrameCapture".to_string(),
        message: "No video decoder configured; videos are indexed without thumbnails or \
                 resolution. Desktop: enable the 'desktop-shims' feature and install ffmpeg. \
                 Other hosts: inject a FrameCapture implementation."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_frame_capture() -> Option<Arc<dyn FrameCapture>> {
    use bridge_desktop::FfmpegFrameCapture;

    let capture: Arc<dyn FrameCapture> = Arc::new(FfmpegFrameCapture::new());
    Some(capture)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_frame_capture() -> Option<Arc<dyn FrameCapture>> {
    None
}

#[cfg(feature = "desktop-shims")]
fn provide_default_database_path() -> Result<PathBuf> {
    Ok(bridge_desktop::DesktopPaths::new().database_path())
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_database_path() -> Result<PathBuf> {
    Err(Error::Config(
        "Database path is required. Use .database_path() to set it.".to_string(),
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_asset_cache_dir(_database_path: &Path) -> PathBuf {
    bridge_desktop::DesktopPaths::new().asset_cache_dir()
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_asset_cache_dir(database_path: &Path) -> PathBuf {
    sibling_dir(database_path, "media_data")
}

fn sibling_dir(database_path: &Path, name: &str) -> PathBuf {
    database_path
        .parent()
        .map(|parent| parent.join(name))
        .unwrap_or_else(|| PathBuf::from(name))
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database_path: Option<PathBuf>,
    asset_cache_dir: Option<PathBuf>,
    backup_dir: Option<PathBuf>,
    scan_roots: Vec<PathBuf>,
    scan_on_startup: bool,
    scan_interval: Option<Duration>,
    cache_max_size_mb: Option<u64>,
    cache_enforce_interval: Option<Option<Duration>>,
    max_backups: Option<usize>,
    sync_batch_size: Option<usize>,
    scan_workers: Option<usize>,
    frame_capture: Option<Arc<dyn FrameCapture>>,
}

impl CoreConfigBuilder {
    /// Sets the SQLite database file.
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder().database_path("/path/to/library.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    pub fn asset_cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.asset_cache_dir = Some(path.into());
        self
    }

    /// Defaults to a `backups` directory next to the database file.
    pub fn backup_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.backup_dir = Some(path.into());
        self
    }

    pub fn scan_root<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.scan_roots.push(path.into());
        self
    }

    pub fn scan_roots<I, P>(mut self, roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.scan_roots.extend(roots.into_iter().map(Into::into));
        self
    }

    pub fn scan_on_startup(mut self, enabled: bool) -> Self {
        self.scan_on_startup = enabled;
        self
    }

    pub fn scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = Some(interval);
        self
    }

    pub fn cache_max_size_mb(mut self, size_mb: u64) -> Self {
        self.cache_max_size_mb = Some(size_mb);
        self
    }

    /// `None` turns periodic enforcement off; it still runs at startup.
    pub fn cache_enforce_interval(mut self, interval: Option<Duration>) -> Self {
        self.cache_enforce_interval = Some(interval);
        self
    }

    pub fn max_backups(mut self, count: usize) -> Self {
        self.max_backups = Some(count);
        self
    }

    pub fn sync_batch_size(mut self, size: usize) -> Self {
        self.sync_batch_size = Some(size);
        self
    }

    pub fn scan_workers(mut self, workers: usize) -> Self {
        self.scan_workers = Some(workers);
        self
    }

    pub fn frame_capture(mut self, capture: Arc<dyn FrameCapture>) -> Self {
        self.frame_capture = Some(capture);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a required path is missing or a value is
    /// out of range.
    pub fn build(self) -> Result<CoreConfig> {
        let database_path = match self.database_path {
            Some(path) => path,
            None => provide_default_database_path()?,
        };

        let asset_cache_dir = self
            .asset_cache_dir
            .unwrap_or_else(|| provide_default_asset_cache_dir(&database_path));

        let backup_dir = self
            .backup_dir
            .unwrap_or_else(|| sibling_dir(&database_path, "backups"));

        let config = CoreConfig {
            database_path,
            asset_cache_dir,
            backup_dir,
            scan_roots: self.scan_roots,
            scan_on_startup: self.scan_on_startup,
            scan_interval: self.scan_interval,
            cache_max_size_mb: self.cache_max_size_mb.unwrap_or(DEFAULT_CACHE_MAX_SIZE_MB),
            cache_enforce_interval: self
                .cache_enforce_interval
                .unwrap_or(Some(DEFAULT_CACHE_ENFORCE_INTERVAL)),
            max_backups: self.max_backups.unwrap_or(DEFAULT_MAX_BACKUPS),
            sync_batch_size: self.sync_batch_size.unwrap_or(DEFAULT_SYNC_BATCH_SIZE),
            scan_workers: self.scan_workers.unwrap_or(DEFAULT_SCAN_WORKERS),
            frame_capture: self.frame_capture.or_else(provide_default_frame_capture),
        };

        config.validate()?;

        Ok(config)
    }
}
