//! Platform directory layout for desktop hosts.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const APP_DIR: &str = "mediashare";

/// Where the desktop build keeps its database, asset cache and backups.
///
/// ```text
/// <data_dir>/mediashare/library.db
/// <data_dir>/mediashare/backups/
/// <cache_dir>/mediashare/            (asset cache root, images/ below it)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopPaths {
    data_dir: PathBuf,
    cache_dir: PathBuf,
}

impl DesktopPaths {
    /// Resolve the platform default directories.
    pub fn new() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_DIR);

        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join(".local")
                    .join("share")
            })
            .join(APP_DIR);

        Self {
            data_dir,
            cache_dir,
        }
    }

    pub fn with_directories(data_dir: PathBuf, cache_dir: PathBuf) -> Self {
        Self {
            data_dir,
            cache_dir,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("library.db")
    }

    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    pub fn asset_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone()
    }

    /// Create the data and cache directories if they are missing.
    pub async fn ensure(&self) -> std::io::Result<()> {
        for dir in [&self.data_dir, &self.cache_dir] {
            if fs::metadata(dir).await.is_err() {
                fs::create_dir_all(dir).await?;
                debug!(path = ?dir, "Created application directory");
            }
        }
        Ok(())
    }
}

impl Default for DesktopPaths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths_are_namespaced() {
        let paths = DesktopPaths::new();
        assert!(paths.database_path().ends_with("mediashare/library.db"));
        assert!(paths.backup_dir().ends_with("mediashare/backups"));
        assert!(paths.asset_cache_dir().ends_with("mediashare"));
    }

    #[tokio::test]
    async fn test_ensure_creates_directories() {
        let root = std::env::temp_dir().join(format!("mediashare-paths-{}", uuid::Uuid::new_v4()));
        let paths = DesktopPaths::with_directories(root.join("data"), root.join("cache"));

        paths.ensure().await.unwrap();
        assert!(paths.data_dir().is_dir());
        assert!(paths.asset_cache_dir().is_dir());

        // Second call is a no-op
        paths.ensure().await.unwrap();

        let _ = std::fs::remove_dir_all(&root);
    }
}
