use crate::cache::asset::AssetFormat;
use crate::error::{MetadataError, Result};
use std::path::PathBuf;

pub const DEFAULT_MAX_SIZE_BYTES: u64 = 500 * 1024 * 1024;
pub const DEFAULT_TARGET_RATIO: f64 = 0.8;

/// Asset cache configuration
#[derive(Debug, Clone)]
pub struct AssetCacheConfig {
    /// Cache root; assets live under `<root>/images/`
    pub root_dir: PathBuf,

    /// Ceiling enforced by `enforce_size_bound`
    pub max_size_bytes: u64,

    /// Fraction of the ceiling an enforcement pass shrinks the cache to
    pub target_ratio: f64,

    /// Format used when neither a hint nor the magic bytes identify one
    pub default_format: AssetFormat,

    /// Longest edge of stored images; larger images are downscaled on save
    pub max_dimension: Option<u32>,
}

impl AssetCacheConfig {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            target_ratio: DEFAULT_TARGET_RATIO,
            default_format: AssetFormat::Jpg,
            max_dimension: None,
        }
    }

    pub fn max_size_bytes(mut self, bytes: u64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    pub fn max_size_mb(self, mb: u64) -> Self {
        self.max_size_bytes(mb * 1024 * 1024)
    }

    pub fn target_ratio(mut self, ratio: f64) -> Self {
        self.target_ratio = ratio;
        self
    }

    pub fn default_format(mut self, format: AssetFormat) -> Self {
        self.default_format = format;
        self
    }

    pub fn max_dimension(mut self, dimension: Option<u32>) -> Self {
        self.max_dimension = dimension;
        self
    }

    /// Size the cache is trimmed down to once it exceeds the ceiling.
    pub fn target_size_bytes(&self) -> u64 {
        (self.max_size_bytes as f64 * self.target_ratio) as u64
    }

    pub fn validate(&self) -> Result<()> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(MetadataError::InvalidConfig(
                "root_dir cannot be empty".to_string(),
            ));
        }
        if self.max_size_bytes == 0 {
            return Err(MetadataError::InvalidConfig(
                "max_size_bytes must be greater than 0".to_string(),
            ));
        }
        if !(self.target_ratio > 0.0 && self.target_ratio <= 1.0) {
            return Err(MetadataError::InvalidConfig(format!(
                "target_ratio must be in (0, 1], got {}",
                self.target_ratio
            )));
        }
        if self.max_dimension == Some(0) {
            return Err(MetadataError::InvalidConfig(
                "max_dimension must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
