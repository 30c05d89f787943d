//! Asset cache for covers and video thumbnails.

pub mod asset;
pub mod config;
pub mod manager;

pub use asset::{AssetEntry, AssetFormat};
pub use config::AssetCacheConfig;
pub use manager::{AssetCache, CacheStats, CacheValidation, EvictOptions, EvictionReport};
