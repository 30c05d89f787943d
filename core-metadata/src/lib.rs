//! # Media Metadata & Asset Cache
//!
//! Everything the scanner needs to describe a file beyond its path and size.
//!
//! ## Overview
//!
//! This crate handles:
//! - Content fingerprints: sampled file hash and full buffer hash
//! - Tag and property extraction for audio, frame capture for video
//! - Audio quality and video resolution classification
//! - A content-addressed cache for covers and thumbnails with LRU size
//!   enforcement and unused-asset eviction

pub mod cache;
pub mod classify;
pub mod error;
pub mod extractor;
pub mod hasher;

pub use cache::{
    AssetCache, AssetCacheConfig, AssetEntry, AssetFormat, CacheStats, CacheValidation,
    EvictOptions, EvictionReport,
};
pub use classify::{classify_quality, classify_resolution};
pub use error::{MetadataError, Result};
pub use extractor::{MediaAttributes, MediaInspector, MetadataExtractor};
pub use hasher::{full_hash, sample_hash};
