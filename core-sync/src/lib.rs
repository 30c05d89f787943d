//! # Core Sync Module
//!
//! Keeps the media catalog in step with the file system.
//!
//! ## Overview
//!
//! This crate provides:
//! - **Scanner**: recursive walk of the scan roots with per-file metadata
//!   extraction and content fingerprinting
//! - **SyncEngine**: batched upserts, reconciliation of vanished files and
//!   stats refresh, with a single-flight guard and cancellation
//! - **ProgressTracker**: pollable `idle → running → processing → completed`
//!   state shared by long operations
//! - **LegacyImporter**: one-shot import of the JSON files written by earlier
//!   releases
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{Scanner, SyncEngine};
//! use tokio_util::sync::CancellationToken;
//!
//! let scanner = Scanner::new(extractor);
//! let engine = SyncEngine::new(store, scanner, event_bus);
//! let summary = engine.run_full_sync(&roots, &CancellationToken::new()).await?;
//! ```

pub mod engine;
pub mod error;
pub mod legacy;
pub mod progress;
pub mod scanner;

pub use engine::{SyncEngine, SyncPause, SyncSummary, DEFAULT_BATCH_SIZE};
pub use error::{Result, SyncError};
pub use legacy::{ImportReport, ImportValidation, LegacyImporter, LEGACY_BATCH_SIZE};
pub use progress::{ProgressSnapshot, ProgressStatus, ProgressTracker};
pub use scanner::{
    category_for, DiscoveredFile, Scanner, ScannerConfig, DEFAULT_IGNORED_DIRS,
    DEFAULT_SCAN_WORKERS,
};
