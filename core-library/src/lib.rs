//! # Media Catalog Storage
//!
//! Owns the relational catalog of indexed media files and everything that
//! keeps it durable.
//!
//! ## Overview
//!
//! This crate manages:
//! - SQLite connection pooling, base schema and versioned migrations
//! - Repositories for media files, categories and typed settings
//! - Filtered, paged search with a fixed set of sortable columns
//! - Aggregate stats with a cached snapshot row
//! - Integrity checks, `VACUUM`/`ANALYZE` maintenance
//! - Snapshot backups with validated, self-reverting restores
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_library::{DatabaseConfig, Store, SearchOptions};
//!
//! let store = Store::new(DatabaseConfig::new("library.db"));
//! store.connect().await?;
//!
//! let hits = store.media().await?.query(&SearchOptions::new().artist("X")).await?;
//! ```

pub mod backup;
pub mod db;
pub mod error;
pub mod migrations;
pub mod models;
pub mod query;
pub mod repositories;
pub mod schema;
pub mod store;

pub use backup::{
    BackupCoordinator, BackupRecord, BackupStats, IntegrityValidator, RestorePhase,
    RestoreReport, RestoreValidator, BACKUP_VERSION,
};
pub use db::DatabaseConfig;
pub use error::{LibraryError, Result};
pub use migrations::{Migration, MigrationRunner, MigrationValidation, SqlMigration};
pub use models::{
    BatchResult, DatabaseStats, FormatStat, MediaCategory, MediaFile, MediaFileUpdate, MediaType,
    NewMediaCategory, NewMediaFile, SchemaVersion, Setting, SettingType, SettingValue, UNKNOWN,
};
pub use query::{SearchOptions, SortDirection, SortField};
pub use repositories::{
    CategoryRepository, MediaRepository, Page, PageRequest, SettingsRepository,
};
pub use store::{IntegrityReport, Store};
