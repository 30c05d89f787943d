//! # Repository Pattern Implementation
//!
//! Repository traits and their SQLite implementations. Each repository owns
//! a clone of the pool; the free functions operate on a caller-provided
//! connection so they can run inside [`crate::Store::transaction`].
//!
//! ## Available Repositories
//!
//! - `MediaRepository` - indexed media files, search, facets
//! - `CategoryRepository` - date and folder buckets
//! - `SettingsRepository` - typed key/value settings

pub mod category;
pub mod media;
pub mod pagination;
pub mod settings;

pub use category::{delete_unused_categories, CategoryRepository, SqliteCategoryRepository};
pub use media::{delete_urls, MediaRepository, SqliteMediaRepository};
pub use pagination::{Page, PageRequest};
pub use settings::{SettingsRepository, SqliteSettingsRepository};
