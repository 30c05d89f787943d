//! Core service facade and bootstrap.
//!
//! [`MediaCore`] wires the catalog store, the asset cache, the metadata
//! extractor, the sync engine and the backup coordinator together from one
//! [`CoreConfig`], and runs their periodic maintenance. Desktop hosts enable
//! the `desktop-shims` feature so unset storage paths and the video frame
//! decoder default to the `bridge-desktop` implementations.
//!
//! ```rust,ignore
//! use core_service::{CoreConfig, MediaCore};
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder().scan_root("/music").build()?;
//! let core = Arc::new(MediaCore::bootstrap(config).await?);
//! core.start_background_tasks();
//!
//! let summary = core.run_full_sync().await?;
//! core.shutdown().await;
//! ```

mod background;
pub mod error;
mod service;

pub use error::{CoreError, Result};
pub use service::{scan_roots_from_setting, MediaCore, SCAN_PATHS_SETTING};

pub use core_runtime::config::CoreConfig;
pub use core_runtime::events::{CoreEvent, EventBus};
