//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the media indexing core:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! Every other core crate depends on this one for its configuration types,
//! logging conventions and the broadcast channel used to report sync, library,
//! backup and cache activity to the host.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
