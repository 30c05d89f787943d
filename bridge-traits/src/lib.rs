//! # Host Bridge Traits
//!
//! Collaborator contracts the indexing core consumes but does not implement.
//!
//! ## Overview
//!
//! The core scans, extracts, stores and caches on its own. A few capabilities
//! belong to the host instead:
//!
//! - [`FrameCapture`](decoder::FrameCapture) - grab a still frame from a video
//!   (an external decoder such as `ffmpeg`)
//! - [`Clock`](clock::Clock) - time source, swappable for deterministic tests
//! - [`LoggerSink`](log_sink::LoggerSink) - forward structured logs to a host pipeline
//!
//! Desktop implementations live in `bridge-desktop`.
//!
//! ## Fail-Fast Strategy
//!
//! A missing decoder is not fatal: videos are still indexed, just without a
//! thumbnail or resolution. Implementations signal absence with
//! [`BridgeError::NotAvailable`](error::BridgeError::NotAvailable) so the caller
//! can tell "no decoder" apart from "decoder failed on this file".
//!
//! ## Thread Safety
//!
//! Every trait requires `Send + Sync`; implementations are shared behind `Arc`
//! across scan workers.

pub mod clock;
pub mod decoder;
pub mod error;
pub mod log_sink;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decoder::{CapturedFrame, FrameCapture};
pub use error::{BridgeError, Result};
pub use log_sink::{LogEntry, LogLevel, LoggerSink};
