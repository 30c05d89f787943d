//! # Desktop Bridge Implementations
//!
//! Default implementations of the host collaborators for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - [`FfmpegFrameCapture`] implements `FrameCapture` by running `ffmpeg`
//!   through `tokio::process`
//! - [`DesktopPaths`] resolves the per-user data and cache directories with `dirs`
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{DesktopPaths, FfmpegFrameCapture};
//!
//! let paths = DesktopPaths::new();
//! paths.ensure().await?;
//! let capture = FfmpegFrameCapture::new();
//! ```

mod frame_capture;
mod paths;

pub use frame_capture::{FfmpegFrameCapture, FFMPEG_ENV};
pub use paths::DesktopPaths;
