//! Workspace facade crate.
//!
//! Re-exports the `core-service` facade behind feature flags so host
//! applications can depend on `mediashare-workspace` alone. `desktop-shims`
//! (the default) pulls in the ffmpeg frame decoder and platform directories;
//! `embedded` leaves both to the host.

#[cfg(any(feature = "desktop-shims", feature = "embedded"))]
pub use core_service::*;
