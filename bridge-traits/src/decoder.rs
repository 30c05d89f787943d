//! Video Decoder Abstraction
//!
//! The indexing core never decodes video itself. When a video file carries no
//! embedded cover, the metadata extractor asks a host-provided decoder for a
//! single still frame near the start of the stream and uses it as the cover.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;

use crate::error::Result;

/// A single decoded frame returned by a [`FrameCapture`] implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrame {
    /// Encoded image bytes (JPEG for the desktop decoder)
    pub image_bytes: Bytes,
    /// Frame width in pixels, `0` when the decoder could not report it
    pub width: u32,
    /// Frame height in pixels, `0` when the decoder could not report it
    pub height: u32,
    /// Stream duration if the decoder saw it while probing
    pub duration_secs: Option<f64>,
}

impl CapturedFrame {
    pub fn new(image_bytes: impl Into<Bytes>, width: u32, height: u32) -> Self {
        Self {
            image_bytes: image_bytes.into(),
            width,
            height,
            duration_secs: None,
        }
    }

    pub fn with_duration(mut self, duration_secs: f64) -> Self {
        self.duration_secs = Some(duration_secs);
        self
    }

    /// Whether the decoder reported usable dimensions.
    pub fn has_dimensions(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Frame capture service.
///
/// Any decoder binary or library can satisfy this contract. Implementations
/// should return [`BridgeError::NotAvailable`](crate::BridgeError::NotAvailable)
/// when the decoder itself is missing so callers can degrade gracefully.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::decoder::FrameCapture;
///
/// async fn thumbnail(capture: &dyn FrameCapture, path: &Path) -> Option<Bytes> {
///     capture.capture_frame(path).await.ok().map(|frame| frame.image_bytes)
/// }
/// ```
#[async_trait]
pub trait FrameCapture: Send + Sync {
    /// Capture one frame from the start of `video_path`.
    async fn capture_frame(&self, video_path: &Path) -> Result<CapturedFrame>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captured_frame_dimensions() {
        let frame = CapturedFrame::new(vec![0xFF, 0xD8, 0xFF], 1920, 1080);
        assert!(frame.has_dimensions());
        assert_eq!(frame.duration_secs, None);

        let unknown = CapturedFrame::new(Bytes::new(), 0, 720);
        assert!(!unknown.has_dimensions());
    }

    #[test]
    fn test_captured_frame_with_duration() {
        let frame = CapturedFrame::new(vec![1, 2, 3], 640, 480).with_duration(12.5);
        assert_eq!(frame.duration_secs, Some(12.5));
    }
}
