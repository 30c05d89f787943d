//! Media Attribute Extraction
//!
//! Turns a media file into the attributes stored on its catalog record:
//! duration, artist, album, quality, resolution, cover and lyrics.
//!
//! ## Overview
//!
//! - Audio: container properties and tags are read with `lofty`. The embedded
//!   front cover (or the first picture) goes into the asset cache, and quality
//!   comes from the bitrate/sample-rate table in [`crate::classify`].
//! - Video: tags are read when the container carries them. Without a cover,
//!   a single frame is grabbed through the host [`FrameCapture`] and used as
//!   the thumbnail; its size gives the resolution class.
//!
//! Extraction never fails. Unreadable or unsupported files produce
//! [`MediaAttributes::unknown`] so the scanner can still index them by path
//! and size.
//!
//! ## Usage
//!
//! ```ignore
//! use core_metadata::{MediaInspector, MetadataExtractor};
//!
//! let extractor = MetadataExtractor::new(asset_cache).with_frame_capture(ffmpeg);
//! let attrs = extractor.extract(Path::new("/music/a.mp3")).await;
//! println!("{} - {} ({})", attrs.artist, attrs.album, attrs.quality);
//! ```

use async_trait::async_trait;
use bridge_traits::{BridgeError, FrameCapture};
use core_library::{MediaType, UNKNOWN};
use lofty::config::ParseOptions;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::picture::{MimeType, PictureType};
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey, Tag};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{AssetCache, AssetFormat};
use crate::classify::{classify_quality, classify_resolution};
use crate::error::{MetadataError, Result};

/// Attributes extracted from one media file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAttributes {
    /// Seconds, `0.0` when unknown
    pub duration: f64,
    pub artist: String,
    pub album: String,
    /// Audio quality label, or the resolution class for video
    pub quality: String,
    pub resolution: Option<String>,
    /// Relative asset path of the cover or thumbnail
    pub picture: Option<String>,
    pub lyrics: Option<String>,
    pub bitrate_kbps: Option<u32>,
    pub sample_rate: Option<u32>,
}

impl MediaAttributes {
    /// Fallback used whenever extraction fails.
    pub fn unknown() -> Self {
        Self {
            duration: 0.0,
            artist: UNKNOWN.to_string(),
            album: UNKNOWN.to_string(),
            quality: UNKNOWN.to_string(),
            resolution: None,
            picture: None,
            lyrics: None,
            bitrate_kbps: None,
            sample_rate: None,
        }
    }
}

impl Default for MediaAttributes {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Produces [`MediaAttributes`] for a file.
///
/// The scanner depends on this seam rather than on [`MetadataExtractor`].
#[async_trait]
pub trait MediaInspector: Send + Sync {
    async fn extract(&self, path: &Path) -> MediaAttributes;
}

/// Embedded picture pulled out of a tag.
#[derive(Debug, Clone)]
struct EmbeddedPicture {
    data: Vec<u8>,
    format: Option<AssetFormat>,
}

/// Everything read from a container in one blocking pass.
#[derive(Debug, Clone, Default)]
struct ProbedTags {
    duration: f64,
    bitrate_kbps: Option<u32>,
    sample_rate: Option<u32>,
    artist: Option<String>,
    album: Option<String>,
    lyrics: Option<String>,
    picture: Option<EmbeddedPicture>,
}

pub struct MetadataExtractor {
    asset_cache: Arc<AssetCache>,
    frame_capture: Option<Arc<dyn FrameCapture>>,
    parse_options: ParseOptions,
}

impl MetadataExtractor {
    pub fn new(asset_cache: Arc<AssetCache>) -> Self {
        Self {
            asset_cache,
            frame_capture: None,
            parse_options: ParseOptions::new(),
        }
    }

    pub fn with_frame_capture(mut self, frame_capture: Arc<dyn FrameCapture>) -> Self {
        self.frame_capture = Some(frame_capture);
        self
    }

    pub fn with_parse_options(mut self, parse_options: ParseOptions) -> Self {
        self.parse_options = parse_options;
        self
    }

    pub fn has_frame_capture(&self) -> bool {
        self.frame_capture.is_some()
    }

    /// Extract attributes, surfacing the first hard failure.
    ///
    /// [`MediaInspector::extract`] wraps this and swallows the error.
    pub async fn try_extract(&self, path: &Path) -> Result<MediaAttributes> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        match MediaType::from_extension(extension) {
            Some(MediaType::Music) => self.extract_audio(path).await,
            Some(MediaType::Video) => self.extract_video(path).await,
            None => Err(MetadataError::ExtractionFailed(format!(
                "not a media file: {}",
                path.display()
            ))),
        }
    }

    async fn extract_audio(&self, path: &Path) -> Result<MediaAttributes> {
        let probed = self.probe(path).await?;

        let mut attrs = MediaAttributes::unknown();
        attrs.quality = classify_quality(
            probed.bitrate_kbps.unwrap_or(0),
            probed.sample_rate.unwrap_or(0),
        )
        .to_string();
        attrs.picture = self.store_picture(path, probed.picture.clone()).await;
        apply_tags(&mut attrs, probed);
        Ok(attrs)
    }

    async fn extract_video(&self, path: &Path) -> Result<MediaAttributes> {
        let mut attrs = MediaAttributes::unknown();

        // Most video containers carry no tags lofty understands.
        let probed = match self.probe(path).await {
            Ok(probed) => probed,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "No readable tags in video");
                ProbedTags::default()
            }
        };
        attrs.picture = self.store_picture(path, probed.picture.clone()).await;
        apply_tags(&mut attrs, probed);

        if attrs.picture.is_none() {
            self.capture_thumbnail(path, &mut attrs).await;
        }
        Ok(attrs)
    }

    async fn capture_thumbnail(&self, path: &Path, attrs: &mut MediaAttributes) {
        let Some(capture) = &self.frame_capture else {
            return;
        };

        let frame = match capture.capture_frame(path).await {
            Ok(frame) => frame,
            Err(BridgeError::NotAvailable(reason)) => {
                debug!(%reason, "Frame capture unavailable");
                return;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Frame capture failed");
                return;
            }
        };

        let dimensions = if frame.has_dimensions() {
            Some((frame.width, frame.height))
        } else {
            image_dimensions(frame.image_bytes.clone()).await
        };
        match dimensions {
            Some((width, height)) => {
                let resolution = classify_resolution(width, height).to_string();
                attrs.quality = resolution.clone();
                attrs.resolution = Some(resolution);
            }
            None => debug!(path = %path.display(), "Frame size unknown, resolution left unset"),
        }

        if attrs.duration <= 0.0 {
            if let Some(duration) = frame.duration_secs.filter(|d| d.is_finite() && *d > 0.0) {
                attrs.duration = duration;
            }
        }

        match self
            .asset_cache
            .save_content(frame.image_bytes, Some(AssetFormat::Jpg))
            .await
        {
            Ok(picture) => attrs.picture = picture,
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to cache video thumbnail"),
        }
    }

    async fn store_picture(&self, path: &Path, picture: Option<EmbeddedPicture>) -> Option<String> {
        let picture = picture?;
        match self
            .asset_cache
            .save_content(picture.data, picture.format)
            .await
        {
            Ok(relative_path) => relative_path,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to cache embedded cover");
                None
            }
        }
    }

    async fn probe(&self, path: &Path) -> Result<ProbedTags> {
        let path: PathBuf = path.to_path_buf();
        let options = self.parse_options;
        tokio::task::spawn_blocking(move || probe_blocking(&path, options)).await?
    }
}

#[async_trait]
impl MediaInspector for MetadataExtractor {
    async fn extract(&self, path: &Path) -> MediaAttributes {
        match self.try_extract(path).await {
            Ok(attrs) => attrs,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Metadata extraction failed");
                MediaAttributes::unknown()
            }
        }
    }
}

fn apply_tags(attrs: &mut MediaAttributes, probed: ProbedTags) {
    attrs.duration = probed.duration;
    attrs.bitrate_kbps = probed.bitrate_kbps;
    attrs.sample_rate = probed.sample_rate;
    if let Some(artist) = probed.artist {
        attrs.artist = artist;
    }
    if let Some(album) = probed.album {
        attrs.album = album;
    }
    attrs.lyrics = probed.lyrics;
}

fn probe_blocking(path: &Path, options: ParseOptions) -> Result<ProbedTags> {
    let tagged_file = Probe::open(path)
        .map_err(|e| MetadataError::ExtractionFailed(format!("Failed to open file: {}", e)))?
        .options(options)
        .guess_file_type()?
        .read()
        .map_err(|e| MetadataError::ExtractionFailed(format!("Failed to parse file: {}", e)))?;

    let properties = tagged_file.properties();
    let mut probed = ProbedTags {
        duration: properties.duration().as_secs_f64(),
        bitrate_kbps: properties
            .audio_bitrate()
            .or_else(|| properties.overall_bitrate()),
        sample_rate: properties.sample_rate(),
        ..ProbedTags::default()
    };

    if let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) {
        probed.artist = tag.artist().and_then(|s| non_empty(&s));
        probed.album = tag.album().and_then(|s| non_empty(&s));
        probed.lyrics = tag
            .get_string(&ItemKey::Lyrics)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        probed.picture = cover_picture(tag);
    }

    Ok(probed)
}

/// Front cover if tagged as such, else the first usable picture.
fn cover_picture(tag: &Tag) -> Option<EmbeddedPicture> {
    let pictures = tag.pictures();
    pictures
        .iter()
        .find(|pic| pic.pic_type() == PictureType::CoverFront && !pic.data().is_empty())
        .or_else(|| pictures.iter().find(|pic| !pic.data().is_empty()))
        .map(|pic| EmbeddedPicture {
            data: pic.data().to_vec(),
            format: pic.mime_type().and_then(mime_to_format),
        })
}

fn mime_to_format(mime_type: &MimeType) -> Option<AssetFormat> {
    match mime_type {
        MimeType::Jpeg => Some(AssetFormat::Jpg),
        MimeType::Png => Some(AssetFormat::Png),
        MimeType::Gif => Some(AssetFormat::Gif),
        MimeType::Bmp => Some(AssetFormat::Bmp),
        _ => None,
    }
}

/// Trims, collapses inner whitespace and drops control characters.
fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .filter(|c| !c.is_control())
        .collect()
}

fn non_empty(text: &str) -> Option<String> {
    let normalized = normalize_text(text);
    (!normalized.is_empty()).then_some(normalized)
}

async fn image_dimensions(data: bytes::Bytes) -> Option<(u32, u32)> {
    tokio::task::spawn_blocking(move || {
        image::load_from_memory(&data)
            .ok()
            .map(|img| (img.width(), img.height()))
    })
    .await
    .ok()
    .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_attributes() {
        let attrs = MediaAttributes::unknown();
        assert_eq!(attrs.duration, 0.0);
        assert_eq!(attrs.artist, "unknown");
        assert_eq!(attrs.album, "unknown");
        assert_eq!(attrs.quality, "unknown");
        assert!(attrs.picture.is_none());
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Hello   World  "), "Hello World");
        assert_eq!(normalize_text("Title\nWith\tTabs"), "Title With Tabs");
        assert_eq!(non_empty("   "), None);
        assert_eq!(non_empty(" X "), Some("X".to_string()));
    }

    #[test]
    fn test_mime_to_format() {
        assert_eq!(mime_to_format(&MimeType::Jpeg), Some(AssetFormat::Jpg));
        assert_eq!(mime_to_format(&MimeType::Png), Some(AssetFormat::Png));
        assert_eq!(mime_to_format(&MimeType::Tiff), None);
    }
}
