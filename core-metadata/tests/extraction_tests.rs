//! Integration tests for attribute extraction
//!
//! Audio fixtures are synthesized PCM WAV files so no binary fixtures are
//! checked in. Video goes through a mocked frame decoder.

use async_trait::async_trait;
use bridge_traits::{BridgeError, CapturedFrame, FrameCapture};
use core_metadata::{
    full_hash, AssetCache, AssetCacheConfig, AssetEntry, AssetFormat, MediaInspector,
    MetadataExtractor,
};
use lofty::config::WriteOptions;
use lofty::picture::{MimeType, Picture, PictureType};
use lofty::tag::{Accessor, Tag, TagExt, TagType};
use mockall::mock;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

mock! {
    Capture {}

    #[async_trait]
    impl FrameCapture for Capture {
        async fn capture_frame(&self, video_path: &Path) -> bridge_traits::Result<CapturedFrame>;
    }
}

struct Fixture {
    dir: PathBuf,
    cache: Arc<AssetCache>,
}

impl Fixture {
    async fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("extraction-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let cache = Arc::new(AssetCache::new(AssetCacheConfig::new(dir.join("cache"))).unwrap());
        cache.initialize().await.unwrap();
        Self { dir, cache }
    }

    async fn write(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.dir.join(name);
        tokio::fs::write(&path, content).await.unwrap();
        path
    }

    fn extractor(&self) -> MetadataExtractor {
        MetadataExtractor::new(Arc::clone(&self.cache))
    }

    async fn cleanup(self) {
        tokio::fs::remove_dir_all(&self.dir).await.ok();
    }
}

fn chunk(id: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 9);
    out.extend_from_slice(id);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    if body.len() % 2 == 1 {
        out.push(0);
    }
    out
}

/// 16-bit stereo PCM WAV at 44.1 kHz with optional RIFF INFO tags.
fn wav_bytes(seconds: u32, info: &[(&[u8; 4], &str)]) -> Vec<u8> {
    let sample_rate: u32 = 44_100;
    let channels: u16 = 2;
    let bits: u16 = 16;
    let block_align = channels * bits / 8;
    let byte_rate = sample_rate * u32::from(block_align);

    let mut fmt = Vec::new();
    fmt.extend_from_slice(&1u16.to_le_bytes());
    fmt.extend_from_slice(&channels.to_le_bytes());
    fmt.extend_from_slice(&sample_rate.to_le_bytes());
    fmt.extend_from_slice(&byte_rate.to_le_bytes());
    fmt.extend_from_slice(&block_align.to_le_bytes());
    fmt.extend_from_slice(&bits.to_le_bytes());

    let mut body = b"WAVE".to_vec();
    body.extend(chunk(b"fmt ", &fmt));
    if !info.is_empty() {
        let mut list = b"INFO".to_vec();
        for (id, value) in info {
            let mut text = value.as_bytes().to_vec();
            text.push(0);
            list.extend(chunk(id, &text));
        }
        body.extend(chunk(b"LIST", &list));
    }
    body.extend(chunk(b"data", &vec![0u8; (byte_rate * seconds) as usize]));

    chunk(b"RIFF", &body)
}

fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(width, height));
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
        .unwrap();
    buffer
}

/// Tag `path` with an ID3v2 front cover.
fn embed_cover(path: &Path, cover: &[u8]) {
    let mut tag = Tag::new(TagType::Id3v2);
    tag.set_artist("Cover Artist".to_string());
    tag.push_picture(Picture::new_unchecked(
        PictureType::CoverFront,
        Some(MimeType::Png),
        None,
        cover.to_vec(),
    ));
    tag.save_to_path(path, WriteOptions::default()).unwrap();
}

#[tokio::test]
async fn test_wav_properties_and_tags() {
    let fixture = Fixture::new().await;
    let path = fixture
        .write("song.wav", &wav_bytes(1, &[(b"IART", "X"), (b"IPRD", "First Album")]))
        .await;

    let attrs = fixture.extractor().extract(&path).await;

    assert!((attrs.duration - 1.0).abs() < 0.01, "duration {}", attrs.duration);
    assert_eq!(attrs.sample_rate, Some(44_100));
    assert_eq!(attrs.quality, "lossless");
    assert_eq!(attrs.artist, "X");
    assert_eq!(attrs.album, "First Album");
    assert!(attrs.picture.is_none());
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_embedded_cover_is_cached_once() {
    let fixture = Fixture::new().await;
    let cover = png_bytes(16, 16);
    let first = fixture.write("first.wav", &wav_bytes(1, &[])).await;
    let second = fixture.write("second.wav", &wav_bytes(1, &[])).await;
    embed_cover(&first, &cover);
    embed_cover(&second, &cover);

    let extractor = fixture.extractor();
    let attrs = extractor.extract(&first).await;

    let expected = AssetEntry::relative_path_for(&full_hash(&cover), AssetFormat::Png);
    assert_eq!(attrs.artist, "Cover Artist");
    assert_eq!(attrs.picture.as_deref(), Some(expected.as_str()));
    assert!(fixture.cache.contains(&expected).await);

    let again = extractor.extract(&first).await;
    let shared = extractor.extract(&second).await;
    assert_eq!(again.picture.as_deref(), Some(expected.as_str()));
    assert_eq!(shared.picture.as_deref(), Some(expected.as_str()));
    assert_eq!(fixture.cache.len().await, 1);
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_untagged_audio_keeps_unknown_sentinels() {
    let fixture = Fixture::new().await;
    let path = fixture.write("plain.wav", &wav_bytes(2, &[])).await;

    let attrs = fixture.extractor().extract(&path).await;

    assert!(attrs.duration > 1.9);
    assert_eq!(attrs.artist, "unknown");
    assert_eq!(attrs.album, "unknown");
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_corrupt_and_missing_files_yield_unknown() {
    let fixture = Fixture::new().await;
    let corrupt = fixture.write("corrupt.flac", b"This is not a valid audio file").await;
    let missing = fixture.dir.join("nonexistent.mp3");

    let extractor = fixture.extractor();
    assert_eq!(
        extractor.extract(&corrupt).await,
        core_metadata::MediaAttributes::unknown()
    );
    assert_eq!(
        extractor.extract(&missing).await,
        core_metadata::MediaAttributes::unknown()
    );
    assert!(extractor.try_extract(&missing).await.is_err());
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_video_frame_becomes_thumbnail() {
    let fixture = Fixture::new().await;
    let video = fixture.write("clip.mp4", b"not really a video").await;

    let mut capture = MockCapture::new();
    capture
        .expect_capture_frame()
        .times(1)
        .returning(|_| Ok(CapturedFrame::new(png_bytes(8, 8), 1920, 1080).with_duration(42.5)));

    let extractor = fixture.extractor().with_frame_capture(Arc::new(capture));
    let attrs = extractor.extract(&video).await;

    assert_eq!(attrs.resolution.as_deref(), Some("1080P"));
    assert_eq!(attrs.quality, "1080P");
    assert_eq!(attrs.duration, 42.5);
    let picture = attrs.picture.expect("thumbnail stored");
    assert!(fixture.cache.contains(&picture).await);
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_frame_without_dimensions_is_measured() {
    let fixture = Fixture::new().await;
    let video = fixture.write("clip.mkv", b"matroska-ish").await;

    let mut capture = MockCapture::new();
    capture
        .expect_capture_frame()
        .returning(|_| Ok(CapturedFrame::new(png_bytes(1280, 720), 0, 0)));

    let attrs = fixture
        .extractor()
        .with_frame_capture(Arc::new(capture))
        .extract(&video)
        .await;

    assert_eq!(attrs.resolution.as_deref(), Some("720P"));
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_unmeasurable_frame_leaves_resolution_unset() {
    let fixture = Fixture::new().await;
    let video = fixture.write("clip.webm", b"webm-ish").await;

    let mut capture = MockCapture::new();
    capture
        .expect_capture_frame()
        .returning(|_| Ok(CapturedFrame::new(b"not an image".to_vec(), 0, 0)));

    let attrs = fixture
        .extractor()
        .with_frame_capture(Arc::new(capture))
        .extract(&video)
        .await;

    assert_eq!(attrs.resolution, None);
    assert_eq!(attrs.quality, "unknown");
    assert!(attrs.picture.is_some());
    fixture.cleanup().await;
}

#[tokio::test]
async fn test_missing_decoder_still_indexes_video() {
    let fixture = Fixture::new().await;
    let video = fixture.write("clip.avi", b"riff-ish").await;

    let mut capture = MockCapture::new();
    capture
        .expect_capture_frame()
        .returning(|_| Err(BridgeError::NotAvailable("ffmpeg not on PATH".to_string())));

    let attrs = fixture
        .extractor()
        .with_frame_capture(Arc::new(capture))
        .extract(&video)
        .await;

    assert_eq!(attrs, core_metadata::MediaAttributes::unknown());
    assert!(fixture.cache.is_empty().await);
    fixture.cleanup().await;
}
