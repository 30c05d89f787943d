//! Frame capture through an external `ffmpeg` process.

use async_trait::async_trait;
use bridge_traits::{
    decoder::{CapturedFrame, FrameCapture},
    error::{BridgeError, Result},
};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::{fs, process::Command};
use tracing::{debug, warn};
use uuid::Uuid;

/// Environment variable that overrides the `ffmpeg` binary location.
pub const FFMPEG_ENV: &str = "MEDIASHARE_FFMPEG";

const SEEK_POSITION: &str = "00:00:00.000";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// [`FrameCapture`] backed by the `ffmpeg` command line tool.
///
/// Each call writes a single JPEG frame into a scratch directory, reads it
/// back and removes it. Frame dimensions and duration are parsed from the
/// stream banner ffmpeg prints on stderr.
#[derive(Debug, Clone)]
pub struct FfmpegFrameCapture {
    ffmpeg_path: PathBuf,
    scratch_dir: PathBuf,
    timeout: Duration,
}

impl FfmpegFrameCapture {
    /// Use `$MEDIASHARE_FFMPEG` if set, otherwise `ffmpeg` from `PATH`.
    pub fn new() -> Self {
        let ffmpeg_path = std::env::var_os(FFMPEG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("ffmpeg"));

        Self {
            ffmpeg_path,
            scratch_dir: std::env::temp_dir().join("mediashare-frames"),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_binary(mut self, ffmpeg_path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = ffmpeg_path.into();
        self
    }

    pub fn with_scratch_dir(mut self, scratch_dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = scratch_dir.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn ffmpeg_path(&self) -> &Path {
        &self.ffmpeg_path
    }

    fn command(&self, video_path: &Path, output_path: &Path) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-hide_banner")
            .arg("-y")
            .arg("-ss")
            .arg(SEEK_POSITION)
            .arg("-i")
            .arg(video_path)
            .args(["-frames:v", "1", "-q:v", "2", "-vf", "format=yuvj420p"])
            .arg(output_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for FfmpegFrameCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameCapture for FfmpegFrameCapture {
    async fn capture_frame(&self, video_path: &Path) -> Result<CapturedFrame> {
        fs::create_dir_all(&self.scratch_dir).await?;
        let output_path = self.scratch_dir.join(format!("{}.jpg", Uuid::new_v4()));

        let output = match tokio::time::timeout(
            self.timeout,
            self.command(video_path, &output_path).output(),
        )
        .await
        {
            Err(_) => {
                let _ = fs::remove_file(&output_path).await;
                return Err(BridgeError::Timeout(self.timeout.as_secs()));
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BridgeError::NotAvailable(format!(
                    "ffmpeg not found at {}",
                    self.ffmpeg_path.display()
                )));
            }
            Ok(Err(e)) => return Err(BridgeError::Io(e)),
            Ok(Ok(output)) => output,
        };

        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let _ = fs::remove_file(&output_path).await;
            let reason = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("no diagnostic output");
            return Err(BridgeError::OperationFailed(format!(
                "ffmpeg exited with {}: {}",
                output.status, reason
            )));
        }

        let image_bytes = fs::read(&output_path).await?;
        if let Err(e) = fs::remove_file(&output_path).await {
            warn!(path = ?output_path, error = %e, "Failed to remove scratch frame");
        }

        let (width, height) = parse_video_dimensions(&stderr).unwrap_or((0, 0));
        let mut frame = CapturedFrame::new(image_bytes, width, height);
        if let Some(duration) = parse_duration(&stderr) {
            frame = frame.with_duration(duration);
        }

        debug!(
            path = ?video_path,
            width,
            height,
            bytes = frame.image_bytes.len(),
            "Captured video frame"
        );

        Ok(frame)
    }
}

/// Find the `WIDTHxHEIGHT` token on the first `Video:` stream line.
pub(crate) fn parse_video_dimensions(banner: &str) -> Option<(u32, u32)> {
    banner
        .lines()
        .filter(|line| line.contains("Video:"))
        .flat_map(|line| line.split(|c: char| c.is_whitespace() || c == ','))
        .find_map(parse_dimension_token)
}

fn parse_dimension_token(token: &str) -> Option<(u32, u32)> {
    let token = token.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    let (w, h) = token.split_once('x')?;
    let plausible = |s: &str| (2..=5).contains(&s.len()) && s.bytes().all(|b| b.is_ascii_digit());
    if !plausible(w) || !plausible(h) {
        return None;
    }
    Some((w.parse().ok()?, h.parse().ok()?))
}

/// Parse `Duration: HH:MM:SS.ss` from the input banner.
pub(crate) fn parse_duration(banner: &str) -> Option<f64> {
    let start = banner.find("Duration:")? + "Duration:".len();
    let value = banner[start..].split(',').next()?.trim();

    let mut parts = value.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;

    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BANNER: &str = "Input #0, mov,mp4,m4a,3gp,3g2,mj2, from 'clip.mp4':\n  \
        Duration: 00:01:23.50, start: 0.000000, bitrate: 5712 kb/s\n  \
        Stream #0:0(und): Video: h264 (High) (avc1 / 0x31637661), yuv420p(tv, bt709), 1920x1080 [SAR 1:1 DAR 16:9], 29.97 fps\n  \
        Stream #0:1(und): Audio: aac (LC) (mp4a / 0x6134706D), 48000 Hz, stereo";

    #[test]
    fn test_parse_video_dimensions() {
        assert_eq!(parse_video_dimensions(BANNER), Some((1920, 1080)));
    }

    #[test]
    fn test_parse_dimensions_ignores_codec_tags() {
        let banner = "Stream #0:0: Video: mpeg4 (XVID / 0x44495658), yuv420p, 640x480, 25 fps";
        assert_eq!(parse_video_dimensions(banner), Some((640, 480)));
        assert_eq!(parse_video_dimensions("Stream #0:1: Audio: 0x1234"), None);
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration(BANNER), Some(83.5));
        assert_eq!(parse_duration("Duration: N/A, bitrate: N/A"), None);
        assert_eq!(parse_duration("no banner"), None);
    }

    #[test]
    fn test_builder_overrides() {
        let capture = FfmpegFrameCapture::new()
            .with_binary("/opt/ffmpeg/bin/ffmpeg")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(capture.ffmpeg_path(), Path::new("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(capture.timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_available() {
        let scratch = std::env::temp_dir().join(format!("mediashare-frames-{}", Uuid::new_v4()));
        let capture = FfmpegFrameCapture::new()
            .with_binary("/nonexistent/ffmpeg-binary")
            .with_scratch_dir(&scratch);

        let err = capture
            .capture_frame(Path::new("/nonexistent/video.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotAvailable(_)));

        let _ = std::fs::remove_dir_all(&scratch);
    }
}
