use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::MetadataError;

/// Directory under the cache root holding the asset files.
pub const ASSET_DIR: &str = "images";

/// Image formats the cache stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetFormat {
    Jpg,
    Jpeg,
    Png,
    Webp,
    Gif,
    Bmp,
}

impl AssetFormat {
    pub const ALL: [AssetFormat; 6] = [
        AssetFormat::Jpg,
        AssetFormat::Jpeg,
        AssetFormat::Png,
        AssetFormat::Webp,
        AssetFormat::Gif,
        AssetFormat::Bmp,
    ];

    pub fn extension(&self) -> &'static str {
        match self {
            AssetFormat::Jpg => "jpg",
            AssetFormat::Jpeg => "jpeg",
            AssetFormat::Png => "png",
            AssetFormat::Webp => "webp",
            AssetFormat::Gif => "gif",
            AssetFormat::Bmp => "bmp",
        }
    }

    /// Identify a format from the leading magic bytes.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            return Some(AssetFormat::Jpg);
        }
        if data.starts_with(&[0x89, b'P', b'N', b'G']) {
            return Some(AssetFormat::Png);
        }
        if data.starts_with(b"GIF") {
            return Some(AssetFormat::Gif);
        }
        if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WEBP" {
            return Some(AssetFormat::Webp);
        }
        if data.starts_with(b"BM") {
            return Some(AssetFormat::Bmp);
        }
        None
    }

    /// Format from a file name's extension, if supported.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
    }

    /// Encoder used when a downscaled image is written back.
    pub(crate) fn image_format(&self) -> image::ImageFormat {
        match self {
            AssetFormat::Jpg | AssetFormat::Jpeg => image::ImageFormat::Jpeg,
            AssetFormat::Png => image::ImageFormat::Png,
            AssetFormat::Webp => image::ImageFormat::WebP,
            AssetFormat::Gif => image::ImageFormat::Gif,
            AssetFormat::Bmp => image::ImageFormat::Bmp,
        }
    }
}

impl FromStr for AssetFormat {
    type Err = MetadataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_start_matches('.').to_ascii_lowercase();
        AssetFormat::ALL
            .into_iter()
            .find(|format| format.extension() == normalized)
            .ok_or_else(|| MetadataError::UnsupportedFormat(s.to_string()))
    }
}

impl fmt::Display for AssetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Index entry for one cached asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetEntry {
    /// Full content hash, also the file stem
    pub hash: String,
    /// `images/<hash>.<ext>`, the identifier stored on media records
    pub relative_path: String,
    /// Absolute location on disk
    pub stored_path: PathBuf,
    pub size: u64,
    pub format: AssetFormat,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub access_count: u64,
}

impl AssetEntry {
    pub fn relative_path_for(hash: &str, format: AssetFormat) -> String {
        format!("{}/{}.{}", ASSET_DIR, hash, format.extension())
    }
}

/// Content hash named by a relative path, stored path or bare hash.
///
/// Assets are named `<hash>.<ext>`, so the file stem is the hash.
pub fn hash_from_reference(reference: &str) -> Option<&str> {
    let trimmed = reference.trim();
    if trimmed.is_empty() {
        return None;
    }
    let file_name = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => file_name,
    };
    (!stem.is_empty()).then_some(stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_magic_bytes() {
        assert_eq!(
            AssetFormat::sniff(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0, 0, 0]),
            Some(AssetFormat::Jpg)
        );
        assert_eq!(
            AssetFormat::sniff(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
            Some(AssetFormat::Png)
        );
        assert_eq!(AssetFormat::sniff(b"GIF89a\0\0"), Some(AssetFormat::Gif));
        assert_eq!(AssetFormat::sniff(b"RIFF\0\0\0\0WEBPVP8 "), Some(AssetFormat::Webp));
        assert_eq!(AssetFormat::sniff(b"BM\0\0\0\0\0\0"), Some(AssetFormat::Bmp));
        assert_eq!(AssetFormat::sniff(b"not an image"), None);
        assert_eq!(AssetFormat::sniff(&[0xFF, 0xD8]), None);
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("PNG".parse::<AssetFormat>().unwrap(), AssetFormat::Png);
        assert_eq!(".jpeg".parse::<AssetFormat>().unwrap(), AssetFormat::Jpeg);
        assert!("tiff".parse::<AssetFormat>().is_err());
        assert_eq!(
            AssetFormat::from_path(Path::new("/x/cover.WEBP")),
            Some(AssetFormat::Webp)
        );
    }

    #[test]
    fn test_hash_from_reference() {
        assert_eq!(hash_from_reference("images/abc.jpg"), Some("abc"));
        assert_eq!(hash_from_reference("C:\\cache\\images\\abc.png"), Some("abc"));
        assert_eq!(hash_from_reference("abc"), Some("abc"));
        assert_eq!(hash_from_reference("  "), None);
        assert_eq!(
            AssetEntry::relative_path_for("abc", AssetFormat::Png),
            "images/abc.png"
        );
    }
}
