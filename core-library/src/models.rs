//! Domain models for the media catalog
//!
//! Row types map one-to-one onto the tables in [`crate::schema`]. Timestamps
//! are unix seconds unless stated otherwise.

use crate::error::{LibraryError, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Placeholder for artist, album and quality when nothing could be read.
pub const UNKNOWN: &str = "unknown";

// =============================================================================
// Media Types
// =============================================================================

pub const MUSIC_EXTENSIONS: &[&str] = &[
    ".mp3", ".wav", ".flac", ".aac", ".m4a", ".ogg", ".wma", ".ape", ".aiff", ".aif", ".aifc",
    ".mka", ".wv", ".opus", ".m4b", ".m4p", ".m4r", ".mpc", ".mp+", ".mpp",
];

pub const VIDEO_EXTENSIONS: &[&str] = &[
    ".mp4", ".avi", ".mkv", ".mov", ".wmv", ".flv", ".rmvb", ".rm", ".mpg", ".mpeg", ".mpe",
    ".mpv", ".m2v", ".mts", ".m2ts", ".ts", ".vob", ".ogv", ".3gp", ".3g2", ".webm", ".ogm",
    ".divx", ".xvid",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Music,
    Video,
}

impl MediaType {
    /// Classify a suffix such as `.MP3` or `mkv`.
    pub fn from_extension(extension: &str) -> Option<Self> {
        let normalized = normalize_extension(extension);
        if MUSIC_EXTENSIONS.contains(&normalized.as_str()) {
            Some(MediaType::Music)
        } else if VIDEO_EXTENSIONS.contains(&normalized.as_str()) {
            Some(MediaType::Video)
        } else {
            None
        }
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            MediaType::Music => MUSIC_EXTENSIONS,
            MediaType::Video => VIDEO_EXTENSIONS,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Music => "music",
            MediaType::Video => "video",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lowercase with a leading dot.
pub fn normalize_extension(extension: &str) -> String {
    let lower = extension.trim().to_lowercase();
    if lower.starts_with('.') {
        lower
    } else {
        format!(".{}", lower)
    }
}

// =============================================================================
// Media Files
// =============================================================================

/// One indexed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    pub id: i64,
    /// Absolute path, unique across the catalog
    pub url: String,
    /// File name including extension
    pub name: String,
    /// Extension with its leading dot
    pub suffix: String,
    pub size: i64,
    /// Sampled content fingerprint, shared by files with identical samples
    pub file_hash: Option<String>,
    /// Seconds, 0 when unknown
    pub duration: f64,
    pub artist: String,
    pub album: String,
    /// Audio quality tier, or the resolution class for video
    pub quality: String,
    pub resolution: Option<String>,
    /// Asset cache relative path of the cover
    pub picture: Option<String>,
    pub lyrics: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MediaFile {
    pub fn media_type(&self) -> Option<MediaType> {
        MediaType::from_extension(&self.suffix)
    }
}

/// Values written by an upsert. `id` and `created_at` are owned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMediaFile {
    pub url: String,
    pub name: String,
    pub suffix: String,
    pub size: i64,
    pub file_hash: Option<String>,
    pub duration: f64,
    pub artist: String,
    pub album: String,
    pub quality: String,
    pub resolution: Option<String>,
    pub picture: Option<String>,
    pub lyrics: Option<String>,
}

impl NewMediaFile {
    /// Record with unknown metadata.
    pub fn new(
        url: impl Into<String>,
        name: impl Into<String>,
        suffix: impl Into<String>,
        size: i64,
    ) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            suffix: suffix.into(),
            size,
            file_hash: None,
            duration: 0.0,
            artist: UNKNOWN.to_string(),
            album: UNKNOWN.to_string(),
            quality: UNKNOWN.to_string(),
            resolution: None,
            picture: None,
            lyrics: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(LibraryError::invalid("url", "cannot be empty"));
        }
        if self.size < 0 {
            return Err(LibraryError::invalid(
                "size",
                format!("{} is negative for {}", self.size, self.url),
            ));
        }
        if !self.duration.is_finite() || self.duration < 0.0 {
            return Err(LibraryError::invalid(
                "duration",
                format!("{} is not a valid duration for {}", self.duration, self.url),
            ));
        }
        Ok(())
    }
}

/// Partial update of a stored record; `None` leaves a column untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFileUpdate {
    pub name: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub quality: Option<String>,
    pub resolution: Option<String>,
    pub picture: Option<String>,
    pub lyrics: Option<String>,
    pub duration: Option<f64>,
}

impl MediaFileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.artist.is_none()
            && self.album.is_none()
            && self.quality.is_none()
            && self.resolution.is_none()
            && self.picture.is_none()
            && self.lyrics.is_none()
            && self.duration.is_none()
    }
}

/// Outcome of a batch upsert. Row failures are counted, not raised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub success: u64,
    pub failed: u64,
    pub errors: Vec<String>,
}

impl BatchResult {
    pub fn merge(&mut self, other: BatchResult) {
        self.success += other.success;
        self.failed += other.failed;
        self.errors.extend(other.errors);
    }
}

/// Per-extension totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FormatStat {
    pub suffix: String,
    pub count: i64,
    pub total_size: i64,
}

// =============================================================================
// Categories
// =============================================================================

/// Files grouped by creation date and parent folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MediaCategory {
    pub id: i64,
    pub year: String,
    /// Zero-padded, `"01"` to `"12"`
    pub month: String,
    /// Zero-padded, `"01"` to `"31"`
    pub day: String,
    /// Parent directory name
    pub prepose: String,
    pub picture: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NewMediaCategory {
    pub year: String,
    pub month: String,
    pub day: String,
    pub prepose: String,
    pub picture: Option<String>,
}

impl NewMediaCategory {
    /// Bucket for a calendar date, padding month and day to two digits.
    pub fn for_date(year: i32, month: u32, day: u32, prepose: impl Into<String>) -> Self {
        Self {
            year: year.to_string(),
            month: format!("{:02}", month),
            day: format!("{:02}", day),
            prepose: prepose.into(),
            picture: None,
        }
    }

    pub fn with_picture(mut self, picture: Option<String>) -> Self {
        self.picture = picture;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.year.is_empty() || self.month.is_empty() || self.day.is_empty() {
            return Err(LibraryError::invalid("date", "year, month and day are required"));
        }
        if self.prepose.is_empty() {
            return Err(LibraryError::invalid("prepose", "cannot be empty"));
        }
        Ok(())
    }
}

// =============================================================================
// Settings
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingType {
    String,
    Number,
    Boolean,
    Object,
}

impl SettingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingType::String => "string",
            SettingType::Number => "number",
            SettingType::Boolean => "boolean",
            SettingType::Object => "object",
        }
    }
}

impl FromStr for SettingType {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "string" => Ok(SettingType::String),
            "number" => Ok(SettingType::Number),
            "boolean" => Ok(SettingType::Boolean),
            "object" => Ok(SettingType::Object),
            other => Err(LibraryError::invalid(
                "type",
                format!("unknown setting type '{}'", other),
            )),
        }
    }
}

/// Typed setting value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Boolean(bool),
    Number(f64),
    Text(String),
    Object(serde_json::Value),
}

impl SettingValue {
    pub fn setting_type(&self) -> SettingType {
        match self {
            SettingValue::Text(_) => SettingType::String,
            SettingValue::Number(_) => SettingType::Number,
            SettingValue::Boolean(_) => SettingType::Boolean,
            SettingValue::Object(_) => SettingType::Object,
        }
    }

    /// String form stored in the `value` column.
    pub fn encode(&self) -> Result<String> {
        Ok(match self {
            SettingValue::Text(s) => s.clone(),
            SettingValue::Number(n) => n.to_string(),
            SettingValue::Boolean(b) => b.to_string(),
            SettingValue::Object(v) => serde_json::to_string(v)?,
        })
    }

    pub fn decode(raw: &str, value_type: SettingType) -> Result<Self> {
        match value_type {
            SettingType::String => Ok(SettingValue::Text(raw.to_string())),
            SettingType::Number => raw.trim().parse::<f64>().map(SettingValue::Number).map_err(|_| {
                LibraryError::invalid("value", format!("'{}' is not a number", raw))
            }),
            SettingType::Boolean => match raw.trim() {
                "true" | "1" => Ok(SettingValue::Boolean(true)),
                "false" | "0" => Ok(SettingValue::Boolean(false)),
                other => Err(LibraryError::invalid(
                    "value",
                    format!("'{}' is not a boolean", other),
                )),
            },
            SettingType::Object => Ok(SettingValue::Object(serde_json::from_str(raw)?)),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            SettingValue::Object(v) => Some(v),
            _ => None,
        }
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        SettingValue::Text(value.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        SettingValue::Text(value)
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        SettingValue::Boolean(value)
    }
}

impl From<f64> for SettingValue {
    fn from(value: f64) -> Self {
        SettingValue::Number(value)
    }
}

impl From<serde_json::Value> for SettingValue {
    fn from(value: serde_json::Value) -> Self {
        SettingValue::Object(value)
    }
}

/// Raw row of the `settings` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Setting {
    pub key: String,
    pub value: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub value_type: String,
    pub description: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Setting {
    pub fn parsed(&self) -> Result<SettingValue> {
        SettingValue::decode(&self.value, self.value_type.parse()?)
    }
}

// =============================================================================
// Schema Versions and Stats
// =============================================================================

/// Row of the migration log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SchemaVersion {
    pub version: String,
    pub description: String,
    /// Unix milliseconds
    pub applied_at: i64,
}

/// Aggregate catalog counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseStats {
    pub total_files: i64,
    pub music_files: i64,
    pub video_files: i64,
    pub total_size: i64,
    pub categories: i64,
    pub settings: i64,
    pub last_scanned: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_from_extension() {
        assert_eq!(MediaType::from_extension(".mp3"), Some(MediaType::Music));
        assert_eq!(MediaType::from_extension("FLAC"), Some(MediaType::Music));
        assert_eq!(MediaType::from_extension(".MKV"), Some(MediaType::Video));
        assert_eq!(MediaType::from_extension(".txt"), None);
        assert_eq!(MediaType::from_extension(""), None);
    }

    #[test]
    fn test_new_media_file_validation() {
        assert!(NewMediaFile::new("/m/a.mp3", "a.mp3", ".mp3", 10).validate().is_ok());
        assert!(NewMediaFile::new("  ", "a.mp3", ".mp3", 10).validate().is_err());

        let err = NewMediaFile::new("/m/a.mp3", "a.mp3", ".mp3", -1)
            .validate()
            .unwrap_err();
        assert!(matches!(err, LibraryError::InvalidInput { ref field, .. } if field == "size"));
    }

    #[test]
    fn test_new_media_file_defaults_to_unknown() {
        let file = NewMediaFile::new("/m/a.mp3", "a.mp3", ".mp3", 10);
        assert_eq!(file.artist, UNKNOWN);
        assert_eq!(file.album, UNKNOWN);
        assert_eq!(file.quality, UNKNOWN);
        assert_eq!(file.duration, 0.0);
    }

    #[test]
    fn test_category_pads_month_and_day() {
        let category = NewMediaCategory::for_date(2024, 3, 7, "holiday");
        assert_eq!(category.year, "2024");
        assert_eq!(category.month, "03");
        assert_eq!(category.day, "07");
    }

    #[test]
    fn test_setting_value_encoding() {
        let cases = [
            (SettingValue::from("dark"), "dark", SettingType::String),
            (SettingValue::from(10.0), "10", SettingType::Number),
            (SettingValue::from(true), "true", SettingType::Boolean),
            (
                SettingValue::from(serde_json::json!(["/music"])),
                "[\"/music\"]",
                SettingType::Object,
            ),
        ];

        for (value, encoded, value_type) in cases {
            assert_eq!(value.encode().unwrap(), encoded);
            assert_eq!(value.setting_type(), value_type);
            assert_eq!(SettingValue::decode(encoded, value_type).unwrap(), value);
        }
    }

    #[test]
    fn test_setting_decode_rejects_mismatched_type() {
        assert!(SettingValue::decode("abc", SettingType::Number).is_err());
        assert!(SettingValue::decode("yes", SettingType::Boolean).is_err());
        assert!(SettingValue::decode("{", SettingType::Object).is_err());
        assert!("color".parse::<SettingType>().is_err());
    }

    #[test]
    fn test_batch_result_merge() {
        let mut total = BatchResult::default();
        total.merge(BatchResult {
            success: 2,
            failed: 1,
            errors: vec!["bad row".into()],
        });
        total.merge(BatchResult {
            success: 3,
            failed: 0,
            errors: vec![],
        });
        assert_eq!(total.success, 5);
        assert_eq!(total.failed, 1);
        assert_eq!(total.errors, vec!["bad row".to_string()]);
    }
}
