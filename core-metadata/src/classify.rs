//! Quality and resolution labels stored on media records.
//!
//! Both tables are fixed contracts shared with the UI; the tests pin every
//! boundary.

pub const QUALITY_LOSSLESS: &str = "lossless";
pub const QUALITY_VERY_HIGH: &str = "very-high";
pub const QUALITY_HIGH: &str = "high";
pub const QUALITY_STANDARD: &str = "standard";
pub const QUALITY_LOW: &str = "low";

pub const RESOLUTION_STANDARD_DEFINITION: &str = "standard-definition";

/// Minimum sample rate for anything above "low".
const CD_SAMPLE_RATE: u32 = 44_100;

/// `(min kbps, label)` in descending order.
const QUALITY_LADDER: [(u32, &str); 4] = [
    (900, QUALITY_LOSSLESS),
    (320, QUALITY_VERY_HIGH),
    (192, QUALITY_HIGH),
    (128, QUALITY_STANDARD),
];

/// `(min width, min height, label)` in descending order.
const RESOLUTION_LADDER: [(u32, u32, &str); 5] = [
    (7680, 4320, "8K"),
    (3840, 2160, "4K"),
    (2560, 1440, "2K"),
    (1920, 1080, "1080P"),
    (1280, 720, "720P"),
];

/// Audio quality label for a bitrate in kbps and a sample rate in Hz.
pub fn classify_quality(bitrate_kbps: u32, sample_rate_hz: u32) -> &'static str {
    if sample_rate_hz < CD_SAMPLE_RATE {
        return QUALITY_LOW;
    }
    QUALITY_LADDER
        .iter()
        .find(|(min_kbps, _)| bitrate_kbps >= *min_kbps)
        .map(|(_, label)| *label)
        .unwrap_or(QUALITY_LOW)
}

/// Resolution class for a frame of `width` x `height` pixels.
///
/// Both dimensions must reach a rung; anything below 720P, including a zero
/// dimension, is standard definition.
pub fn classify_resolution(width: u32, height: u32) -> &'static str {
    RESOLUTION_LADDER
        .iter()
        .find(|(min_w, min_h, _)| width >= *min_w && height >= *min_h)
        .map(|(_, _, label)| *label)
        .unwrap_or(RESOLUTION_STANDARD_DEFINITION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_boundaries() {
        assert_eq!(classify_quality(900, 44_100), "lossless");
        assert_eq!(classify_quality(899, 44_100), "very-high");
        assert_eq!(classify_quality(320, 44_100), "very-high");
        assert_eq!(classify_quality(319, 44_100), "high");
        assert_eq!(classify_quality(192, 44_100), "high");
        assert_eq!(classify_quality(191, 44_100), "standard");
        assert_eq!(classify_quality(128, 44_100), "standard");
        assert_eq!(classify_quality(127, 44_100), "low");
        assert_eq!(classify_quality(64, 44_100), "low");
        assert_eq!(classify_quality(0, 0), "low");
    }

    #[test]
    fn test_quality_requires_cd_sample_rate() {
        assert_eq!(classify_quality(1411, 22_050), "low");
        assert_eq!(classify_quality(320, 44_099), "low");
        assert_eq!(classify_quality(1411, 96_000), "lossless");
    }

    #[test]
    fn test_resolution_ladder() {
        assert_eq!(classify_resolution(7680, 4320), "8K");
        assert_eq!(classify_resolution(3840, 2160), "4K");
        assert_eq!(classify_resolution(2560, 1440), "2K");
        assert_eq!(classify_resolution(1920, 1080), "1080P");
        assert_eq!(classify_resolution(1280, 720), "720P");
        assert_eq!(classify_resolution(640, 480), "standard-definition");
    }

    #[test]
    fn test_resolution_needs_both_dimensions() {
        // Ultra-wide: width qualifies for 4K, height caps it at 2K.
        assert_eq!(classify_resolution(5120, 1440), "2K");
        assert_eq!(classify_resolution(1920, 1079), "720P");
        assert_eq!(classify_resolution(0, 1080), "standard-definition");
        assert_eq!(classify_resolution(0, 0), "standard-definition");
    }
}
