//! Content fingerprints.
//!
//! Two hashes with different guarantees:
//!
//! - [`sample_hash`] reads four fixed windows of a file and digests them. It
//!   is cheap on multi-gigabyte videos and identifies a file well enough to
//!   spot renames, but two distinct files with identical sampled regions
//!   collide. It is never used as a dedup key.
//! - [`full_hash`] digests a whole buffer and is the content address used by
//!   the asset cache.

use sha2::{Digest, Sha256};
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::Result;

/// Bytes read per sampled window.
pub const SAMPLE_WINDOW: u64 = 4096;

/// Start offsets of the sampled windows for a file of `size` bytes.
///
/// Windows sit at the start, middle, three-quarter mark and end. Each is
/// clipped to `[0, size)`.
pub fn sample_offsets(size: u64) -> [u64; 4] {
    [
        0,
        size / 2,
        size / 4 * 3 + (size % 4) * 3 / 4,
        size.saturating_sub(SAMPLE_WINDOW),
    ]
}

/// Sampled SHA-256 fingerprint of the file at `path`, as lowercase hex.
pub async fn sample_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path).await?;
    let size = file.metadata().await?.len();

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; SAMPLE_WINDOW as usize];

    for offset in sample_offsets(size) {
        let len = SAMPLE_WINDOW.min(size.saturating_sub(offset)) as usize;
        if len == 0 {
            continue;
        }
        file.seek(SeekFrom::Start(offset)).await?;
        file.read_exact(&mut buffer[..len]).await?;
        hasher.update(&buffer[..len]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of the entire buffer, as lowercase hex.
pub fn full_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
