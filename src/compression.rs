use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};

use crate::error::{PasteError, Result};

/// Upper bound on what a capacity hint may preallocate up front.
const MAX_PREALLOCATION: usize = 64 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    Fastest,
    #[default]
    Default,
    Best,
    /// zlib level 0-9.
    Level(u32),
}

impl From<CompressionLevel> for Compression {
    fn from(level: CompressionLevel) -> Self {
        match level {
            CompressionLevel::Fastest => Compression::fast(),
            CompressionLevel::Default => Compression::default(),
            CompressionLevel::Best => Compression::best(),
            CompressionLevel::Level(level) => Compression::new(level.min(9)),
        }
    }
}

/// Inflates a zlib stream. `capacity_hint` sizes the initial buffer; the
/// buffer grows if the stream turns out to be larger. A stream that ends
/// before its final block is an error, not a short result.
pub fn inflate(compressed: &[u8], capacity_hint: usize) -> Result<Vec<u8>> {
    inflate_within(compressed, capacity_hint, usize::MAX)
}

/// Like [`inflate`], but fails as soon as the output passes `limit` bytes.
pub fn inflate_within(compressed: &[u8], capacity_hint: usize, limit: usize) -> Result<Vec<u8>> {
    let ceiling = limit.saturating_add(1);
    let mut inflater = Decompress::new(true);
    let mut raw = Vec::with_capacity(capacity_hint.clamp(64, MAX_PREALLOCATION).min(ceiling));

    loop {
        if raw.len() == raw.capacity() {
            raw.reserve_exact(raw.capacity().max(4096).min(ceiling - raw.len()));
        }

        let before = (inflater.total_in(), inflater.total_out());
        let consumed = before.0 as usize;
        let status = inflater
            .decompress_vec(&compressed[consumed..], &mut raw, FlushDecompress::None)
            .map_err(|err| PasteError::Decompression(err.to_string()))?;

        if raw.len() > limit {
            return Err(PasteError::Decompression(format!(
                "stream inflates past {limit} bytes"
            )));
        }

        match status {
            Status::StreamEnd => return Ok(raw),
            Status::Ok | Status::BufError => {
                let stalled = before == (inflater.total_in(), inflater.total_out());
                if stalled && raw.len() < raw.capacity() {
                    return Err(PasteError::Decompression(format!(
                        "stream ended early after {} of {} bytes",
                        inflater.total_in(),
                        compressed.len()
                    )));
                }
            }
        }
    }
}

pub fn deflate(raw: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(raw.len() / 2 + 64), level.into());
    encoder
        .write_all(raw)
        .map_err(|err| PasteError::Compression(err.to_string()))?;
    encoder
        .finish()
        .map_err(|err| PasteError::Compression(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanlines() -> Vec<u8> {
        (0..6 * 1601).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn deflate_then_inflate_restores_scanlines() {
        let raw = scanlines();
        let packed = deflate(&raw, CompressionLevel::Default).unwrap();
        assert!(packed.len() < raw.len());
        assert_eq!(inflate(&packed, raw.len()).unwrap(), raw);
    }

    #[test]
    fn undersized_hint_still_inflates_everything() {
        let raw = scanlines();
        let packed = deflate(&raw, CompressionLevel::Best).unwrap();
        assert_eq!(inflate(&packed, 16).unwrap(), raw);
    }

    #[test]
    fn output_grows_in_small_steps() {
        let raw: Vec<u8> = (0..200u32).map(|i| (i * 7 % 256) as u8).collect();
        let packed = deflate(&raw, CompressionLevel::Default).unwrap();
        assert_eq!(inflate(&packed, 64).unwrap(), raw);
        assert_eq!(inflate(&packed, 0).unwrap(), raw);
    }

    #[test]
    fn limit_equal_to_output_is_accepted() {
        let raw = scanlines();
        let packed = deflate(&raw, CompressionLevel::Default).unwrap();
        assert_eq!(inflate_within(&packed, 16, raw.len()).unwrap(), raw);
    }

    #[test]
    fn output_past_limit_is_refused() {
        let raw = vec![0u8; 1 << 20];
        let packed = deflate(&raw, CompressionLevel::Best).unwrap();
        let err = inflate_within(&packed, 1024, 4096).unwrap_err();
        assert!(matches!(err, PasteError::Decompression(ref msg) if msg.contains("past 4096")));
    }

    #[test]
    fn garbage_is_a_decompression_error() {
        let err = inflate(b"definitely not zlib", 64).unwrap_err();
        assert!(matches!(err, PasteError::Decompression(_)));
    }

    #[test]
    fn cut_stream_is_a_decompression_error() {
        let packed = deflate(&scanlines(), CompressionLevel::Fastest).unwrap();
        let err = inflate(&packed[..packed.len() / 2], 64).unwrap_err();
        assert!(matches!(err, PasteError::Decompression(_)));
    }
}
