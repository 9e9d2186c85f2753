//! Region encoding.
//!
//! [`RegionEncoder`] is the seam to the platform image codec; the default
//! [`ZstdRegionEncoder`] packs the region's rows tightly and compresses them
//! with zstd. zstd output is bit-stable for identical input and level, which
//! the engine's duplicate-batch elision relies on.

use bytes::Bytes;

use crate::capture::types::{PixelBuffer, Rect};
use crate::error::ReconError;

// ── FrameRegion ──────────────────────────────────────────────────

/// One encoded region of a capture tick.
///
/// The encoded bytes are transient: serialized and sent within the tick that
/// produced them, never retained past the send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRegion {
    /// Encoded image bytes.
    pub data: Bytes,
    /// `true` when this region covers the whole surface.
    pub is_full_frame: bool,
    /// Region geometry in surface coordinates.
    pub rect: Rect,
}

// ── FrameBatch ───────────────────────────────────────────────────

/// All regions produced by one capture tick, sent as a single unit.
///
/// Batches with zero regions are never emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBatch {
    pub regions: Vec<FrameRegion>,
}

impl FrameBatch {
    pub fn new(regions: Vec<FrameRegion>) -> Self {
        Self { regions }
    }

    /// Total encoded payload size in bytes.
    pub fn encoded_len(&self) -> usize {
        self.regions.iter().map(|r| r.data.len()).sum()
    }
}

// ── RegionEncoder ────────────────────────────────────────────────

/// Encodes one rectangular region of a pixel surface.
pub trait RegionEncoder: Send + Sync {
    /// Encode `rect` of `frame` at the given quality (1-100).
    fn encode(&self, frame: &PixelBuffer, rect: Rect, quality: u8) -> Result<Bytes, ReconError>;
}

// ── ZstdRegionEncoder ────────────────────────────────────────────

/// Default encoder: tightly packed rows, zstd-compressed.
///
/// Quality maps inversely onto the compression level: high quality favours
/// speed (level 1), low quality favours ratio (up to level 9).
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdRegionEncoder;

impl ZstdRegionEncoder {
    /// Compression level for a quality slider value.
    fn level(quality: u8) -> i32 {
        let quality = i32::from(quality.clamp(1, 100));
        (100 - quality) * 8 / 100 + 1
    }
}

impl RegionEncoder for ZstdRegionEncoder {
    fn encode(&self, frame: &PixelBuffer, rect: Rect, quality: u8) -> Result<Bytes, ReconError> {
        let packed = frame.extract(rect);
        let compressed = zstd::encode_all(packed.data.as_slice(), Self::level(quality))
            .map_err(|e| ReconError::Encode(format!("zstd: {e}")))?;
        Ok(Bytes::from(compressed))
    }
}

// ── Tests ────────────────────────────────────────────────────────
