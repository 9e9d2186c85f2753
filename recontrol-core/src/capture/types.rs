//! Pixel buffer and rectangle primitives for the capture pipeline.

use serde::{Deserialize, Serialize};

// ── Rect ─────────────────────────────────────────────────────────

/// An axis-aligned rectangle in surface coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Area in pixels.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Bounding box of `self` and `other`.
    pub fn union(&self, other: &Rect) -> Rect {
        let x1 = self.x.min(other.x);
        let y1 = self.y.min(other.y);
        let x2 = (self.x + self.width).max(other.x + other.width);
        let y2 = (self.y + self.height).max(other.y + other.height);
        Rect::new(x1, y1, x2 - x1, y2 - y1)
    }
}

// ── PixelBuffer ──────────────────────────────────────────────────

/// An owned raw pixel surface.
///
/// Rows are `stride` bytes apart; `stride >= width * bytes_per_pixel` to
/// allow for captures with padded rows. The buffer is released when dropped;
/// nothing in the pipeline retains it past the tick that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    pub bytes_per_pixel: usize,
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// A tightly packed buffer of the given geometry.
    pub fn new(width: u32, height: u32, bytes_per_pixel: usize, data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            stride: width as usize * bytes_per_pixel,
            bytes_per_pixel,
            data,
        }
    }

    /// The rectangle covering the whole surface.
    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    /// One row's visible bytes (excluding stride padding).
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * self.bytes_per_pixel]
    }

    /// Copy `rect` out into a new tightly packed buffer.
    ///
    /// `rect` must lie within the surface bounds.
    pub fn extract(&self, rect: Rect) -> PixelBuffer {
        let bpp = self.bytes_per_pixel;
        let row_len = rect.width as usize * bpp;
        let mut data = Vec::with_capacity(row_len * rect.height as usize);
        for row in 0..rect.height {
            let y = (rect.y + row) as usize;
            let start = y * self.stride + rect.x as usize * bpp;
            data.extend_from_slice(&self.data[start..start + row_len]);
        }
        PixelBuffer::new(rect.width, rect.height, bpp, data)
    }
}

// ── Tests ────────────────────────────────────────────────────────
