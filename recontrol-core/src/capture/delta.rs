//! Tile-level dirty-region detection between consecutive captures.
//!
//! Partitions the surface into a fixed `tile_size × tile_size` grid (last
//! row/column clipped to the surface bounds) and flags a tile dirty when any
//! byte differs from the previous capture. Adjacent dirty tiles are then
//! merged greedily to trade region count for encode efficiency.

use crate::capture::types::{PixelBuffer, Rect};

// ── DirtyDetector ────────────────────────────────────────────────

/// Stateful detector that remembers the previous capture and emits merged
/// dirty regions.
pub struct DirtyDetector {
    previous: Option<PixelBuffer>,
    tile_size: u32,
}

impl DirtyDetector {
    /// Create a detector with the given tile size (pixels). A zero tile
    /// size is clamped to one rather than dividing the grid by zero.
    pub fn new(tile_size: u32) -> Self {
        Self {
            previous: None,
            tile_size: tile_size.max(1),
        }
    }

    /// Forget the previous capture, forcing the next tick to a full frame.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Whether a previous capture is held (i.e. the next tick is a diff).
    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }

    /// Compare `current` against the stored previous capture and return the
    /// merged dirty regions.
    ///
    /// The first call (or the call after [`reset`](Self::reset), or after a
    /// resolution change) returns the whole surface as one region. An empty
    /// result means nothing changed.
    pub fn detect(&mut self, current: &PixelBuffer) -> Vec<Rect> {
        let regions = match &self.previous {
            Some(prev) if prev.width == current.width && prev.height == current.height => {
                merge_rects(self.dirty_tiles(current, prev))
            }
            _ => vec![current.bounds()],
        };

        self.previous = Some(current.clone());
        regions
    }

    // ── Internal ─────────────────────────────────────────────────

    fn dirty_tiles(&self, current: &PixelBuffer, previous: &PixelBuffer) -> Vec<Rect> {
        let ts = self.tile_size;
        let cols = current.width.div_ceil(ts);
        let rows = current.height.div_ceil(ts);

        let mut dirty = Vec::new();
        for row in 0..rows {
            for col in 0..cols {
                let x = col * ts;
                let y = row * ts;
                let w = ts.min(current.width - x);
                let h = ts.min(current.height - y);

                if tile_differs(current, previous, x, y, w, h) {
                    dirty.push(Rect::new(x, y, w, h));
                }
            }
        }
        dirty
    }
}

/// Row-by-row comparison of one tile.
fn tile_differs(current: &PixelBuffer, previous: &PixelBuffer, x: u32, y: u32, w: u32, h: u32) -> bool {
    let bpp = current.bytes_per_pixel;
    let left = x as usize * bpp;
    let len = w as usize * bpp;

    for row in y..y + h {
        let cur = &current.data[row as usize * current.stride + left..][..len];
        let prev = &previous.data[row as usize * previous.stride + left..][..len];
        if !bytes_equal(cur, prev) {
            return true;
        }
    }
    false
}

/// Bulk compare: eight bytes at a time, then the byte tail.
fn bytes_equal(a: &[u8], b: &[u8]) -> bool {
    let mut a_words = a.chunks_exact(8);
    let mut b_words = b.chunks_exact(8);
    for (wa, wb) in a_words.by_ref().zip(b_words.by_ref()) {
        // chunks_exact guarantees 8-byte slices.
        let va = u64::from_ne_bytes(wa.try_into().unwrap());
        let vb = u64::from_ne_bytes(wb.try_into().unwrap());
        if va != vb {
            return false;
        }
    }
    a_words.remainder() == b_words.remainder()
}

/// Greedy merge: repeatedly union any two rectangles whose bounding box is at
/// most twice the sum of their individual areas, until no merge applies.
pub fn merge_rects(rects: Vec<Rect>) -> Vec<Rect> {
    if rects.len() <= 1 {
        return rects;
    }

    let mut out = rects;
    loop {
        let mut merged = false;
        'scan: for i in 0..out.len() {
            for j in i + 1..out.len() {
                let a = out[i];
                let b = out[j];
                let u = a.union(&b);
                if u.area() <= 2 * (a.area() + b.area()) {
                    out[i] = u;
                    out.remove(j);
                    merged = true;
                    break 'scan;
                }
            }
        }
        if !merged {
            return out;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
