//! Framebuffer state updated as graphics payloads are decoded.
//!
//! [`DecodedImage`] owns the pixel store for the negotiated desktop and
//! accumulates dirty rectangles until the caller drains them for
//! redraw. It is mutated only by the active stage during `process`.

use crate::error::VrdError;

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout of the decoded framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Blue, Green, Red, Alpha.
    Bgra8,
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8,
    /// 3 bytes per pixel: Red, Green, Blue.
    Rgb8,
}

impl PixelFormat {
    /// Bytes consumed by a single pixel in this format.
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Bgra8 | PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

// ── Rect ─────────────────────────────────────────────────────────

/// A rectangle in framebuffer coordinates.
///
/// `width` and `height` are exclusive extents: the covered pixels are
/// `x..x+width` × `y..y+height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

impl Rect {
    pub const fn new(x: u16, y: u16, width: u16, height: u16) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// One-past-the-right column.
    pub fn right(&self) -> u32 {
        self.x as u32 + self.width as u32
    }

    /// One-past-the-bottom row.
    pub fn bottom(&self) -> u32 {
        self.y as u32 + self.height as u32
    }

    /// Number of pixels covered.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether `self` fully contains `other`.
    pub fn contains(&self, other: &Rect) -> bool {
        self.x <= other.x
            && self.y <= other.y
            && self.right() >= other.right()
            && self.bottom() >= other.bottom()
    }

    /// Whether the given pixel lies inside this rectangle.
    pub fn contains_point(&self, px: u16, py: u16) -> bool {
        px >= self.x && (px as u32) < self.right() && py >= self.y && (py as u32) < self.bottom()
    }

    /// Merge `self` and `other` when their union is itself a rectangle.
    ///
    /// That holds when one contains the other, or when the two share
    /// one axis span exactly and touch or overlap on the other axis.
    /// Returns `None` for any pair whose bounding box would cover
    /// pixels neither rectangle covers.
    pub fn try_merge(&self, other: &Rect) -> Option<Rect> {
        if self.contains(other) {
            return Some(*self);
        }
        if other.contains(self) {
            return Some(*other);
        }

        // Same rows, horizontally touching or overlapping.
        if self.y == other.y && self.height == other.height {
            let (left, right) = if self.x <= other.x {
                (self, other)
            } else {
                (other, self)
            };
            if right.x as u32 <= left.right() {
                let end = left.right().max(right.right());
                return Some(Rect::new(
                    left.x,
                    left.y,
                    (end - left.x as u32) as u16,
                    left.height,
                ));
            }
        }

        // Same columns, vertically touching or overlapping.
        if self.x == other.x && self.width == other.width {
            let (top, bottom) = if self.y <= other.y {
                (self, other)
            } else {
                (other, self)
            };
            if bottom.y as u32 <= top.bottom() {
                let end = top.bottom().max(bottom.bottom());
                return Some(Rect::new(
                    top.x,
                    top.y,
                    top.width,
                    (end - top.y as u32) as u16,
                ));
            }
        }

        None
    }

    /// Insert `rect` into `list`, greedily merging with any entry whose
    /// union with it is exact. Merging repeats until no entry absorbs
    /// the newcomer, so a rect bridging two existing ones collapses
    /// all three.
    pub fn coalesce_into(list: &mut Vec<Rect>, rect: Rect) {
        let mut pending = rect;
        loop {
            let mut merged = false;
            let mut i = 0;
            while i < list.len() {
                if let Some(m) = list[i].try_merge(&pending) {
                    list.swap_remove(i);
                    pending = m;
                    merged = true;
                } else {
                    i += 1;
                }
            }
            if !merged {
                break;
            }
        }
        list.push(pending);
    }
}

// ── DecodedImage ─────────────────────────────────────────────────

/// Mutable framebuffer sized to the negotiated desktop.
///
/// Invariant: `pixels.len() == width * height * bytes_per_pixel` for
/// the whole lifetime of the image; every recorded dirty rectangle is
/// in bounds.
#[derive(Debug)]
pub struct DecodedImage {
    width: u16,
    height: u16,
    format: PixelFormat,
    pixels: Vec<u8>,
    dirty: Vec<Rect>,
}

impl DecodedImage {
    /// Allocate a zeroed framebuffer of `width` × `height`.
    pub fn new(width: u16, height: u16, format: PixelFormat) -> Self {
        let len = width as usize * height as usize * format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            pixels: vec![0u8; len],
            dirty: Vec::new(),
        }
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// The full pixel store, `width * height * bpp` bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Pixel bytes at `(x, y)`.
    ///
    /// # Panics
    ///
    /// Panics if `(x, y)` is out of bounds. Test/diagnostic helper.
    pub fn pixel(&self, x: u16, y: u16) -> &[u8] {
        let bpp = self.format.bytes_per_pixel();
        let offset = (y as usize * self.width as usize + x as usize) * bpp;
        &self.pixels[offset..offset + bpp]
    }

    /// Whether `rect` lies entirely within the framebuffer.
    pub fn in_bounds(&self, rect: &Rect) -> bool {
        rect.right() <= self.width as u32 && rect.bottom() <= self.height as u32
    }

    /// Blit tightly-packed rows of pixel data into `rect` and record it
    /// as dirty.
    ///
    /// `data` must be exactly `rect.width * rect.height * bpp` bytes.
    /// The caller (the stage's decode pass) is responsible for having
    /// validated bounds and lengths up front so that a failing payload
    /// never partially mutates the image; this method still re-checks
    /// and fails cleanly rather than panicking.
    pub fn apply_rect(&mut self, rect: Rect, data: &[u8]) -> Result<(), VrdError> {
        if !self.in_bounds(&rect) {
            return Err(VrdError::RectOutOfBounds {
                x: rect.x,
                y: rect.y,
                width: rect.width,
                height: rect.height,
                max_width: self.width,
                max_height: self.height,
            });
        }

        let bpp = self.format.bytes_per_pixel();
        let expected = rect.width as usize * rect.height as usize * bpp;
        if data.len() != expected {
            return Err(VrdError::LengthMismatch {
                expected,
                actual: data.len(),
            });
        }

        let row_stride = self.width as usize * bpp;
        let rect_row = rect.width as usize * bpp;
        for row in 0..rect.height as usize {
            let src_start = row * rect_row;
            let dst_start = (rect.y as usize + row) * row_stride + rect.x as usize * bpp;
            self.pixels[dst_start..dst_start + rect_row]
                .copy_from_slice(&data[src_start..src_start + rect_row]);
        }

        Rect::coalesce_into(&mut self.dirty, rect);
        Ok(())
    }

    /// Dirty rectangles accumulated since the last drain.
    pub fn dirty(&self) -> &[Rect] {
        &self.dirty
    }

    /// Take the accumulated dirty rectangles, leaving the image clean.
    pub fn drain_dirty(&mut self) -> Vec<Rect> {
        std::mem::take(&mut self.dirty)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_adjacent_same_rows() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(10, 0, 10, 10);
        let m = a.try_merge(&b).unwrap();
        assert_eq!(m, Rect::new(0, 0, 20, 10));
    }

    #[test]
    fn merge_overlapping_same_columns() {
        let a = Rect::new(4, 0, 8, 10);
        let b = Rect::new(4, 6, 8, 10);
        let m = a.try_merge(&b).unwrap();
        assert_eq!(m, Rect::new(4, 0, 8, 16));
    }

    #[test]
    fn merge_containment() {
        let outer = Rect::new(0, 0, 100, 100);
        let inner = Rect::new(10, 10, 5, 5);
        assert_eq!(inner.try_merge(&outer), Some(outer));
    }

    #[test]
    fn no_merge_for_disjoint_or_staggered() {
        let a = Rect::new(0, 0, 10, 10);
        assert!(a.try_merge(&Rect::new(50, 50, 10, 10)).is_none());
        // Touching but offset rows — union is L-shaped, not a rect.
        assert!(a.try_merge(&Rect::new(10, 5, 10, 10)).is_none());
    }

    #[test]
    fn coalesce_bridging_rect_collapses_neighbours() {
        let mut list = vec![Rect::new(0, 0, 10, 10), Rect::new(20, 0, 10, 10)];
        Rect::coalesce_into(&mut list, Rect::new(10, 0, 10, 10));
        assert_eq!(list, vec![Rect::new(0, 0, 30, 10)]);
    }

    #[test]
    fn apply_rect_writes_pixels_and_records_dirty() {
        let mut img = DecodedImage::new(32, 32, PixelFormat::Bgra8);
        let rect = Rect::new(4, 4, 2, 2);
        img.apply_rect(rect, &[0xAB; 2 * 2 * 4]).unwrap();

        assert_eq!(img.pixel(4, 4), &[0xAB; 4]);
        assert_eq!(img.pixel(5, 5), &[0xAB; 4]);
        assert_eq!(img.pixel(6, 6), &[0, 0, 0, 0]);
        assert_eq!(img.dirty(), &[rect]);

        let drained = img.drain_dirty();
        assert_eq!(drained, vec![rect]);
        assert!(img.dirty().is_empty());
    }

    #[test]
    fn apply_rect_out_of_bounds_fails() {
        let mut img = DecodedImage::new(16, 16, PixelFormat::Rgb8);
        let err = img
            .apply_rect(Rect::new(10, 10, 10, 10), &[0u8; 10 * 10 * 3])
            .unwrap_err();
        assert!(matches!(err, VrdError::RectOutOfBounds { .. }));
        assert!(img.dirty().is_empty());
        assert!(img.pixels().iter().all(|&b| b == 0));
    }

    #[test]
    fn apply_rect_wrong_data_length_fails() {
        let mut img = DecodedImage::new(16, 16, PixelFormat::Bgra8);
        let err = img
            .apply_rect(Rect::new(0, 0, 4, 4), &[0u8; 3])
            .unwrap_err();
        assert!(matches!(err, VrdError::LengthMismatch { .. }));
    }

    #[test]
    fn pixel_buffer_length_invariant() {
        let img = DecodedImage::new(800, 600, PixelFormat::Bgra8);
        assert_eq!(img.pixels().len(), 800 * 600 * 4);
    }
}
