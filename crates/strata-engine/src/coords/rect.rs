use glam::Vec2;

/// Axis-aligned box in normalized viewport units.
///
/// Used by scissor and viewport ops: (0,0) is the bottom-left of the current
/// viewport and (1,1) the top-right.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub const FULL: Rect = Rect {
        min: Vec2::ZERO,
        max: Vec2::ONE,
    };

    #[inline]
    pub const fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn from_xywh(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self::new(Vec2::new(x, y), Vec2::new(x + w, y + h))
    }

    #[inline]
    pub fn width(self) -> f32 {
        self.max.x - self.min.x
    }

    #[inline]
    pub fn height(self) -> f32 {
        self.max.y - self.min.y
    }

    /// Scales into pixels of a `width` x `height` viewport.
    ///
    /// Inverted boxes produce a zero-sized rect rather than wrapping.
    pub fn to_pixels(self, width: u32, height: u32) -> PixelRect {
        let (w, h) = (width as f32, height as f32);
        PixelRect {
            x: (self.min.x * w) as i32,
            y: (self.min.y * h) as i32,
            width: (self.width() * w).max(0.0) as u32,
            height: (self.height() * h).max(0.0) as u32,
        }
    }
}

/// Rectangle in framebuffer pixels, origin bottom-left.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct PixelRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    #[inline]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    #[inline]
    pub const fn sized(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Clips against a `width` x `height` target. `None` when nothing remains.
    pub fn clamp_to(self, width: u32, height: u32) -> Option<PixelRect> {
        let x0 = self.x.max(0) as i64;
        let y0 = self.y.max(0) as i64;
        let x1 = (self.x as i64 + self.width as i64).min(width as i64);
        let y1 = (self.y as i64 + self.height as i64).min(height as i64);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(PixelRect::new(x0 as i32, y0 as i32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_rect_covers_viewport() {
        assert_eq!(Rect::FULL.to_pixels(800, 600), PixelRect::sized(800, 600));
    }

    #[test]
    fn partial_rect_scales_each_axis() {
        let r = Rect::from_xywh(0.25, 0.5, 0.5, 0.25);
        assert_eq!(r.to_pixels(800, 600), PixelRect::new(200, 300, 400, 150));
    }

    #[test]
    fn inverted_rect_is_empty() {
        let r = Rect::new(Vec2::ONE, Vec2::ZERO);
        assert!(r.to_pixels(100, 100).is_empty());
    }

    #[test]
    fn clamp_to_trims_overhang() {
        let p = PixelRect::new(-10, 90, 50, 50);
        assert_eq!(p.clamp_to(100, 100), Some(PixelRect::new(0, 90, 40, 10)));
    }

    #[test]
    fn clamp_to_outside_is_none() {
        assert_eq!(PixelRect::new(200, 0, 10, 10).clamp_to(100, 100), None);
    }
}
