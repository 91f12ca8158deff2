/// Axis-aligned rectangle in physical pixels (top-left origin).
///
/// Used for viewports, scissor rectangles and overlay clip regions.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rectangle {
    #[inline]
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle covering a whole target of `size` pixels.
    #[inline]
    pub const fn full(size: [u32; 2]) -> Self {
        Self::new(0, 0, size[0], size[1])
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    #[inline]
    pub fn right(self) -> i64 {
        self.x as i64 + self.width as i64
    }

    #[inline]
    pub fn bottom(self) -> i64 {
        self.y as i64 + self.height as i64
    }

    /// Half-open containment: [min, max).
    #[inline]
    pub fn contains(self, px: i64, py: i64) -> bool {
        px >= self.x as i64 && py >= self.y as i64 && px < self.right() && py < self.bottom()
    }

    pub fn intersect(self, other: Rectangle) -> Option<Rectangle> {
        let x0 = (self.x as i64).max(other.x as i64);
        let y0 = (self.y as i64).max(other.y as i64);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());

        if x1 <= x0 || y1 <= y0 {
            None
        } else {
            Some(Rectangle::new(
                x0 as i32,
                y0 as i32,
                (x1 - x0) as u32,
                (y1 - y0) as u32,
            ))
        }
    }

    /// Clips the rectangle to a target of `size` pixels.
    ///
    /// Returns `None` when nothing remains.
    #[inline]
    pub fn clamp_to(self, size: [u32; 2]) -> Option<Rectangle> {
        self.intersect(Rectangle::full(size))
    }

    #[inline]
    pub fn size(self) -> [u32; 2] {
        [self.width, self.height]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(x: i32, y: i32, w: u32, h: u32) -> Rectangle { Rectangle::new(x, y, w, h) }

    // ── contains ──────────────────────────────────────────────────────────

    #[test]
    fn contains_interior_point() {
        assert!(r(0, 0, 10, 10).contains(5, 5));
    }

    #[test]
    fn contains_top_left_inclusive() {
        assert!(r(2, 3, 10, 10).contains(2, 3));
    }

    #[test]
    fn contains_bottom_right_exclusive() {
        assert!(!r(0, 0, 10, 10).contains(10, 10));
        assert!(!r(0, 0, 10, 10).contains(9, 10));
    }

    // ── intersect ─────────────────────────────────────────────────────────

    #[test]
    fn intersect_overlapping() {
        assert_eq!(r(0, 0, 10, 10).intersect(r(5, 5, 10, 10)), Some(r(5, 5, 5, 5)));
    }

    #[test]
    fn intersect_touching_edge_returns_none() {
        assert!(r(0, 0, 10, 10).intersect(r(10, 0, 10, 10)).is_none());
    }

    #[test]
    fn intersect_negative_origin() {
        assert_eq!(r(-4, -4, 8, 8).intersect(r(0, 0, 100, 100)), Some(r(0, 0, 4, 4)));
    }

    // ── clamp_to ──────────────────────────────────────────────────────────

    #[test]
    fn clamp_to_larger_target_is_identity() {
        assert_eq!(r(1, 2, 3, 4).clamp_to([64, 64]), Some(r(1, 2, 3, 4)));
    }

    #[test]
    fn clamp_to_trims_overhang() {
        assert_eq!(r(60, 60, 10, 10).clamp_to([64, 64]), Some(r(60, 60, 4, 4)));
    }

    #[test]
    fn clamp_to_outside_returns_none() {
        assert!(r(70, 0, 10, 10).clamp_to([64, 64]).is_none());
    }

    // ── is_empty ──────────────────────────────────────────────────────────

    #[test]
    fn is_empty_zero_size() {
        assert!(r(0, 0, 0, 5).is_empty());
        assert!(r(0, 0, 5, 0).is_empty());
        assert!(!Rectangle::full([1, 1]).is_empty());
    }
}
