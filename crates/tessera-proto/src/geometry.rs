//! Geometry primitives shared by the server and its clients.

use bytemuck::{Pod, Zeroable};

/// Largest coordinate magnitude a rectangle edge may have.
///
/// Rectangles decoded from the wire are held to this range so that edge,
/// extent and bounding-box arithmetic can never leave `i32`.
pub const COORD_LIMIT: i32 = 1 << 28;

/// A point in screen coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned rectangle.
///
/// Laid out as four native-endian `i32` so it can travel on the wire
/// as-is inside region payloads.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Build a rectangle from its edges (`right`/`bottom` exclusive)
    pub const fn from_edges(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            x: left,
            y: top,
            width: right - left,
            height: bottom - top,
        }
    }

    pub const fn right(&self) -> i32 {
        self.x + self.width
    }

    pub const fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub const fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub const fn top_left(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width as i64 * self.height as i64
        }
    }

    pub const fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Overlap of two rectangles; empty (zero-sized) when they are disjoint
    pub fn intersect(&self, other: &Rect) -> Rect {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            Rect::default()
        } else {
            Rect::from_edges(left, top, right, bottom)
        }
    }

    /// Smallest rectangle covering both
    pub fn united(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect::from_edges(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    pub const fn translated(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Whether every edge lies within `±COORD_LIMIT`
    pub fn is_within_limits(&self) -> bool {
        let limit = COORD_LIMIT as i64;
        let (x, y) = (self.x as i64, self.y as i64);
        [x, y, x + self.width as i64, y + self.height as i64]
            .iter()
            .all(|v| (-limit..=limit).contains(v))
    }

    /// Translate, or `None` if the result would leave the coordinate range
    pub fn checked_translated(&self, dx: i32, dy: i32) -> Option<Rect> {
        let moved = Rect::new(
            self.x.checked_add(dx)?,
            self.y.checked_add(dy)?,
            self.width,
            self.height,
        );
        moved.is_within_limits().then_some(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_disjoint_is_empty() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(10, 0, 10, 10);
        assert!(a.intersect(&b).is_empty());
        assert!(!a.intersects(&b));
    }

    #[test]
    fn intersect_overlap() {
        let a = Rect::new(0, 0, 50, 50);
        let b = Rect::new(25, 0, 50, 50);
        assert_eq!(a.intersect(&b), Rect::new(25, 0, 25, 50));
        assert_eq!(a.united(&b), Rect::new(0, 0, 75, 50));
    }

    #[test]
    fn translation_stays_in_range() {
        let r = Rect::new(10, 10, 10, 10);
        assert_eq!(r.checked_translated(5, -5), Some(Rect::new(15, 5, 10, 10)));
        assert_eq!(r.checked_translated(i32::MAX, 0), None);
        assert_eq!(r.checked_translated(0, COORD_LIMIT), None);
        assert!(!Rect::new(i32::MAX - 1, 0, 10, 10).is_within_limits());
        assert!(Rect::new(-COORD_LIMIT, 0, COORD_LIMIT, 1).is_within_limits());
    }

    #[test]
    fn contains_excludes_far_edges() {
        let r = Rect::new(0, 0, 4, 4);
        assert!(r.contains(0, 0));
        assert!(r.contains(3, 3));
        assert!(!r.contains(4, 0));
        assert!(!r.contains(0, 4));
    }
}
