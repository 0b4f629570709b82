//! Region Algebra
//!
//! A [`Region`] is a set of pixels stored as non-overlapping rectangles in
//! y-x banded form: rectangles are grouped into horizontal bands sorted top
//! to bottom, spans inside a band are sorted left to right and never touch,
//! and vertically adjacent bands with identical spans are merged. The banded
//! form is canonical, so two regions covering the same pixels compare equal.
//!
//! All operations return new values; nothing is mutated through a shared
//! reference.

use crate::geometry::{Point, Rect};

/// Horizontal span `[start, end)` inside a band
type Span = (i32, i32);

/// A set of pixels described by canonical banded rectangles
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    /// The empty region
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(rect: Rect) -> Self {
        if rect.is_empty() {
            Self::new()
        } else {
            Self { rects: vec![rect] }
        }
    }

    /// Normalise an arbitrary (possibly overlapping) rectangle list
    pub fn from_rects(rects: &[Rect]) -> Self {
        Self {
            rects: combine(rects, &[], |a, _| a),
        }
    }

    /// Canonical rectangles, top-to-bottom then left-to-right
    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    /// Tight envelope of every rectangle; empty for the empty region
    pub fn bounding_rect(&self) -> Rect {
        self.rects
            .iter()
            .fold(Rect::default(), |acc, r| acc.united(r))
    }

    /// Number of pixels covered
    pub fn area(&self) -> i64 {
        self.rects.iter().map(Rect::area).sum()
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.rects.iter().any(|r| r.contains(x, y))
    }

    pub fn contains_point(&self, p: Point) -> bool {
        self.contains(p.x, p.y)
    }

    /// True when every pixel of `other` is also in `self`
    pub fn contains_region(&self, other: &Region) -> bool {
        other.subtract(self).is_empty()
    }

    pub fn intersects(&self, other: &Region) -> bool {
        if !self.bounding_rect().intersects(&other.bounding_rect()) {
            return false;
        }
        !self.intersect(other).is_empty()
    }

    pub fn union(&self, other: &Region) -> Region {
        if self.is_empty() {
            return other.clone();
        }
        if other.is_empty() {
            return self.clone();
        }
        Self {
            rects: combine(&self.rects, &other.rects, |a, b| a || b),
        }
    }

    pub fn intersect(&self, other: &Region) -> Region {
        if self.is_empty() || other.is_empty() {
            return Region::new();
        }
        if !self.bounding_rect().intersects(&other.bounding_rect()) {
            return Region::new();
        }
        Self {
            rects: combine(&self.rects, &other.rects, |a, b| a && b),
        }
    }

    pub fn intersect_rect(&self, rect: Rect) -> Region {
        self.intersect(&Region::from_rect(rect))
    }

    /// Pixels of `self` that are not in `other`
    pub fn subtract(&self, other: &Region) -> Region {
        if self.is_empty() || other.is_empty() {
            return self.clone();
        }
        if !self.bounding_rect().intersects(&other.bounding_rect()) {
            return self.clone();
        }
        Self {
            rects: combine(&self.rects, &other.rects, |a, b| a && !b),
        }
    }

    /// Pixels in exactly one of the two regions
    pub fn xor(&self, other: &Region) -> Region {
        Self {
            rects: combine(&self.rects, &other.rects, |a, b| a != b),
        }
    }

    pub fn translated(&self, dx: i32, dy: i32) -> Region {
        Self {
            rects: self.rects.iter().map(|r| r.translated(dx, dy)).collect(),
        }
    }

    /// Translate, or `None` if any rect would leave the coordinate range
    pub fn checked_translated(&self, dx: i32, dy: i32) -> Option<Region> {
        let rects = self
            .rects
            .iter()
            .map(|r| r.checked_translated(dx, dy))
            .collect::<Option<Vec<_>>>()?;
        Some(Self { rects })
    }
}

impl From<Rect> for Region {
    fn from(rect: Rect) -> Self {
        Region::from_rect(rect)
    }
}

/// Sweep both rectangle lists band by band and keep the pixels for which
/// `keep(in_a, in_b)` holds. Output is canonical regardless of input shape.
fn combine(a: &[Rect], b: &[Rect], keep: impl Fn(bool, bool) -> bool) -> Vec<Rect> {
    let mut edges: Vec<i32> = a
        .iter()
        .chain(b)
        .filter(|r| !r.is_empty())
        .flat_map(|r| [r.y, r.bottom()])
        .collect();
    edges.sort_unstable();
    edges.dedup();

    let mut bands: Vec<(i32, i32, Vec<Span>)> = Vec::new();
    for pair in edges.windows(2) {
        let (top, bottom) = (pair[0], pair[1]);
        let spans_a = spans_in_band(a, top, bottom);
        let spans_b = spans_in_band(b, top, bottom);
        let spans = merge_spans(&spans_a, &spans_b, &keep);
        if spans.is_empty() {
            continue;
        }
        match bands.last_mut() {
            Some(last) if last.1 == top && last.2 == spans => last.1 = bottom,
            _ => bands.push((top, bottom, spans)),
        }
    }

    bands
        .into_iter()
        .flat_map(|(top, bottom, spans)| {
            spans
                .into_iter()
                .map(move |(left, right)| Rect::from_edges(left, top, right, bottom))
        })
        .collect()
}

/// Sorted, merged x-spans of every rectangle covering the band `[top, bottom)`.
/// Band edges include every rectangle edge, so a rectangle either covers the
/// whole band or none of it.
fn spans_in_band(rects: &[Rect], top: i32, bottom: i32) -> Vec<Span> {
    let mut spans: Vec<Span> = rects
        .iter()
        .filter(|r| !r.is_empty() && r.y <= top && r.bottom() >= bottom)
        .map(|r| (r.x, r.right()))
        .collect();
    spans.sort_unstable();

    let mut merged: Vec<Span> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

fn merge_spans(a: &[Span], b: &[Span], keep: &impl Fn(bool, bool) -> bool) -> Vec<Span> {
    let mut edges: Vec<i32> = a.iter().chain(b).flat_map(|s| [s.0, s.1]).collect();
    edges.sort_unstable();
    edges.dedup();

    let mut out: Vec<Span> = Vec::new();
    let (mut ia, mut ib) = (0, 0);
    for pair in edges.windows(2) {
        let (left, right) = (pair[0], pair[1]);
        while ia < a.len() && a[ia].1 <= left {
            ia += 1;
        }
        while ib < b.len() && b[ib].1 <= left {
            ib += 1;
        }
        let in_a = ia < a.len() && a[ia].0 <= left;
        let in_b = ib < b.len() && b[ib].0 <= left;
        if keep(in_a, in_b) {
            match out.last_mut() {
                Some(last) if last.1 == left => last.1 = right,
                _ => out.push((left, right)),
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic generator so failures are reproducible
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u32 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (self.0 >> 33) as u32
        }

        fn range(&mut self, n: u32) -> i32 {
            (self.next() % n) as i32
        }

        fn region(&mut self) -> Region {
            let count = 1 + self.range(5) as usize;
            let rects: Vec<Rect> = (0..count)
                .map(|_| Rect::new(self.range(24), self.range(24), 1 + self.range(12), 1 + self.range(12)))
                .collect();
            Region::from_rects(&rects)
        }
    }

    fn assert_canonical(r: &Region) {
        for pair in r.rects().windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert!(!a.intersects(&b), "overlapping rects {:?} {:?}", a, b);
            if a.y == b.y {
                assert_eq!(a.bottom(), b.bottom());
                assert!(a.right() < b.x, "touching spans were not merged");
            } else {
                assert!(a.bottom() <= b.y);
            }
        }
    }

    #[test]
    fn subtract_self_is_empty() {
        let mut rng = Lcg(7);
        for _ in 0..200 {
            let a = rng.region();
            assert!(a.subtract(&a).is_empty());
        }
    }

    #[test]
    fn union_absorbs_intersection() {
        let mut rng = Lcg(11);
        for _ in 0..200 {
            let a = rng.region();
            let b = rng.region();
            assert_eq!(a.union(&a.intersect(&b)), a);
        }
    }

    #[test]
    fn union_and_intersect_commute() {
        let mut rng = Lcg(13);
        for _ in 0..200 {
            let a = rng.region();
            let b = rng.region();
            assert_eq!(a.union(&b), b.union(&a));
            assert_eq!(a.intersect(&b), b.intersect(&a));
            let u = a.union(&b);
            assert!(u.contains_region(&a));
            assert!(u.contains_region(&b));
            assert_canonical(&u);
        }
    }

    #[test]
    fn union_is_associative() {
        let mut rng = Lcg(17);
        for _ in 0..100 {
            let (a, b, c) = (rng.region(), rng.region(), rng.region());
            assert_eq!(a.union(&b).union(&c), a.union(&b.union(&c)));
            assert_eq!(a.intersect(&b).intersect(&c), a.intersect(&b.intersect(&c)));
        }
    }

    #[test]
    fn subtract_is_not_commutative() {
        let a = Region::from_rect(Rect::new(0, 0, 10, 10));
        let b = Region::from_rect(Rect::new(5, 0, 10, 10));
        assert_ne!(a.subtract(&b), b.subtract(&a));
        assert_eq!(a.subtract(&b), Region::from_rect(Rect::new(0, 0, 5, 10)));
    }

    #[test]
    fn operations_match_pointwise_membership() {
        let mut rng = Lcg(23);
        for _ in 0..50 {
            let a = rng.region();
            let b = rng.region();
            let union = a.union(&b);
            let inter = a.intersect(&b);
            let diff = a.subtract(&b);
            let xor = a.xor(&b);
            for y in -1..38 {
                for x in -1..38 {
                    let (in_a, in_b) = (a.contains(x, y), b.contains(x, y));
                    assert_eq!(union.contains(x, y), in_a || in_b);
                    assert_eq!(inter.contains(x, y), in_a && in_b);
                    assert_eq!(diff.contains(x, y), in_a && !in_b);
                    assert_eq!(xor.contains(x, y), in_a != in_b);
                }
            }
        }
    }

    #[test]
    fn adjacent_rects_coalesce() {
        let r = Region::from_rects(&[Rect::new(0, 0, 10, 5), Rect::new(0, 5, 10, 5)]);
        assert_eq!(r.rects(), &[Rect::new(0, 0, 10, 10)]);

        let r = Region::from_rects(&[Rect::new(0, 0, 5, 10), Rect::new(5, 0, 5, 10)]);
        assert_eq!(r.rects(), &[Rect::new(0, 0, 10, 10)]);
    }

    #[test]
    fn bounding_rect_is_tight() {
        let r = Region::from_rects(&[Rect::new(2, 3, 4, 4), Rect::new(20, 30, 1, 1)]);
        assert_eq!(r.bounding_rect(), Rect::from_edges(2, 3, 21, 31));
        assert!(Region::new().bounding_rect().is_empty());
    }

    #[test]
    fn translate_moves_every_rect() {
        let r = Region::from_rects(&[Rect::new(0, 0, 4, 4), Rect::new(10, 0, 4, 4)]);
        let moved = r.translated(5, -2);
        assert!(moved.contains(5, -2));
        assert!(moved.contains(15, 1));
        assert!(!moved.contains(0, 0));
        assert_eq!(moved.area(), r.area());
        assert_eq!(r.checked_translated(5, -2), Some(moved));
        assert_eq!(r.checked_translated(i32::MAX, 0), None);
    }

    #[test]
    fn empty_rects_are_ignored() {
        let r = Region::from_rects(&[Rect::new(0, 0, 0, 10), Rect::new(3, 3, -1, 4)]);
        assert!(r.is_empty());
    }
}
