//! Planar geometry primitives shared by the grid and mesh models.
//!
//! Everything here is a pure function over [`DVec2`]. Orientation tests use
//! the sign of the 2D cross product: positive means counter-clockwise.

use glam::DVec2;

/// Tolerance used when classifying a point against a triangle's edges.
///
/// Barycentric weights down to `-POINT_EPSILON` still count as inside, so
/// points on a shared edge resolve to one of the two neighbours.
pub const POINT_EPSILON: f64 = 1e-12;

/// Axis-aligned extent in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    /// Western boundary.
    pub left: f64,
    /// Eastern boundary.
    pub right: f64,
    /// Southern boundary.
    pub bottom: f64,
    /// Northern boundary.
    pub top: f64,
}

impl Extent {
    /// Create a new extent.
    pub fn new(left: f64, right: f64, bottom: f64, top: f64) -> Self {
        Self {
            left,
            right,
            bottom,
            top,
        }
    }

    /// An inverted extent that any [`Extent::grow`] call replaces.
    pub fn empty() -> Self {
        Self {
            left: f64::INFINITY,
            right: f64::NEG_INFINITY,
            bottom: f64::INFINITY,
            top: f64::NEG_INFINITY,
        }
    }

    /// Returns true if no point has been added to this extent.
    pub fn is_empty(&self) -> bool {
        self.left > self.right || self.bottom > self.top
    }

    /// Expand the extent to include `p`.
    pub fn grow(&mut self, p: DVec2) {
        self.left = self.left.min(p.x);
        self.right = self.right.max(p.x);
        self.bottom = self.bottom.min(p.y);
        self.top = self.top.max(p.y);
    }

    /// Extent of a set of points.
    pub fn from_points<I: IntoIterator<Item = DVec2>>(points: I) -> Self {
        let mut extent = Self::empty();
        for p in points {
            extent.grow(p);
        }
        extent
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    /// Inclusive containment test.
    pub fn contains(&self, p: DVec2) -> bool {
        p.x >= self.left && p.x <= self.right && p.y >= self.bottom && p.y <= self.top
    }

    /// Check whether two extents share any area (edges included).
    pub fn overlaps(&self, other: &Extent) -> bool {
        self.left <= other.right
            && self.right >= other.left
            && self.bottom <= other.top
            && self.top >= other.bottom
    }
}

impl Default for Extent {
    fn default() -> Self {
        Extent::empty()
    }
}

/// 2D cross product of `a` and `b`.
#[inline]
pub fn cross(a: DVec2, b: DVec2) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Twice the signed area of triangle `abc`; positive when counter-clockwise.
#[inline]
pub fn signed_area2(a: DVec2, b: DVec2, c: DVec2) -> f64 {
    cross(b - a, c - a)
}

/// Barycentric weights of `p` with respect to triangle `abc`.
///
/// Returns `None` for a degenerate (zero-area) triangle. The weights sum to 1
/// and are all non-negative when `p` lies inside the triangle. When `p` equals
/// one of the corners, that corner's weight is exactly 1.
pub fn barycentric(p: DVec2, a: DVec2, b: DVec2, c: DVec2) -> Option<[f64; 3]> {
    let d = signed_area2(a, b, c);
    if d == 0.0 {
        return None;
    }
    let wa = signed_area2(p, b, c) / d;
    let wb = signed_area2(a, p, c) / d;
    let wc = signed_area2(a, b, p) / d;
    Some([wa, wb, wc])
}

/// Inclusive point-in-triangle test, independent of winding.
pub fn point_in_triangle(p: DVec2, a: DVec2, b: DVec2, c: DVec2) -> bool {
    match barycentric(p, a, b, c) {
        Some(w) => w.iter().all(|&x| x >= -POINT_EPSILON),
        None => false,
    }
}

fn on_segment(p: DVec2, q: DVec2, r: DVec2) -> bool {
    q.x >= p.x.min(r.x) && q.x <= p.x.max(r.x) && q.y >= p.y.min(r.y) && q.y <= p.y.max(r.y)
}

fn orientation(a: DVec2, b: DVec2, c: DVec2) -> i8 {
    let v = signed_area2(a, b, c);
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

/// Check whether segments `p1-p2` and `q1-q2` intersect.
///
/// Touching endpoints and collinear overlap count as intersections.
pub fn segments_intersect(p1: DVec2, p2: DVec2, q1: DVec2, q2: DVec2) -> bool {
    let o1 = orientation(p1, p2, q1);
    let o2 = orientation(p1, p2, q2);
    let o3 = orientation(q1, q2, p1);
    let o4 = orientation(q1, q2, p2);

    if o1 != o2 && o3 != o4 {
        return true;
    }

    (o1 == 0 && on_segment(p1, q1, p2))
        || (o2 == 0 && on_segment(p1, q2, p2))
        || (o3 == 0 && on_segment(q1, p1, q2))
        || (o4 == 0 && on_segment(q1, p2, q2))
}
