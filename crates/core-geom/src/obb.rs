//! Oriented bounding boxes.
//!
//! An `Obb` is the canonical beam/wall rectangle: a centre, an orthonormal
//! frame `(u, v)`, a transverse half width, and a longitudinal interval
//! `[min_t, max_t]` measured from the centre along `u`. The interval is
//! usually symmetric (`-half_len .. +half_len`) but cutting and extension
//! produce asymmetric intervals; `normalized` re-centres when a symmetric box
//! is wanted for output.
//!
//! Invariants:
//! * `u` and `v` are unit length with `v = perp(u)`.
//! * `min_t <= max_t`, `half_width >= 0`.
//! * The four corners reconstructed from the fields enclose the source
//!   vertices of any fitting constructor within 1 mm.

use serde::{Deserialize, Serialize};

use crate::{Bounds, Point, Segment, Vec2};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obb {
    pub center: Point,
    pub u: Vec2,
    pub v: Vec2,
    pub half_width: f64,
    pub min_t: f64,
    pub max_t: f64,
}

impl Obb {
    /// Build from an explicit frame. `v` is derived, the interval is kept as
    /// given (it may be asymmetric).
    pub fn from_axis(center: Point, u: Vec2, half_width: f64, min_t: f64, max_t: f64) -> Self {
        Self {
            center,
            u,
            v: u.perp(),
            half_width,
            min_t,
            max_t,
        }
    }

    /// Fit a box to the two long sides of a beam or wall. The longer segment
    /// supplies the axis; the interval spans the union of both projections so
    /// the rectangle covers the full extent of either side.
    pub fn from_side_pair(a: &Segment, b: &Segment) -> Option<Self> {
        let (long, _short) = if a.length() >= b.length() {
            (a, b)
        } else {
            (b, a)
        };
        let u = long.direction()?;
        let v = u.perp();
        let origin = long.start;
        let (a0, a1) = a.project_interval(origin, u);
        let (b0, b1) = b.project_interval(origin, u);
        let t0 = a0.min(b0);
        let t1 = a1.max(b1);
        let s_b = (b.start - origin).dot(v);
        let s_a = (a.start - origin).dot(v);
        let s_mid = (s_a + s_b) / 2.0;
        let half_len = (t1 - t0) / 2.0;
        let center = origin + u * ((t0 + t1) / 2.0) + v * s_mid;
        Some(Self {
            center,
            u,
            v,
            half_width: (s_b - s_a).abs() / 2.0,
            min_t: -half_len,
            max_t: half_len,
        })
    }

    /// Fit a box to a rectangular closed polygon. The longest edge supplies
    /// the axis; every vertex is then enclosed by projection extremes, which
    /// keeps the 1 mm enclosure invariant even for slightly skewed input.
    pub fn from_rect_polygon(points: &[Point]) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        let mut best: Option<(f64, Vec2)> = None;
        for i in 0..points.len() {
            let j = (i + 1) % points.len();
            let edge = points[j] - points[i];
            let len = edge.length();
            if best.as_ref().is_none_or(|(b, _)| len > *b)
                && let Some(dir) = edge.normalized()
            {
                best = Some((len, dir));
            }
        }
        let (_, u) = best?;
        let v = u.perp();
        let origin = points[0];
        let mut t0 = f64::INFINITY;
        let mut t1 = f64::NEG_INFINITY;
        let mut s0 = f64::INFINITY;
        let mut s1 = f64::NEG_INFINITY;
        for p in points {
            let d = *p - origin;
            let t = d.dot(u);
            let s = d.dot(v);
            t0 = t0.min(t);
            t1 = t1.max(t);
            s0 = s0.min(s);
            s1 = s1.max(s);
        }
        let half_len = (t1 - t0) / 2.0;
        let center = origin + u * ((t0 + t1) / 2.0) + v * ((s0 + s1) / 2.0);
        Some(Self {
            center,
            u,
            v,
            half_width: (s1 - s0) / 2.0,
            min_t: -half_len,
            max_t: half_len,
        })
    }

    /// Axis-aligned box over `bounds` with the longer side longitudinal.
    pub fn from_bounds(bounds: &Bounds) -> Self {
        let u = if bounds.width() >= bounds.height() {
            Vec2::new(1.0, 0.0)
        } else {
            Vec2::new(0.0, 1.0)
        };
        let half_len = if bounds.width() >= bounds.height() {
            bounds.width() / 2.0
        } else {
            bounds.height() / 2.0
        };
        let half_width = if bounds.width() >= bounds.height() {
            bounds.height() / 2.0
        } else {
            bounds.width() / 2.0
        };
        Self {
            center: bounds.center(),
            u,
            v: u.perp(),
            half_width,
            min_t: -half_len,
            max_t: half_len,
        }
    }

    pub fn half_len(&self) -> f64 {
        (self.max_t - self.min_t) / 2.0
    }

    pub fn length(&self) -> f64 {
        self.max_t - self.min_t
    }

    pub fn width(&self) -> f64 {
        self.half_width * 2.0
    }

    /// Longitudinal end face centre. `positive` selects the `max_t` end.
    pub fn end_point(&self, positive: bool) -> Point {
        let t = if positive { self.max_t } else { self.min_t };
        self.center + self.u * t
    }

    /// Local coordinates of `p`: `.0` along `u` from the centre, `.1` along
    /// `v`.
    pub fn local(&self, p: Point) -> (f64, f64) {
        let d = p - self.center;
        (d.dot(self.u), d.dot(self.v))
    }

    pub fn point_at(&self, t: f64, s: f64) -> Point {
        self.center + self.u * t + self.v * s
    }

    pub fn contains(&self, p: Point, tol: f64) -> bool {
        let (t, s) = self.local(p);
        t >= self.min_t - tol
            && t <= self.max_t + tol
            && s >= -self.half_width - tol
            && s <= self.half_width + tol
    }

    pub fn corners(&self) -> [Point; 4] {
        [
            self.point_at(self.min_t, -self.half_width),
            self.point_at(self.max_t, -self.half_width),
            self.point_at(self.max_t, self.half_width),
            self.point_at(self.min_t, self.half_width),
        ]
    }

    pub fn polygon(&self) -> Vec<Point> {
        self.corners().to_vec()
    }

    pub fn bounds(&self) -> Bounds {
        let c = self.corners();
        Bounds::from_points(c).unwrap_or(Bounds::from_point(self.center))
    }

    /// Same frame, different longitudinal interval.
    pub fn with_interval(&self, min_t: f64, max_t: f64) -> Self {
        Self {
            min_t,
            max_t,
            ..*self
        }
    }

    /// Re-centre so the interval becomes symmetric around the new centre.
    pub fn normalized(&self) -> Self {
        let mid = (self.min_t + self.max_t) / 2.0;
        let half = self.half_len();
        Self {
            center: self.center + self.u * mid,
            min_t: -half,
            max_t: half,
            ..*self
        }
    }

    pub fn translated(&self, vec: Vec2) -> Self {
        Self {
            center: self.center + vec,
            ..*self
        }
    }

    /// `[t, s]` ranges of an arbitrary point set in this box's local frame.
    pub fn project_points(&self, points: &[Point]) -> ((f64, f64), (f64, f64)) {
        let mut t0 = f64::INFINITY;
        let mut t1 = f64::NEG_INFINITY;
        let mut s0 = f64::INFINITY;
        let mut s1 = f64::NEG_INFINITY;
        for p in points {
            let (t, s) = self.local(*p);
            t0 = t0.min(t);
            t1 = t1.max(t);
            s0 = s0.min(s);
            s1 = s1.max(s);
        }
        ((t0, t1), (s0, s1))
    }

    /// Slab intersection of a ray with this box. Returns `(enter, exit)` ray
    /// parameters when the ray meets the box ahead of or at its origin.
    pub fn ray_hit(&self, origin: Point, dir: Vec2) -> Option<(f64, f64)> {
        let (t0, s0) = self.local(origin);
        let dt = dir.dot(self.u);
        let ds = dir.dot(self.v);
        let slab = |min: f64, max: f64, o: f64, d: f64| -> Option<(f64, f64)> {
            if d.abs() <= f64::EPSILON {
                if o < min || o > max {
                    return None;
                }
                return Some((f64::NEG_INFINITY, f64::INFINITY));
            }
            let a = (min - o) / d;
            let b = (max - o) / d;
            Some((a.min(b), a.max(b)))
        };
        let (a0, a1) = slab(self.min_t, self.max_t, t0, dt)?;
        let (b0, b1) = slab(-self.half_width, self.half_width, s0, ds)?;
        let enter = a0.max(b0);
        let exit = a1.min(b1);
        if exit < enter || exit < 0.0 {
            return None;
        }
        Some((enter, exit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Vec<Point> {
        vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ]
    }

    #[test]
    fn fit_encloses_source_vertices_within_1mm() {
        let poly = rect(0.0, 0.0, 10000.0, 300.0);
        let obb = Obb::from_rect_polygon(&poly).unwrap();
        for p in &poly {
            assert!(obb.contains(*p, 1.0), "vertex {p:?} escaped the fit");
        }
        assert!((obb.length() - 10000.0).abs() < 1e-6);
        assert!((obb.width() - 300.0).abs() < 1e-6);
    }

    #[test]
    fn fit_of_rotated_rect_keeps_extents() {
        // 45 degree rectangle, 1000 x 100.
        let c = (45f64).to_radians().cos();
        let u = Vec2::new(c, c);
        let v = u.perp();
        let o = Point::new(500.0, 500.0);
        let poly = vec![
            o + u * -500.0 + v * -50.0,
            o + u * 500.0 + v * -50.0,
            o + u * 500.0 + v * 50.0,
            o + u * -500.0 + v * 50.0,
        ];
        let obb = Obb::from_rect_polygon(&poly).unwrap();
        assert!((obb.length() - 1000.0).abs() < 1e-6);
        assert!((obb.width() - 100.0).abs() < 1e-6);
        for p in &poly {
            assert!(obb.contains(*p, 1.0));
        }
    }

    #[test]
    fn side_pair_spans_union_of_projections() {
        let a = Segment::new(Point::new(0.0, 0.0), Point::new(1000.0, 0.0));
        let b = Segment::new(Point::new(100.0, 200.0), Point::new(1200.0, 200.0));
        let obb = Obb::from_side_pair(&a, &b).unwrap();
        assert!((obb.width() - 200.0).abs() < 1e-9);
        assert!((obb.length() - 1200.0).abs() < 1e-9);
        assert!(obb.contains(Point::new(0.0, 0.0), 1.0));
        assert!(obb.contains(Point::new(1200.0, 200.0), 1.0));
    }

    #[test]
    fn interval_invariant_holds_after_cut_and_normalize() {
        let obb = Obb::from_rect_polygon(&rect(0.0, 0.0, 1000.0, 100.0)).unwrap();
        let cut = obb.with_interval(100.0, 400.0);
        assert!((cut.length() - 300.0).abs() < 1e-9);
        let norm = cut.normalized();
        assert!((norm.min_t + norm.half_len()).abs() < 1e-9);
        assert!((norm.length() - 300.0).abs() < 1e-9);
        // The normalized box covers the same region.
        assert!(norm.contains(cut.point_at(100.0, 0.0), 1e-6));
        assert!(norm.contains(cut.point_at(400.0, 0.0), 1e-6));
    }

    #[test]
    fn ray_hits_perpendicular_box_ahead() {
        let target = Obb::from_rect_polygon(&rect(4900.0, 300.0, 5100.0, 5000.0)).unwrap();
        // Ray travelling +y from below the box.
        let (enter, exit) = target
            .ray_hit(Point::new(5000.0, 0.0), Vec2::new(0.0, 1.0))
            .unwrap();
        assert!((enter - 300.0).abs() < 1e-9);
        assert!((exit - 5000.0).abs() < 1e-9);
    }

    #[test]
    fn ray_miss_returns_none() {
        let target = Obb::from_rect_polygon(&rect(0.0, 0.0, 100.0, 100.0)).unwrap();
        assert!(
            target
                .ray_hit(Point::new(500.0, 500.0), Vec2::new(1.0, 0.0))
                .is_none()
        );
    }
}
