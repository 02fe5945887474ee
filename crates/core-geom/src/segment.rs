//! Line segments and the projection helpers the pair scanners are built on.

use serde::{Deserialize, Serialize};

use crate::{Bounds, Point, Vec2};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: Point,
    pub end: Point,
}

impl Segment {
    pub const fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> f64 {
        self.start.distance(self.end)
    }

    pub fn midpoint(&self) -> Point {
        self.start.midpoint(self.end)
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.start, self.end)
    }

    /// Unit direction, `None` for a zero-length segment.
    pub fn direction(&self) -> Option<Vec2> {
        (self.end - self.start).normalized()
    }

    /// Signed parameter range of both endpoints along `dir` measured from
    /// `origin`, ordered so `.0 <= .1`.
    pub fn project_interval(&self, origin: Point, dir: Vec2) -> (f64, f64) {
        let a = (self.start - origin).dot(dir);
        let b = (self.end - origin).dot(dir);
        (a.min(b), a.max(b))
    }

    /// Perpendicular distance from `p` to the infinite line through this
    /// segment. Falls back to point distance for degenerate segments.
    pub fn line_distance(&self, p: Point) -> f64 {
        match self.direction() {
            Some(dir) => (p - self.start).dot(dir.perp()).abs(),
            None => self.start.distance(p),
        }
    }

    /// True when the carried line is within `tol` of horizontal, measured as
    /// total rise over the whole segment.
    pub fn near_horizontal(&self, tol: f64) -> bool {
        (self.end.y - self.start.y).abs() < tol
    }

    pub fn near_vertical(&self, tol: f64) -> bool {
        (self.end.x - self.start.x).abs() < tol
    }

    /// Intersection point of two segments, extended by `slack` at both ends so
    /// that grid lines stopping just short of each other still cross.
    pub fn intersect(&self, other: &Segment, slack: f64) -> Option<Point> {
        let d1 = self.end - self.start;
        let d2 = other.end - other.start;
        let denom = d1.cross(d2);
        if denom.abs() <= f64::EPSILON {
            return None;
        }
        let w = other.start - self.start;
        let t = w.cross(d2) / denom;
        let s = w.cross(d1) / denom;
        let len1 = d1.length();
        let len2 = d2.length();
        let t_slack = if len1 > 0.0 { slack / len1 } else { 0.0 };
        let s_slack = if len2 > 0.0 { slack / len2 } else { 0.0 };
        if t < -t_slack || t > 1.0 + t_slack || s < -s_slack || s > 1.0 + s_slack {
            return None;
        }
        Some(self.start + d1 * t)
    }

    pub fn translated(&self, v: Vec2) -> Self {
        Self::new(self.start + v, self.end + v)
    }
}

/// Longitudinal overlap length of two segments projected onto the first
/// segment's own direction. Zero for degenerate inputs.
pub fn longitudinal_overlap(a: &Segment, b: &Segment) -> f64 {
    let Some(dir) = a.direction() else {
        return 0.0;
    };
    let ia = a.project_interval(a.start, dir);
    let ib = b.project_interval(a.start, dir);
    (ia.1.min(ib.1) - ia.0.max(ib.0)).max(0.0)
}
