//! Bulged polyline edges.
//!
//! CAD polylines encode arc segments as a bulge factor per edge: the tangent
//! of a quarter of the included angle, positive when the arc sweeps
//! counter-clockwise from start to end. Analysis works on straight geometry,
//! so bulged edges are flattened into short chords before anything else sees
//! them.

use crate::Point;

/// Chord count per quarter turn when flattening.
const CHORDS_PER_QUARTER: f64 = 4.0;

/// Intermediate points of the arc described by `start`, `end`, and `bulge`,
/// excluding both endpoints. Empty for straight or degenerate edges.
pub fn flatten(start: Point, end: Point, bulge: f64) -> Vec<Point> {
    if bulge.abs() < 1e-9 {
        return Vec::new();
    }
    let chord = end - start;
    let chord_len = chord.length();
    if chord_len < 1e-9 {
        return Vec::new();
    }
    let Some(dir) = chord.normalized() else {
        return Vec::new();
    };
    // Sagitta and radius from the bulge factor.
    let sagitta = bulge.abs() * chord_len / 2.0;
    let radius = ((chord_len / 2.0) * (chord_len / 2.0) + sagitta * sagitta) / (2.0 * sagitta);
    let sweep = 4.0 * bulge.atan();

    // A counter-clockwise sweep puts the centre on the chord's left normal
    // (and the arc itself on the right); a clockwise sweep mirrors that.
    let mid = start.midpoint(end);
    let center = mid + dir.perp() * (bulge.signum() * (radius - sagitta));

    let start_angle = (start.y - center.y).atan2(start.x - center.x);
    let steps = ((sweep.abs() / std::f64::consts::FRAC_PI_2) * CHORDS_PER_QUARTER)
        .ceil()
        .max(1.0) as usize;
    let mut out = Vec::with_capacity(steps.saturating_sub(1));
    for k in 1..steps {
        let angle = start_angle + sweep * (k as f64) / (steps as f64);
        out.push(Point::new(
            center.x + radius * angle.cos(),
            center.y + radius * angle.sin(),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_edge_yields_nothing() {
        assert!(flatten(Point::new(0.0, 0.0), Point::new(100.0, 0.0), 0.0).is_empty());
    }

    #[test]
    fn ccw_semicircle_sags_below_a_rightward_chord() {
        // bulge = 1 encodes a half circle; chord 200 -> radius 100. Sweeping
        // counter-clockwise from the left endpoint passes under the chord.
        let pts = flatten(Point::new(0.0, 0.0), Point::new(200.0, 0.0), 1.0);
        assert!(!pts.is_empty());
        let low = pts.iter().map(|p| p.y).fold(f64::INFINITY, f64::min);
        assert!((low + 100.0).abs() < 2.0, "lowest {low} should be near -100");
        // Every sample sits on the circle around the chord midpoint.
        for p in &pts {
            let r = p.distance(Point::new(100.0, 0.0));
            assert!((r - 100.0).abs() < 1e-6);
        }
    }

    #[test]
    fn cw_semicircle_rises_above() {
        let pts = flatten(Point::new(0.0, 0.0), Point::new(200.0, 0.0), -1.0);
        assert!(pts.iter().all(|p| p.y > 0.0));
    }

    #[test]
    fn quarter_arc_lies_on_its_circle() {
        // bulge = tan(pi/8) encodes a quarter circle; for this chord the
        // centre lands at (0, 100) with radius 100.
        let b = (std::f64::consts::PI / 8.0).tan();
        let pts = flatten(Point::new(0.0, 0.0), Point::new(100.0, 100.0), b);
        assert!(!pts.is_empty());
        for p in &pts {
            let r = p.distance(Point::new(0.0, 100.0));
            assert!((r - 100.0).abs() < 1e-6);
        }
    }

    #[test]
    fn endpoints_are_not_emitted() {
        let pts = flatten(Point::new(0.0, 0.0), Point::new(200.0, 0.0), 1.0);
        for p in &pts {
            assert!(p.distance(Point::new(0.0, 0.0)) > 1.0);
            assert!(p.distance(Point::new(200.0, 0.0)) > 1.0);
        }
    }
}
