//! Closed 1-D intervals on a beam's longitudinal axis.
//!
//! Obstacle cutting works entirely in these scalar coordinates: the rectangle
//! is reduced to its `[min_t, max_t]` interval, obstacle footprints become
//! hole intervals, and the survivors are mapped back to sub-rectangles.

/// Merge overlapping or touching intervals. Input order is irrelevant; output
/// is sorted and disjoint.
pub fn merge(mut intervals: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    intervals.retain(|iv| iv.1 > iv.0);
    intervals.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut out: Vec<(f64, f64)> = Vec::with_capacity(intervals.len());
    for iv in intervals {
        match out.last_mut() {
            Some(last) if iv.0 <= last.1 => last.1 = last.1.max(iv.1),
            _ => out.push(iv),
        }
    }
    out
}

/// Subtract `holes` from `span`, dropping remainders shorter than `min_len`.
pub fn subtract(span: (f64, f64), holes: &[(f64, f64)], min_len: f64) -> Vec<(f64, f64)> {
    let holes = merge(holes.to_vec());
    let mut out = Vec::new();
    let mut cursor = span.0;
    for (h0, h1) in holes {
        if h1 <= cursor || h0 >= span.1 {
            continue;
        }
        if h0 > cursor {
            out.push((cursor, h0.min(span.1)));
        }
        cursor = cursor.max(h1);
    }
    if cursor < span.1 {
        out.push((cursor, span.1));
    }
    out.retain(|iv| iv.1 - iv.0 >= min_len);
    out
}

/// Overlap length of two intervals, zero when disjoint.
pub fn overlap(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.1.min(b.1) - a.0.max(b.0)).max(0.0)
}

/// Positive gap between two disjoint intervals, zero when they touch or
/// overlap.
pub fn gap(a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0.max(b.0) - a.1.min(b.1)).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtract_middle_hole_splits() {
        let parts = subtract((0.0, 5000.0), &[(2250.0, 2750.0)], 10.0);
        assert_eq!(parts, vec![(0.0, 2250.0), (2750.0, 5000.0)]);
    }

    #[test]
    fn subtract_edge_holes_trim() {
        let parts = subtract((0.0, 100.0), &[(-10.0, 20.0), (90.0, 120.0)], 10.0);
        assert_eq!(parts, vec![(20.0, 90.0)]);
    }

    #[test]
    fn subtract_total_consume() {
        assert!(subtract((0.0, 100.0), &[(-5.0, 105.0)], 10.0).is_empty());
    }

    #[test]
    fn short_remainders_dropped() {
        let parts = subtract((0.0, 100.0), &[(5.0, 95.0)], 10.0);
        assert!(parts.is_empty());
    }

    #[test]
    fn merge_joins_touching() {
        let merged = merge(vec![(10.0, 20.0), (0.0, 10.0), (30.0, 40.0)]);
        assert_eq!(merged, vec![(0.0, 20.0), (30.0, 40.0)]);
    }

    #[test]
    fn gap_and_overlap_are_complementary() {
        assert_eq!(gap((0.0, 10.0), (15.0, 20.0)), 5.0);
        assert_eq!(gap((0.0, 10.0), (5.0, 20.0)), 0.0);
        assert_eq!(overlap((0.0, 10.0), (5.0, 20.0)), 5.0);
    }
}
