//! Junction detection and classification.
//!
//! Every pair of perpendicular beams with overlapping bounds contributes a
//! candidate rectangle. Candidates landing within one grid cell of each other
//! cluster into a single junction. The junction's shape is read off the arms:
//! the cardinal directions in which some member beam reaches meaningfully
//! beyond the cluster box. Four arms make a cross, three a T (the stem angle
//! names the absent direction), two an L.

use core_config::Tolerances;
use core_geom::{Bounds, DisjointSets, Obb, Point};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JunctionKind {
    L,
    T,
    C,
}

/// One resolved junction cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntersectionInfo {
    pub bounds: Bounds,
    pub center: Point,
    pub kind: JunctionKind,
    /// For a T: the cardinal angle (0/90/180/270) of the direction with no
    /// arm, i.e. where the stem does not continue.
    pub stem_angle: Option<u16>,
    /// Beam indices participating in this junction, ascending.
    pub members: Vec<usize>,
}

/// Detect junctions over settled beam boxes.
pub fn detect_junctions(obbs: &[Obb], tol: &Tolerances) -> Vec<IntersectionInfo> {
    // Candidate overlap rectangles of perpendicular pairs.
    let mut candidates: Vec<(Bounds, usize, usize)> = Vec::new();
    for i in 0..obbs.len() {
        for j in (i + 1)..obbs.len() {
            if obbs[i].u.dot(obbs[j].u).abs() > 0.1 {
                continue;
            }
            let (bi, bj) = (obbs[i].bounds(), obbs[j].bounds());
            if let Some(overlap) = bi.intersection(&bj) {
                candidates.push((overlap, i, j));
            }
        }
    }
    // Deterministic cluster input order.
    candidates.sort_by(|a, b| {
        let ca = a.0.center();
        let cb = b.0.center();
        (ca.y, ca.x, a.1, a.2)
            .partial_cmp(&(cb.y, cb.x, b.1, b.2))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut sets = DisjointSets::new(candidates.len());
    for i in 0..candidates.len() {
        let ci = candidates[i].0.center();
        for j in (i + 1)..candidates.len() {
            let cj = candidates[j].0.center();
            if (ci.x - cj.x).abs() <= tol.junction_grid && (ci.y - cj.y).abs() <= tol.junction_grid
            {
                sets.union(i, j);
            }
        }
    }

    let mut junctions = Vec::new();
    for group in sets.groups() {
        let mut bounds = candidates[group[0]].0;
        let mut members: Vec<usize> = Vec::new();
        for &g in &group {
            let (rect, i, j) = &candidates[g];
            bounds = bounds.union(rect);
            members.push(*i);
            members.push(*j);
        }
        members.sort_unstable();
        members.dedup();
        if members.len() < 2 {
            continue;
        }
        let arms = arm_directions(&bounds, &members, obbs, tol.junction_arm_tol);
        let kind = match arms.iter().filter(|present| **present).count() {
            4 => JunctionKind::C,
            3 => JunctionKind::T,
            2 => JunctionKind::L,
            _ => continue,
        };
        let stem_angle = match kind {
            JunctionKind::T => arms
                .iter()
                .position(|present| !present)
                .map(|i| CARDINAL_ANGLES[i]),
            _ => None,
        };
        junctions.push(IntersectionInfo {
            bounds,
            center: bounds.center(),
            kind,
            stem_angle,
            members,
        });
    }
    debug!(target: "stage.beam2", junctions = junctions.len(), "junctions_detected");
    junctions
}

/// Cardinal angles in arm order: +x, +y, -x, -y.
const CARDINAL_ANGLES: [u16; 4] = [0, 90, 180, 270];

/// Which cardinal directions carry an arm: some member's bounds reach beyond
/// the cluster box by more than the tolerance.
fn arm_directions(cluster: &Bounds, members: &[usize], obbs: &[Obb], tol: f64) -> [bool; 4] {
    let mut arms = [false; 4];
    for &m in members {
        let b = obbs[m].bounds();
        if b.max_x > cluster.max_x + tol {
            arms[0] = true;
        }
        if b.max_y > cluster.max_y + tol {
            arms[1] = true;
        }
        if b.min_x < cluster.min_x - tol {
            arms[2] = true;
        }
        if b.min_y < cluster.min_y - tol {
            arms[3] = true;
        }
    }
    arms
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect_obb(x0: f64, y0: f64, x1: f64, y1: f64) -> Obb {
        Obb::from_rect_polygon(&[
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ])
        .expect("rectangle")
    }

    #[test]
    fn full_cross_is_classified_c() {
        let h = rect_obb(0.0, 4850.0, 10000.0, 5150.0);
        let v = rect_obb(4850.0, 0.0, 5150.0, 10000.0);
        let junctions = detect_junctions(&[h, v], &Tolerances::default());
        assert_eq!(junctions.len(), 1);
        assert_eq!(junctions[0].kind, JunctionKind::C);
        assert_eq!(junctions[0].stem_angle, None);
        assert_eq!(junctions[0].members, vec![0, 1]);
        let c = junctions[0].center;
        assert!((c.x - 5000.0).abs() < 1e-6);
        assert!((c.y - 5000.0).abs() < 1e-6);
    }

    #[test]
    fn tee_reports_missing_direction() {
        // Head along x, stem rising in +y: no arm at 270.
        let head = rect_obb(0.0, 0.0, 10000.0, 300.0);
        let stem = rect_obb(4900.0, 0.0, 5100.0, 5000.0);
        let junctions = detect_junctions(&[head, stem], &Tolerances::default());
        assert_eq!(junctions.len(), 1);
        assert_eq!(junctions[0].kind, JunctionKind::T);
        assert_eq!(junctions[0].stem_angle, Some(270));
    }

    #[test]
    fn corner_is_classified_l() {
        let a = rect_obb(0.0, 0.0, 5000.0, 300.0);
        let b = rect_obb(4700.0, 0.0, 5000.0, 5000.0);
        let junctions = detect_junctions(&[a, b], &Tolerances::default());
        assert_eq!(junctions.len(), 1);
        assert_eq!(junctions[0].kind, JunctionKind::L);
        assert_eq!(junctions[0].stem_angle, None);
    }

    #[test]
    fn nearby_candidates_cluster_into_one_junction() {
        // Two stems 150 mm apart over the same head: candidate rectangles
        // fall within one grid cell and must fuse.
        let head = rect_obb(0.0, 0.0, 10000.0, 300.0);
        let stem_a = rect_obb(4800.0, 0.0, 4950.0, 5000.0);
        let stem_b = rect_obb(5000.0, 0.0, 5150.0, 5000.0);
        let junctions = detect_junctions(&[head, stem_a, stem_b], &Tolerances::default());
        assert_eq!(junctions.len(), 1);
        assert_eq!(junctions[0].members, vec![0, 1, 2]);
    }

    #[test]
    fn parallel_beams_never_form_junctions() {
        let a = rect_obb(0.0, 0.0, 5000.0, 300.0);
        let b = rect_obb(0.0, 100.0, 5000.0, 400.0);
        assert!(detect_junctions(&[a, b], &Tolerances::default()).is_empty());
    }

    #[test]
    fn distant_overlaps_stay_separate_junctions() {
        let head = rect_obb(0.0, 0.0, 20000.0, 300.0);
        let stem_a = rect_obb(3000.0, 0.0, 3300.0, 5000.0);
        let stem_b = rect_obb(15000.0, 0.0, 15300.0, 5000.0);
        let junctions = detect_junctions(&[head, stem_a, stem_b], &Tolerances::default());
        assert_eq!(junctions.len(), 2);
    }
}
