//! Beam Step 2: merge, extend, and detect junctions.
//!
//! Order matters and is fixed:
//! 1. Collinear merge across obstacle gaps. Fragments separated by a column
//!    or wall re-join only when an obstacle actually sits in the gap, and
//!    gaps beyond the probe width additionally need a perpendicular beam
//!    crossing the gap midpoint. Free gaps stay split; attribute propagation
//!    bridges them later without inventing geometry.
//! 2. End extension. Unanchored ends ray-cast onto perpendicular beams and
//!    grow through the first target, clamped by the nearest obstacle face,
//!    the containing viewport, and the global search budget.
//! 3. Parallel merge of overlapping duplicates.
//! 4. Junction detection over the settled geometry.

use core_config::Tolerances;
use core_geom::{Bounds, Obb, interval};
use core_support::Obstacle;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Beam, IntersectionInfo, RawBeam, junction};

/// Gap length above which the collinear merge demands a crossing beam.
const MERGE_PROBE: f64 = 5.0;

/// The settled Step-2 geometry.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BeamGeometry {
    pub beams: Vec<Beam>,
    pub junctions: Vec<IntersectionInfo>,
}

/// Run Step 2 over the Step-1 candidates.
pub fn build_geometry(
    raw: &[RawBeam],
    obstacles: &[Obstacle],
    viewport_bounds: &[Bounds],
    vocabulary: &[f64],
    tol: &Tolerances,
) -> BeamGeometry {
    let mut obbs: Vec<Obb> = raw.iter().map(|b| b.obb.normalized()).collect();

    merge_collinear(&mut obbs, obstacles, tol);

    let budget = vocabulary
        .iter()
        .fold(tol.extension_floor, |acc, w| acc.max(*w));
    let anchored: Vec<bool> = obbs
        .iter()
        .map(|obb| is_anchored(obb, obstacles, tol.anchor_probe))
        .collect();
    extend_ends(&mut obbs, &anchored, obstacles, viewport_bounds, budget);

    merge_parallel(&mut obbs, tol);

    obbs.retain(|o| o.length() >= tol.min_fragment_len);
    let obbs: Vec<Obb> = obbs.into_iter().map(|o| o.normalized()).collect();

    let junctions = junction::detect_junctions(&obbs, tol);
    let mut beams: Vec<Beam> = obbs
        .into_iter()
        .enumerate()
        .map(|(index, obb)| Beam {
            index,
            obb,
            anchored: is_anchored(&obb, obstacles, tol.anchor_probe),
            junctions: Vec::new(),
        })
        .collect();
    for (j, junction) in junctions.iter().enumerate() {
        for &member in &junction.members {
            beams[member].junctions.push(j);
        }
    }
    info!(
        target: "stage.beam2",
        beams = beams.len(),
        junctions = junctions.len(),
        "geometry_built"
    );
    BeamGeometry { beams, junctions }
}

/// Both longitudinal endpoints, probed slightly outward, sit inside some
/// obstacle bounds.
pub fn is_anchored(obb: &Obb, obstacles: &[Obstacle], probe: f64) -> bool {
    let ends = [
        obb.point_at(obb.max_t + probe, 0.0),
        obb.point_at(obb.min_t - probe, 0.0),
    ];
    ends.iter()
        .all(|p| obstacles.iter().any(|o| o.bounds.contains(*p)))
}

/// Collinear merge across obstacle gaps, iterated to a fixed point.
fn merge_collinear(obbs: &mut Vec<Obb>, obstacles: &[Obstacle], tol: &Tolerances) {
    loop {
        let Some((i, j, joined)) = find_collinear_pair(obbs, obstacles, tol) else {
            return;
        };
        obbs[i] = joined;
        obbs.remove(j);
        debug!(target: "stage.beam2", merged = j, into = i, "collinear_merge");
    }
}

fn find_collinear_pair(
    obbs: &[Obb],
    obstacles: &[Obstacle],
    tol: &Tolerances,
) -> Option<(usize, usize, Obb)> {
    for i in 0..obbs.len() {
        for j in (i + 1)..obbs.len() {
            let a = &obbs[i];
            let b = &obbs[j];
            if a.u.dot(b.u).abs() < 0.98 {
                continue;
            }
            if (a.width() - b.width()).abs() > 100.0 {
                continue;
            }
            let (t_center, s_center) = a.local(b.normalized().center);
            if s_center.abs() > tol.obb_align {
                continue;
            }
            let half = b.half_len();
            let b_interval = (t_center - half, t_center + half);
            let gap = interval::gap((a.min_t, a.max_t), b_interval);
            if gap <= 0.0 || gap > tol.collinear_merge_gap {
                continue;
            }
            // The gap box between the facing ends, as wide as the wider beam.
            let (g0, g1) = if b_interval.0 > a.max_t {
                (a.max_t, b_interval.0)
            } else {
                (b_interval.1, a.min_t)
            };
            let gap_box = a
                .with_interval(g0.min(g1), g0.max(g1))
                .with_half_width(a.half_width.max(b.half_width));
            let gap_bounds = gap_box.bounds();
            let blocked = obstacles.iter().any(|o| o.bounds.overlaps(&gap_bounds));
            if !blocked {
                continue;
            }
            if gap > MERGE_PROBE {
                let midpoint = gap_box.normalized().center;
                let crossed = obbs.iter().enumerate().any(|(k, other)| {
                    k != i && k != j
                        && other.u.dot(a.u).abs() <= 0.1
                        && other.contains(midpoint, 0.0)
                });
                if !crossed {
                    continue;
                }
            }
            let joined = a
                .with_interval(a.min_t.min(b_interval.0), a.max_t.max(b_interval.1))
                .with_half_width(a.half_width.max(b.half_width));
            return Some((i, j, joined));
        }
    }
    None
}

/// Extend unanchored ends onto their perpendicular targets.
fn extend_ends(
    obbs: &mut [Obb],
    anchored: &[bool],
    obstacles: &[Obstacle],
    viewport_bounds: &[Bounds],
    budget: f64,
) {
    let snapshot = obbs.to_vec();
    for (idx, obb) in obbs.iter_mut().enumerate() {
        if anchored[idx] {
            continue;
        }
        let pos = end_extension(&snapshot, idx, true, obstacles, viewport_bounds, budget);
        let neg = end_extension(&snapshot, idx, false, obstacles, viewport_bounds, budget);
        if pos > 0.0 {
            obb.max_t += pos;
        }
        if neg > 0.0 {
            obb.min_t -= neg;
        }
    }
}

/// Extension distance of one end: the farthest perpendicular-target exit over
/// three rays, clamped by the nearest obstacle entry, the viewport exit, and
/// the search budget. Zero when no target is hit.
fn end_extension(
    obbs: &[Obb],
    idx: usize,
    positive: bool,
    obstacles: &[Obstacle],
    viewport_bounds: &[Bounds],
    budget: f64,
) -> f64 {
    let obb = &obbs[idx];
    let dir = if positive { obb.u } else { -obb.u };
    let t_end = if positive { obb.max_t } else { obb.min_t };
    let origins = [
        obb.point_at(t_end, -obb.half_width),
        obb.point_at(t_end, obb.half_width),
        obb.point_at(t_end, 0.0),
    ];

    let mut target_reach: f64 = 0.0;
    let mut obstacle_clamp = f64::INFINITY;
    for origin in origins {
        for (k, other) in obbs.iter().enumerate() {
            if k == idx || other.u.dot(obb.u).abs() > 0.1 {
                continue;
            }
            if let Some((enter, exit)) = other.ray_hit(origin, dir)
                && enter >= -1e-6
                && enter <= budget
            {
                target_reach = target_reach.max(exit);
            }
        }
        for obstacle in obstacles {
            let slab = Obb::from_bounds(&obstacle.bounds);
            if let Some((enter, _exit)) = slab.ray_hit(origin, dir) {
                // An obstacle already containing the origin clamps to zero.
                obstacle_clamp = obstacle_clamp.min(enter.max(0.0));
            }
        }
    }
    if target_reach <= 0.0 {
        return 0.0;
    }
    let viewport_clamp = viewport_bounds
        .iter()
        .filter_map(|b| b.ray_exit(obb.point_at(t_end, 0.0), dir))
        .fold(f64::INFINITY, f64::min);
    target_reach
        .min(obstacle_clamp)
        .min(viewport_clamp)
        .min(budget)
}

/// Union overlapping parallel duplicates, iterated to a fixed point.
fn merge_parallel(obbs: &mut Vec<Obb>, tol: &Tolerances) {
    loop {
        let Some((i, j, joined)) = find_parallel_pair(obbs, tol) else {
            return;
        };
        obbs[i] = joined;
        obbs.remove(j);
    }
}

fn find_parallel_pair(obbs: &[Obb], tol: &Tolerances) -> Option<(usize, usize, Obb)> {
    for i in 0..obbs.len() {
        for j in (i + 1)..obbs.len() {
            let a = &obbs[i];
            let b = &obbs[j];
            if a.u.dot(b.u).abs() < 0.98 {
                continue;
            }
            let (_, s_center) = a.local(b.normalized().center);
            if s_center.abs() > a.half_width + b.half_width + tol.obb_align {
                continue;
            }
            if !a.bounds().overlaps_strictly(&b.bounds()) {
                continue;
            }
            // Keep the wider beam's centreline.
            let keeper = if a.half_width >= b.half_width { a } else { b };
            let other = if a.half_width >= b.half_width { b } else { a };
            let ((t0, t1), _) = keeper.project_points(&other.corners());
            let joined = keeper
                .with_interval(keeper.min_t.min(t0), keeper.max_t.max(t1))
                .with_half_width(keeper.half_width.max(other.half_width));
            return Some((i, j, joined));
        }
    }
    None
}

trait ObbExt {
    fn with_half_width(&self, half_width: f64) -> Obb;
}

impl ObbExt for Obb {
    fn with_half_width(&self, half_width: f64) -> Obb {
        Obb {
            half_width,
            ..*self
        }
    }
}
