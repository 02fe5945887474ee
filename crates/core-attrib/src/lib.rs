//! Beam attribute assignment (pipeline stage "Beam Attributes", beam step 3).
//!
//! Two mechanisms hand a label to a beam. The direct one is the leader hit
//! test: a label's probe points (leader endpoints when the annotation has a
//! leader, the insertion point otherwise) are tested against beam boxes with
//! a small local tolerance. A leader whose two endpoints land in two
//! different beams is ambiguous; the label is dropped with a recorded
//! conflict rather than silently assigned.
//!
//! The indirect one is run propagation: beams on the same drawing line whose
//! gaps are continuously covered (by beams or by obstacle footprints, so a
//! column between two halves of the same beam does not break the run)
//! inherit the first stamped label of their run. Propagation never
//! overwrites a direct label and is idempotent.

use core_annot::BeamLabel;
use core_beams::Beam;
use core_config::Tolerances;
use core_geom::{Obb, Point, Vec2};
use core_report::{AnalysisError, ErrorKind};
use core_support::Obstacle;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Structural attributes of a beam fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeamAttrs {
    pub code: String,
    pub span: Option<String>,
    pub width: f64,
    pub height: f64,
    pub raw_label: String,
    /// True when a label landed on this beam directly, false for inherited
    /// and fallback attributes.
    pub from_label: bool,
}

/// The code given to beams no label ever reaches.
pub const UNKNOWN_CODE: &str = "UNKNOWN";

/// Dimensions used when not even a donor label exists.
const FALLBACK_WIDTH: f64 = 300.0;
const FALLBACK_HEIGHT: f64 = 600.0;

/// A Step-3 beam: Step-2 geometry plus attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributedBeam {
    pub index: usize,
    pub obb: Obb,
    pub junctions: Vec<usize>,
    pub attrs: BeamAttrs,
}

/// Attach labels to beams and propagate along runs.
pub fn attach_attributes(
    beams: &[Beam],
    labels: &[BeamLabel],
    obstacles: &[Obstacle],
    tol: &Tolerances,
) -> (Vec<AttributedBeam>, Vec<AnalysisError>) {
    let mut errors = Vec::new();
    let mut stamped: Vec<Option<BeamAttrs>> = vec![None; beams.len()];

    // Deterministic label order: bottom-up, left-right.
    let mut ordered: Vec<&BeamLabel> = labels.iter().collect();
    ordered.sort_by(|a, b| {
        (a.insert.y, a.insert.x)
            .partial_cmp(&(b.insert.y, b.insert.x))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for label in &ordered {
        match hit_beam(beams, label, tol.label_hit_tol) {
            HitResult::One(beam_idx) => {
                if stamped[beam_idx].is_none() {
                    stamped[beam_idx] = Some(BeamAttrs {
                        code: label.code.clone(),
                        span: label.span.clone(),
                        width: label.width.unwrap_or(0.0),
                        height: label.height.unwrap_or(0.0),
                        raw_label: label.raw.clone(),
                        from_label: true,
                    });
                }
            }
            HitResult::Conflict(a, b) => {
                errors.push(AnalysisError::new(
                    ErrorKind::LeaderConflict,
                    label.insert,
                    format!(
                        "label '{}' leader spans beams {} and {}",
                        label.raw, a, b
                    ),
                ));
            }
            HitResult::None => {}
        }
    }
    let direct = stamped.iter().filter(|s| s.is_some()).count();

    propagate_runs(beams, obstacles, &mut stamped, tol);

    // Donor dimensions: the first label carrying both numbers.
    let (donor_w, donor_h) = ordered
        .iter()
        .find_map(|l| match (l.width, l.height) {
            (Some(w), Some(h)) => Some((w, h)),
            _ => None,
        })
        .unwrap_or((FALLBACK_WIDTH, FALLBACK_HEIGHT));

    let mut out = Vec::with_capacity(beams.len());
    for (beam, slot) in beams.iter().zip(stamped.into_iter()) {
        let attrs = match slot {
            Some(mut attrs) => {
                if attrs.width <= 0.0 {
                    attrs.width = donor_w;
                }
                if attrs.height <= 0.0 {
                    attrs.height = donor_h;
                }
                attrs
            }
            None => {
                errors.push(AnalysisError::new(
                    ErrorKind::UnknownCode,
                    beam.center(),
                    format!("beam {} has no label or propagation source", beam.index),
                ));
                BeamAttrs {
                    code: UNKNOWN_CODE.to_string(),
                    span: None,
                    width: donor_w,
                    height: donor_h,
                    raw_label: String::new(),
                    from_label: false,
                }
            }
        };
        out.push(AttributedBeam {
            index: beam.index,
            obb: beam.obb,
            junctions: beam.junctions.clone(),
            attrs,
        });
    }
    info!(
        target: "stage.beam3",
        beams = out.len(),
        direct_labels = direct,
        conflicts = errors.iter().filter(|e| e.kind == ErrorKind::LeaderConflict).count(),
        unknown = errors.iter().filter(|e| e.kind == ErrorKind::UnknownCode).count(),
        "attributes_attached"
    );
    (out, errors)
}

enum HitResult {
    None,
    One(usize),
    Conflict(usize, usize),
}

/// Hit-test a label's probe points against the beam boxes. Each probe
/// resolves to the lowest-index beam containing it; two probes resolving to
/// different beams is a conflict.
fn hit_beam(beams: &[Beam], label: &BeamLabel, tol: f64) -> HitResult {
    let mut hit: Option<usize> = None;
    for probe in label.probe_points() {
        let found = beams
            .iter()
            .find(|b| b.obb.contains(probe, tol))
            .map(|b| b.index);
        match (hit, found) {
            (_, None) => {}
            (None, Some(idx)) => hit = Some(idx),
            (Some(prev), Some(idx)) if prev != idx => return HitResult::Conflict(prev, idx),
            _ => {}
        }
    }
    match hit {
        Some(idx) => HitResult::One(idx),
        None => HitResult::None,
    }
}

/// Group beams into collinear runs and copy the first stamped attribute
/// block to the unlabelled members.
fn propagate_runs(
    beams: &[Beam],
    obstacles: &[Obstacle],
    stamped: &mut [Option<BeamAttrs>],
    tol: &Tolerances,
) {
    // Sort by orientation, then by which line the beam lies on, then along
    // the line.
    let mut order: Vec<usize> = (0..beams.len()).collect();
    let keys: Vec<(f64, f64, f64)> = beams
        .iter()
        .map(|b| {
            let u = canonical_direction(b.obb.u);
            let n = u.perp();
            let c = b.center();
            let offset = c.x * n.x + c.y * n.y;
            let along = c.x * u.x + c.y * u.y;
            (u.orientation_deg(), offset, along)
        })
        .collect();
    order.sort_by(|&a, &b| {
        keys[a]
            .partial_cmp(&keys[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut run: Vec<usize> = Vec::new();
    let mut runs: Vec<Vec<usize>> = Vec::new();
    for &idx in &order {
        if let Some(&prev) = run.last() {
            if same_run(&beams[prev], &beams[idx], beams, obstacles, tol) {
                run.push(idx);
            } else {
                runs.push(std::mem::take(&mut run));
                run.push(idx);
            }
        } else {
            run.push(idx);
        }
    }
    if !run.is_empty() {
        runs.push(run);
    }

    for run in runs {
        let Some(source) = run
            .iter()
            .find(|&&idx| stamped[idx].as_ref().is_some_and(|a| a.from_label))
        else {
            continue;
        };
        let Some(attrs) = stamped[*source].clone() else {
            continue;
        };
        let mut inherited = 0usize;
        for &idx in &run {
            if stamped[idx].is_none() {
                stamped[idx] = Some(BeamAttrs {
                    from_label: false,
                    ..attrs.clone()
                });
                inherited += 1;
            }
        }
        if inherited > 0 {
            debug!(
                target: "stage.beam3",
                code = attrs.code.as_str(),
                inherited,
                "run_propagated"
            );
        }
    }
}

/// Fold a direction so opposite vectors compare equal: positive y half-plane,
/// ties broken toward positive x.
fn canonical_direction(u: Vec2) -> Vec2 {
    if u.y < 0.0 || (u.y == 0.0 && u.x < 0.0) {
        -u
    } else {
        u
    }
}

/// Two beams belong to the same run when they are near-parallel, lie on the
/// same drawing line, and the path between their closest endpoints is
/// continuously covered by beams or obstacles.
fn same_run(
    a: &Beam,
    b: &Beam,
    beams: &[Beam],
    obstacles: &[Obstacle],
    tol: &Tolerances,
) -> bool {
    if a.obb.u.dot(b.obb.u).abs() < 0.98 {
        return false;
    }
    let (_, s_center) = a.obb.local(b.center());
    if s_center.abs() > tol.run_offset_tol {
        return false;
    }
    let (start, end) = closest_end_pair(&a.obb, &b.obb);
    covered_path(start, end, beams, obstacles, tol.run_sample_step)
}

fn closest_end_pair(a: &Obb, b: &Obb) -> (Point, Point) {
    let ends_a = [a.end_point(false), a.end_point(true)];
    let ends_b = [b.end_point(false), b.end_point(true)];
    let mut best = (ends_a[0], ends_b[0]);
    let mut best_d = f64::INFINITY;
    for ea in ends_a {
        for eb in ends_b {
            let d = ea.distance(eb);
            if d < best_d {
                best_d = d;
                best = (ea, eb);
            }
        }
    }
    best
}

/// Sample the straight path between two points; every sample must sit inside
/// some beam box or obstacle bounds.
fn covered_path(
    start: Point,
    end: Point,
    beams: &[Beam],
    obstacles: &[Obstacle],
    step: f64,
) -> bool {
    let total = start.distance(end);
    if total <= step {
        return true;
    }
    let Some(dir) = (end - start).normalized() else {
        return true;
    };
    let count = (total / step).ceil() as usize;
    for k in 0..=count {
        let d = (k as f64 * step).min(total);
        let p = start + dir * d;
        let in_beam = beams.iter().any(|b| b.obb.contains(p, 1.0));
        let in_obstacle = || obstacles.iter().any(|o| o.bounds.contains(p));
        if !in_beam && !in_obstacle() {
            return false;
        }
    }
    true
}
