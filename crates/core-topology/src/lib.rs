//! Beam topology resolution (pipeline stage "Beam Topology", beam step 4).
//!
//! At every junction exactly one beam should stay whole; the others yield
//! and are cut by the junction box. Which beam wins is decided by a fixed
//! rule cascade:
//! 1. literal span (a head annotated as single-span protects itself),
//! 2. width, 3. height, 4. code priority,
//! 5. global span satisfaction (a code that already has as many fragments as
//!    its span gives way to one that does not).
//! A junction the cascade cannot decide ships anyway, marked with a CHK
//! record at its centre.
//!
//! Cutting is interval arithmetic on the loser's longitudinal axis: the
//! junction box projects to `[t0, t1]`, and depending on where that interval
//! sits the fragment is split in two, trimmed to a tail or head, or consumed
//! whole. Sub-fragments inherit their parent's attributes and a lineage tag;
//! survivors are renumbered 1..N at the end.
//!
//! Re-running the stage on its own output is the identity: every junction is
//! left with at most one fragment crossing it.

use core_annot::code_priority;
use core_attrib::AttributedBeam;
use core_beams::{IntersectionInfo, JunctionKind};
use core_config::Tolerances;
use core_geom::{Bounds, Obb, Vec2};
use core_report::{AnalysisError, ErrorKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// A quantified output fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// Fresh 1-based index over the surviving fragments.
    pub index: usize,
    /// Index of the step-3 beam this fragment descends from.
    pub parent_index: usize,
    /// Lineage tag: the parent's one-based number plus the cut suffixes it
    /// accumulated (`"7"`, `"7-A"`, `"7-T"`).
    pub tag: String,
    pub code: String,
    pub span: Option<String>,
    pub width: f64,
    pub height: f64,
    pub priority: u8,
    pub obb: Obb,
    pub bounds: Bounds,
    pub length: f64,
    /// `length * width * height`, in cubic millimetres.
    pub volume: f64,
}

#[derive(Debug, Clone)]
struct Working {
    parent: usize,
    tag: String,
    obb: Obb,
}

/// Resolve every junction and emit the quantified fragment set.
pub fn resolve_topology(
    beams: &[AttributedBeam],
    junctions: &[IntersectionInfo],
    tol: &Tolerances,
) -> (Vec<Fragment>, Vec<AnalysisError>) {
    let mut errors = Vec::new();
    let mut fragments: Vec<Working> = beams
        .iter()
        .enumerate()
        .map(|(i, beam)| Working {
            parent: i,
            tag: format!("{}", i + 1),
            obb: beam.obb,
        })
        .collect();
    let mut resolved = vec![false; junctions.len()];

    // Passes 1 to 4 visit each junction once.
    for pass in 1..=4u8 {
        for (j, junction) in junctions.iter().enumerate() {
            if resolved[j] {
                continue;
            }
            let live = live_members(&fragments, junction);
            if live.len() < 2 {
                resolved[j] = true;
                continue;
            }
            match pass {
                1 => apply_literal_span(
                    &mut fragments,
                    beams,
                    junction,
                    &live,
                    &mut resolved[j],
                    &mut errors,
                    tol,
                ),
                2 => {
                    let widths: Vec<f64> =
                        live.iter().map(|&f| beams[fragments[f].parent].attrs.width).collect();
                    cut_below_max(&mut fragments, junction, &live, &widths, 10.0, tol);
                }
                3 => {
                    let heights: Vec<f64> =
                        live.iter().map(|&f| beams[fragments[f].parent].attrs.height).collect();
                    cut_below_max(&mut fragments, junction, &live, &heights, 10.0, tol);
                }
                4 => {
                    let priorities: Vec<f64> = live
                        .iter()
                        .map(|&f| f64::from(code_priority(&beams[fragments[f].parent].attrs.code)))
                        .collect();
                    cut_below_max(&mut fragments, junction, &live, &priorities, 0.5, tol);
                }
                _ => {}
            }
        }
    }

    // Pass 5: global span satisfaction, swept until stable (bounded).
    for _sweep in 0..3 {
        let mut changed = false;
        let counts = code_counts(&fragments, beams);
        for (j, junction) in junctions.iter().enumerate() {
            if resolved[j] {
                continue;
            }
            let live = live_members(&fragments, junction);
            if live.len() < 2 {
                resolved[j] = true;
                continue;
            }
            let satisfied: Vec<bool> = live
                .iter()
                .map(|&f| {
                    let attrs = &beams[fragments[f].parent].attrs;
                    let span = span_count(attrs.span.as_deref());
                    counts.get(&attrs.code).copied().unwrap_or(0) >= span
                })
                .collect();
            if satisfied.iter().any(|s| *s) && satisfied.iter().any(|s| !*s) {
                let losers: Vec<usize> = live
                    .iter()
                    .zip(&satisfied)
                    .filter(|(_, sat)| !**sat)
                    .map(|(&f, _)| f)
                    .collect();
                cut_fragments(&mut fragments, &losers, &junction.bounds, tol);
                changed = true;
            } else if satisfied.iter().all(|s| *s) && junction.kind == JunctionKind::T {
                let stems: Vec<usize> = live
                    .iter()
                    .copied()
                    .filter(|&f| !is_head(&fragments[f].obb, junction))
                    .collect();
                if !stems.is_empty() {
                    cut_fragments(&mut fragments, &stems, &junction.bounds, tol);
                    changed = true;
                }
                resolved[j] = true;
            }
        }
        if !changed {
            break;
        }
    }

    for (j, junction) in junctions.iter().enumerate() {
        if resolved[j] {
            continue;
        }
        let live = live_members(&fragments, junction);
        if live.len() >= 2 {
            errors.push(AnalysisError::new(
                ErrorKind::UnresolvedJunction,
                junction.center,
                format!("{} fragments remain after all passes", live.len()),
            ));
        }
    }

    // Renumber survivors and attach quantities.
    let mut order: Vec<usize> = (0..fragments.len()).collect();
    order.sort_by(|&a, &b| {
        (fragments[a].parent, fragments[a].obb.min_t)
            .partial_cmp(&(fragments[b].parent, fragments[b].obb.min_t))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut out = Vec::with_capacity(order.len());
    for (n, &f) in order.iter().enumerate() {
        let w = &fragments[f];
        let beam = &beams[w.parent];
        let obb = w.obb.normalized();
        let length = obb.length();
        out.push(Fragment {
            index: n + 1,
            parent_index: beam.index,
            tag: w.tag.clone(),
            code: beam.attrs.code.clone(),
            span: beam.attrs.span.clone(),
            width: beam.attrs.width,
            height: beam.attrs.height,
            priority: code_priority(&beam.attrs.code),
            obb,
            bounds: obb.bounds(),
            length,
            volume: length * beam.attrs.width * beam.attrs.height,
        });
    }
    info!(
        target: "stage.beam4",
        fragments = out.len(),
        unresolved = errors
            .iter()
            .filter(|e| e.kind == ErrorKind::UnresolvedJunction)
            .count(),
        "topology_resolved"
    );
    (out, errors)
}

/// Indices of working fragments that still cross the junction box. Only
/// descendants of the junction's member beams count; an unrelated beam
/// grazing the box is never cut by it.
fn live_members(fragments: &[Working], junction: &IntersectionInfo) -> Vec<usize> {
    fragments
        .iter()
        .enumerate()
        .filter(|(_, w)| {
            junction.members.contains(&w.parent)
                && w.obb.bounds().overlaps_strictly(&junction.bounds)
        })
        .map(|(i, _)| i)
        .collect()
}

fn span_count(span: Option<&str>) -> usize {
    literal_span(span).unwrap_or(1)
}

fn literal_span(span: Option<&str>) -> Option<usize> {
    let span = span?;
    let digits: String = span
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Live fragment count per code over the whole drawing.
fn code_counts(fragments: &[Working], beams: &[AttributedBeam]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for w in fragments {
        *counts
            .entry(beams[w.parent].attrs.code.clone())
            .or_insert(0) += 1;
    }
    counts
}

/// Head test: at a T junction the cap runs perpendicular to the missing
/// direction; a fragment parallel to the cap is a head, everything else is
/// stem. At L and C junctions the notion does not apply and every fragment
/// reads as head.
fn is_head(obb: &Obb, junction: &IntersectionInfo) -> bool {
    let Some(stem_angle) = junction.stem_angle else {
        return true;
    };
    let cap = if stem_angle == 90 || stem_angle == 270 {
        Vec2::new(1.0, 0.0)
    } else {
        Vec2::new(0.0, 1.0)
    };
    obb.u.dot(cap).abs() >= 0.7
}

/// Pass 1: the literal-span rule.
#[allow(clippy::too_many_arguments)]
fn apply_literal_span(
    fragments: &mut Vec<Working>,
    beams: &[AttributedBeam],
    junction: &IntersectionInfo,
    live: &[usize],
    resolved: &mut bool,
    errors: &mut Vec<AnalysisError>,
    tol: &Tolerances,
) {
    let literal_ones: Vec<bool> = live
        .iter()
        .map(|&f| literal_span(beams[fragments[f].parent].attrs.span.as_deref()) == Some(1))
        .collect();
    match junction.kind {
        JunctionKind::T => {
            let head_flags: Vec<bool> = live
                .iter()
                .map(|&f| is_head(&fragments[f].obb, junction))
                .collect();
            let head_has_one = head_flags
                .iter()
                .zip(&literal_ones)
                .any(|(head, one)| *head && *one);
            let stems: Vec<usize> = live
                .iter()
                .zip(&head_flags)
                .filter(|(_, head)| !**head)
                .map(|(&f, _)| f)
                .collect();
            if head_has_one && !stems.is_empty() {
                cut_fragments(fragments, &stems, &junction.bounds, tol);
                *resolved = true;
            }
        }
        JunctionKind::C => {
            if literal_ones.iter().all(|one| *one) {
                errors.push(AnalysisError::new(
                    ErrorKind::CrossSpanOne,
                    junction.center,
                    "every member of the cross carries span 1",
                ));
                *resolved = true;
            } else if literal_ones.iter().any(|one| *one) {
                let losers: Vec<usize> = live
                    .iter()
                    .zip(&literal_ones)
                    .filter(|(_, one)| !**one)
                    .map(|(&f, _)| f)
                    .collect();
                cut_fragments(fragments, &losers, &junction.bounds, tol);
                *resolved = true;
            }
        }
        JunctionKind::L => {}
    }
}

/// Cut every live fragment whose score trails the maximum by more than
/// `threshold`.
fn cut_below_max(
    fragments: &mut Vec<Working>,
    junction: &IntersectionInfo,
    live: &[usize],
    scores: &[f64],
    threshold: f64,
    tol: &Tolerances,
) {
    let max = scores.iter().fold(f64::NEG_INFINITY, |a, b| a.max(*b));
    let losers: Vec<usize> = live
        .iter()
        .zip(scores)
        .filter(|(_, score)| max - **score > threshold)
        .map(|(&f, _)| f)
        .collect();
    if !losers.is_empty() {
        cut_fragments(fragments, &losers, &junction.bounds, tol);
    }
}

/// Cut the given fragments by a junction box, replacing them in place.
fn cut_fragments(
    fragments: &mut Vec<Working>,
    losers: &[usize],
    junction_bounds: &Bounds,
    tol: &Tolerances,
) {
    let mut losers = losers.to_vec();
    losers.sort_unstable();
    for &f in losers.iter().rev() {
        let w = fragments.remove(f);
        let replacements = cut_one(&w, junction_bounds, tol);
        for r in replacements.into_iter().rev() {
            fragments.insert(f, r);
        }
    }
}

/// Interval cut of one fragment. Four cases with an edge tolerance: consume,
/// tail, head, or middle split.
fn cut_one(w: &Working, junction_bounds: &Bounds, tol: &Tolerances) -> Vec<Working> {
    let corners = [
        core_geom::Point::new(junction_bounds.min_x, junction_bounds.min_y),
        core_geom::Point::new(junction_bounds.max_x, junction_bounds.min_y),
        core_geom::Point::new(junction_bounds.max_x, junction_bounds.max_y),
        core_geom::Point::new(junction_bounds.min_x, junction_bounds.max_y),
    ];
    let ((t0, t1), _) = w.obb.project_points(&corners);
    let edge = tol.cut_edge_tol;
    let covers_start = t0 <= w.obb.min_t + edge;
    let covers_end = t1 >= w.obb.max_t - edge;
    let mut out = Vec::new();
    match (covers_start, covers_end) {
        (true, true) => {
            debug!(target: "stage.beam4", tag = w.tag.as_str(), "fragment_consumed");
        }
        (true, false) => out.push(Working {
            parent: w.parent,
            tag: format!("{}-T", w.tag),
            obb: w.obb.with_interval(t1, w.obb.max_t),
        }),
        (false, true) => out.push(Working {
            parent: w.parent,
            tag: format!("{}-H", w.tag),
            obb: w.obb.with_interval(w.obb.min_t, t0),
        }),
        (false, false) => {
            out.push(Working {
                parent: w.parent,
                tag: format!("{}-A", w.tag),
                obb: w.obb.with_interval(w.obb.min_t, t0),
            });
            out.push(Working {
                parent: w.parent,
                tag: format!("{}-B", w.tag),
                obb: w.obb.with_interval(t1, w.obb.max_t),
            });
        }
    }
    out.retain(|r| r.obb.length() >= tol.min_fragment_len);
    out
}
