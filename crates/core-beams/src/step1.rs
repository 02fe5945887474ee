//! Beam Step 1: candidate rectangles from face-line pairs.
//!
//! The scan walks beam-layer lines in descending length order and pairs each
//! unused line with the first unused near-parallel partner whose gap matches
//! the annotation-derived width vocabulary. Both lines of a match are
//! consumed, so a face line backs at most one rectangle per scan. Explicit
//! closed polylines on beam layers are taken verbatim.
//!
//! Every emitted rectangle is then cut along its longitudinal axis by the
//! obstacle footprints (columns and walls), and near-collinear slivers that
//! CAD splicing separated are stitched back together.

use core_config::{LayerRole, SemanticLayerMap, Tolerances};
use core_entities::Entity;
use core_geom::{Obb, Segment, interval};
use core_support::Obstacle;
use tracing::{debug, info};

use crate::RawBeam;

/// Minimum length a cut remainder must keep to survive the obstacle cut.
const CUT_REMAINDER_MIN: f64 = 10.0;

/// Build the Step-1 candidate set.
pub fn build_raw_beams(
    entities: &[Entity],
    layers: &SemanticLayerMap,
    vocabulary: &[f64],
    obstacles: &[Obstacle],
    tol: &Tolerances,
) -> Vec<RawBeam> {
    let mut segments: Vec<Segment> = Vec::new();
    let mut polygon_beams: Vec<Obb> = Vec::new();
    for entity in entities {
        if !layers.has_role(&entity.layer, LayerRole::Beam) {
            continue;
        }
        if let Some(polygon) = entity.shape.closed_polygon() {
            if let Some(obb) = Obb::from_rect_polygon(&polygon) {
                polygon_beams.push(obb);
            }
            continue;
        }
        segments.extend(
            entity
                .shape
                .line_segments()
                .into_iter()
                .filter(|s| s.length() >= tol.beam_min_side_len),
        );
    }
    segments.sort_by(|a, b| b.length().total_cmp(&a.length()));

    let mut used = vec![false; segments.len()];
    let mut rects: Vec<(Obb, bool)> = Vec::new();
    for i in 0..segments.len() {
        if used[i] {
            continue;
        }
        let Some(dir_i) = segments[i].direction() else {
            continue;
        };
        for j in (i + 1)..segments.len() {
            if used[j] {
                continue;
            }
            let Some(dir_j) = segments[j].direction() else {
                continue;
            };
            if dir_i.dot(dir_j).abs() < 0.95 {
                continue;
            }
            let gap = segments[i].line_distance(segments[j].midpoint());
            if gap < tol.beam_gap_min || gap > tol.beam_gap_max {
                continue;
            }
            if !gap_matches(gap, vocabulary, tol) {
                continue;
            }
            if core_geom::segment::longitudinal_overlap(&segments[i], &segments[j])
                < tol.beam_overlap_min
            {
                continue;
            }
            let Some(obb) = Obb::from_side_pair(&segments[i], &segments[j]) else {
                continue;
            };
            used[i] = true;
            used[j] = true;
            rects.push((obb, false));
            break;
        }
    }
    debug!(
        target: "stage.beam1",
        paired = rects.len(),
        from_polyline = polygon_beams.len(),
        "pair_scan_done"
    );
    rects.extend(polygon_beams.into_iter().map(|obb| (obb, true)));

    let mut fragments: Vec<RawBeam> = Vec::new();
    for (obb, from_polyline) in rects {
        for piece in cut_by_obstacles(&obb, obstacles) {
            fragments.push(RawBeam {
                obb: piece,
                from_polyline,
            });
        }
    }
    let mut stitched = stitch_collinear(fragments, tol.stitch_gap);
    stitched.retain(|b| b.obb.length() >= tol.min_fragment_len);
    info!(
        target: "stage.beam1",
        fragments = stitched.len(),
        vocabulary = vocabulary.len(),
        "raw_beams_built"
    );
    stitched
}

/// A gap is accepted when it sits within tolerance of a vocabulary width, or
/// inside the wide fallback window when no vocabulary could be derived.
fn gap_matches(gap: f64, vocabulary: &[f64], tol: &Tolerances) -> bool {
    if vocabulary.is_empty() {
        return (100.0..=1000.0).contains(&gap);
    }
    vocabulary
        .iter()
        .any(|w| (gap - w).abs() <= tol.beam_width_tol)
}

/// Subtract the longitudinal footprint of every obstacle that meaningfully
/// overlaps the beam's thickness. Remainders shorter than the cut floor are
/// dropped on the spot.
pub fn cut_by_obstacles(obb: &Obb, obstacles: &[Obstacle]) -> Vec<Obb> {
    let lateral_floor = (0.02 * obb.width()).min(5.0);
    let mut holes = Vec::new();
    for obstacle in obstacles {
        let ((t0, t1), (s0, s1)) = obb.project_points(&obstacle.polygon);
        let lateral = (s1.min(obb.half_width) - s0.max(-obb.half_width)).max(0.0);
        if lateral > lateral_floor {
            holes.push((t0, t1));
        }
    }
    interval::subtract((obb.min_t, obb.max_t), &holes, CUT_REMAINDER_MIN)
        .into_iter()
        .map(|(t0, t1)| obb.with_interval(t0, t1))
        .collect()
}

/// Re-join near-collinear fragments separated by at most `gap_tol`. This only
/// repairs CAD splicing; larger gaps are Step 2's business.
fn stitch_collinear(mut fragments: Vec<RawBeam>, gap_tol: f64) -> Vec<RawBeam> {
    loop {
        let mut merged_any = false;
        'outer: for i in 0..fragments.len() {
            for j in (i + 1)..fragments.len() {
                let a = &fragments[i].obb;
                let b = &fragments[j].obb;
                if a.u.dot(b.u).abs() < 0.98 {
                    continue;
                }
                let (t_center, s_center) = a.local(b.normalized().center);
                if s_center.abs() > gap_tol {
                    continue;
                }
                if (a.half_width - b.half_width).abs() > gap_tol {
                    continue;
                }
                let half = b.half_len();
                let b_interval = (t_center - half, t_center + half);
                if interval::gap((a.min_t, a.max_t), b_interval) > gap_tol {
                    continue;
                }
                let joined = a.with_interval(
                    a.min_t.min(b_interval.0),
                    a.max_t.max(b_interval.1),
                );
                let from_polyline = fragments[i].from_polyline || fragments[j].from_polyline;
                fragments[i] = RawBeam {
                    obb: joined,
                    from_polyline,
                };
                fragments.remove(j);
                merged_any = true;
                break 'outer;
            }
        }
        if !merged_any {
            return fragments;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_entities::Shape;
    use core_geom::{Bounds, Point};

    fn beam_line(x0: f64, y0: f64, x1: f64, y1: f64) -> Entity {
        Entity::new(
            "BEAM",
            Shape::Line {
                start: Point::new(x0, y0),
                end: Point::new(x1, y1),
            },
        )
    }

    fn layer_map() -> SemanticLayerMap {
        SemanticLayerMap {
            beam: vec!["BEAM".to_string()],
            ..SemanticLayerMap::default()
        }
    }

    fn obstacle(x0: f64, y0: f64, x1: f64, y1: f64) -> Obstacle {
        let bounds = Bounds::new(Point::new(x0, y0), Point::new(x1, y1));
        Obstacle {
            bounds,
            polygon: vec![
                Point::new(x0, y0),
                Point::new(x1, y0),
                Point::new(x1, y1),
                Point::new(x0, y1),
            ],
        }
    }

    #[test]
    fn parallel_pair_with_vocabulary_width_emits_rectangle() {
        let entities = vec![
            beam_line(0.0, 0.0, 8000.0, 0.0),
            beam_line(0.0, 300.0, 8000.0, 300.0),
        ];
        let beams = build_raw_beams(&entities, &layer_map(), &[300.0], &[], &Tolerances::default());
        assert_eq!(beams.len(), 1);
        assert!((beams[0].obb.width() - 300.0).abs() < 1e-9);
        assert!((beams[0].obb.length() - 8000.0).abs() < 1e-9);
        assert!(!beams[0].from_polyline);
    }

    #[test]
    fn gap_off_vocabulary_is_rejected() {
        let entities = vec![
            beam_line(0.0, 0.0, 8000.0, 0.0),
            beam_line(0.0, 280.0, 8000.0, 280.0),
        ];
        let beams = build_raw_beams(&entities, &layer_map(), &[300.0], &[], &Tolerances::default());
        assert!(beams.is_empty());
    }

    #[test]
    fn empty_vocabulary_falls_back_to_wide_window() {
        let entities = vec![
            beam_line(0.0, 0.0, 8000.0, 0.0),
            beam_line(0.0, 280.0, 8000.0, 280.0),
        ];
        let beams = build_raw_beams(&entities, &layer_map(), &[], &[], &Tolerances::default());
        assert_eq!(beams.len(), 1);
    }

    #[test]
    fn second_line_is_consumed_once() {
        // Three parallel lines; the middle one can only serve one pair.
        let entities = vec![
            beam_line(0.0, 0.0, 8000.0, 0.0),
            beam_line(0.0, 300.0, 8000.0, 300.0),
            beam_line(0.0, 600.0, 8000.0, 600.0),
        ];
        let beams = build_raw_beams(&entities, &layer_map(), &[300.0], &[], &Tolerances::default());
        assert_eq!(beams.len(), 1);
    }

    #[test]
    fn closed_polyline_taken_verbatim() {
        let entities = vec![Entity::new(
            "BEAM",
            Shape::Polyline {
                vertices: vec![
                    Point::new(0.0, 0.0),
                    Point::new(4000.0, 0.0),
                    Point::new(4000.0, 250.0),
                    Point::new(0.0, 250.0),
                ],
                closed: true,
                bulges: None,
            },
        )];
        let beams = build_raw_beams(&entities, &layer_map(), &[300.0], &[], &Tolerances::default());
        assert_eq!(beams.len(), 1);
        assert!(beams[0].from_polyline);
        assert!((beams[0].obb.width() - 250.0).abs() < 1e-9);
    }

    #[test]
    fn obstacle_cut_splits_and_respects_transverse_floor() {
        let entities = vec![
            beam_line(0.0, 0.0, 8000.0, 0.0),
            beam_line(0.0, 300.0, 8000.0, 300.0),
        ];
        // A column square across the beam at x 3800..4300.
        let col = obstacle(3800.0, -100.0, 4300.0, 400.0);
        let beams = build_raw_beams(
            &entities,
            &layer_map(),
            &[300.0],
            &[col],
            &Tolerances::default(),
        );
        assert_eq!(beams.len(), 2);
        let mut xs: Vec<f64> = beams.iter().map(|b| b.obb.bounds().min_x).collect();
        xs.sort_by(f64::total_cmp);
        assert!((xs[0] - 0.0).abs() < 1e-6);
        assert!((xs[1] - 4300.0).abs() < 1e-6);
        // No fragment overlaps the column beyond the transverse floor.
        for b in &beams {
            assert!(!b.obb.bounds().overlaps_strictly(&Bounds::new(
                Point::new(3800.0 + 1.0, -100.0),
                Point::new(4300.0 - 1.0, 400.0)
            )));
        }
    }

    #[test]
    fn grazing_obstacle_does_not_cut() {
        let entities = vec![
            beam_line(0.0, 0.0, 8000.0, 0.0),
            beam_line(0.0, 300.0, 8000.0, 300.0),
        ];
        // Obstacle touching only the top 3 mm of the beam: below min(2%w, 5).
        let graze = obstacle(3800.0, 297.0, 4300.0, 600.0);
        let beams = build_raw_beams(
            &entities,
            &layer_map(),
            &[300.0],
            &[graze],
            &Tolerances::default(),
        );
        assert_eq!(beams.len(), 1);
        assert!((beams[0].obb.length() - 8000.0).abs() < 1e-9);
    }

    #[test]
    fn spliced_lines_stitch_back_together() {
        // The same beam drawn as two segment pairs with a 1 mm splice gap.
        let entities = vec![
            beam_line(0.0, 0.0, 4000.0, 0.0),
            beam_line(0.0, 300.0, 4000.0, 300.0),
            beam_line(4001.0, 0.0, 8000.0, 0.0),
            beam_line(4001.0, 300.0, 8000.0, 300.0),
        ];
        let beams = build_raw_beams(&entities, &layer_map(), &[300.0], &[], &Tolerances::default());
        assert_eq!(beams.len(), 1);
        assert!((beams[0].obb.length() - 8000.0).abs() < 1.5);
    }

    #[test]
    fn step1_is_deterministic() {
        let entities = vec![
            beam_line(0.0, 0.0, 8000.0, 0.0),
            beam_line(0.0, 300.0, 8000.0, 300.0),
            beam_line(2000.0, 1000.0, 2000.0, 6000.0),
            beam_line(2300.0, 1000.0, 2300.0, 6000.0),
        ];
        let tol = Tolerances::default();
        let a = build_raw_beams(&entities, &layer_map(), &[300.0], &[], &tol);
        let b = build_raw_beams(&entities, &layer_map(), &[300.0], &[], &tol);
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }
}
