//! Column and wall synthesis (pipeline stage "Columns/Walls").
//!
//! Columns are direct: any closed shape on a column layer becomes one. Walls
//! have to be reconstructed from their two face lines. The wall thickness
//! vocabulary is estimated first by sampling parallel line pairs; a pair then
//! becomes a wall when its gap matches the vocabulary, an axis line runs
//! inside the gap, and the overlapping interval survives column subtraction.
//!
//! Walls use columns only as cutting obstacles. Wall faces are never cut
//! against other wall candidates; letting walls obstruct each other produces
//! self-cut artifacts wherever faces share a corner.

use core_config::{LayerRole, SemanticLayerMap, Tolerances};
use core_entities::Entity;
use core_geom::{Bounds, Obb, Point, Segment, interval};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// A column footprint with its axis-aligned extents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub bounds: Bounds,
    pub center: Point,
    pub width: f64,
    pub height: f64,
    pub polygon: Vec<Point>,
}

/// A reconstructed wall rectangle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wall {
    pub obb: Obb,
    pub thickness: f64,
}

/// Anything that blocks or anchors beams: the union view of columns and
/// walls consumed by the beam stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub bounds: Bounds,
    pub polygon: Vec<Point>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SupportOutput {
    pub columns: Vec<Column>,
    pub walls: Vec<Wall>,
}

impl SupportOutput {
    pub fn obstacles(&self) -> Vec<Obstacle> {
        let mut out: Vec<Obstacle> = self
            .columns
            .iter()
            .map(|c| Obstacle {
                bounds: c.bounds,
                polygon: c.polygon.clone(),
            })
            .collect();
        out.extend(self.walls.iter().map(|w| Obstacle {
            bounds: w.obb.bounds(),
            polygon: w.obb.polygon(),
        }));
        out
    }
}

/// Emit every closed shape on a column layer as a column.
pub fn detect_columns(entities: &[Entity], layers: &SemanticLayerMap) -> Vec<Column> {
    let mut columns: Vec<Column> = entities
        .iter()
        .filter(|e| layers.has_role(&e.layer, LayerRole::Column))
        .filter_map(|e| {
            let polygon = e.shape.closed_polygon()?;
            let bounds = Bounds::from_points(polygon.iter().copied())?;
            Some(Column {
                bounds,
                center: bounds.center(),
                width: bounds.width(),
                height: bounds.height(),
                polygon,
            })
        })
        .collect();
    columns.sort_by(|a, b| {
        (a.bounds.min_x, a.bounds.min_y)
            .partial_cmp(&(b.bounds.min_x, b.bounds.min_y))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    columns
}

/// Reconstruct walls from face-line pairs.
pub fn detect_walls(
    entities: &[Entity],
    columns: &[Column],
    layers: &SemanticLayerMap,
    tol: &Tolerances,
) -> Vec<Wall> {
    let mut segments: Vec<Segment> = entities
        .iter()
        .filter(|e| layers.has_role(&e.layer, LayerRole::Wall))
        .flat_map(|e| e.shape.line_segments())
        .filter(|s| s.length() >= tol.wall_gap_min)
        .collect();
    segments.sort_by(|a, b| b.length().total_cmp(&a.length()));

    let axis_segments: Vec<Segment> = entities
        .iter()
        .filter(|e| layers.has_role(&e.layer, LayerRole::Axis))
        .flat_map(|e| e.shape.line_segments())
        .collect();

    let vocabulary = thickness_vocabulary(&segments, tol);
    debug!(target: "stage.support", vocabulary = ?vocabulary, "wall_thickness_vocabulary");

    let mut used = vec![false; segments.len()];
    let mut walls = Vec::new();
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
            if !vocabulary
                .iter()
                .any(|t| (gap - t).abs() <= tol.wall_gap_tol)
            {
                continue;
            }
            let Some(obb) = pair_box(&segments[i], &segments[j]) else {
                continue;
            };
            if obb.length() < tol.beam_overlap_min {
                continue;
            }
            if !axis_supported(&obb, &axis_segments, gap, tol) {
                continue;
            }
            used[i] = true;
            used[j] = true;
            for piece in cut_by_columns(&obb, columns, gap, tol) {
                walls.push(Wall {
                    obb: piece,
                    thickness: gap,
                });
            }
            break;
        }
    }
    info!(
        target: "stage.support",
        walls = walls.len(),
        vocabulary = vocabulary.len(),
        "walls_detected"
    );
    walls
}

/// Estimate the set of wall thicknesses present in the drawing. Parallel line
/// pairs at plausible distances vote on a 10 mm grid; a rounded distance
/// enters the vocabulary when it occurs more than twice and either sits
/// within 5 mm of a standard masonry/concrete thickness or occurs more than
/// ten times. An empty estimate falls back to the common set.
pub fn thickness_vocabulary(segments: &[Segment], tol: &Tolerances) -> Vec<f64> {
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for i in 0..segments.len() {
        let Some(dir_i) = segments[i].direction() else {
            continue;
        };
        for j in (i + 1)..segments.len() {
            let Some(dir_j) = segments[j].direction() else {
                continue;
            };
            if dir_i.dot(dir_j).abs() < 0.98 {
                continue;
            }
            let d = segments[i].line_distance(segments[j].midpoint());
            if d < tol.wall_gap_min || d > tol.wall_gap_max {
                continue;
            }
            let rounded = ((d / 10.0).round() * 10.0) as i64;
            *counts.entry(rounded).or_insert(0) += 1;
        }
    }
    let mut vocabulary: Vec<f64> = counts
        .iter()
        .filter(|(value, count)| {
            let value = **value as f64;
            let standard = tol
                .wall_standard_thickness
                .iter()
                .any(|s| (value - s).abs() <= 5.0);
            **count > 2 && (standard || **count > 10)
        })
        .map(|(value, _)| *value as f64)
        .collect();
    if vocabulary.is_empty() {
        vocabulary = tol.wall_fallback_thickness.clone();
    }
    vocabulary
}

/// Wall rectangle over the overlapping interval of the two face lines.
fn pair_box(a: &Segment, b: &Segment) -> Option<Obb> {
    let obb = Obb::from_side_pair(a, b)?;
    let (ia, _) = obb.project_points(&[a.start, a.end]);
    let (ib, _) = obb.project_points(&[b.start, b.end]);
    let t0 = ia.0.max(ib.0);
    let t1 = ia.1.min(ib.1);
    if t1 <= t0 {
        return None;
    }
    Some(obb.with_interval(t0, t1))
}

/// A wall pair needs a parallel axis line running inside (or near) the gap
/// with real longitudinal overlap.
fn axis_supported(obb: &Obb, axis_segments: &[Segment], gap: f64, tol: &Tolerances) -> bool {
    axis_segments.iter().any(|axis| {
        let Some(dir) = axis.direction() else {
            return false;
        };
        if dir.dot(obb.u).abs() < 0.95 {
            return false;
        }
        let (_, s) = obb.local(axis.midpoint());
        if s.abs() > gap + 200.0 {
            return false;
        }
        let ((a0, a1), _) = obb.project_points(&[axis.start, axis.end]);
        interval::overlap((a0, a1), (obb.min_t, obb.max_t)) >= tol.beam_overlap_min
    })
}

/// Subtract the longitudinal footprint of every column that meaningfully
/// covers the wall's thickness.
fn cut_by_columns(obb: &Obb, columns: &[Column], gap: f64, tol: &Tolerances) -> Vec<Obb> {
    let lateral_floor = 10.0_f64.min(0.02 * gap);
    let mut holes = Vec::new();
    for column in columns {
        let ((t0, t1), (s0, s1)) = obb.project_points(&column.polygon);
        let lateral = (s1.min(obb.half_width) - s0.max(-obb.half_width)).max(0.0);
        if lateral > lateral_floor {
            holes.push((t0, t1));
        }
    }
    interval::subtract((obb.min_t, obb.max_t), &holes, tol.min_fragment_len)
        .into_iter()
        .map(|(t0, t1)| obb.with_interval(t0, t1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_entities::Shape;

    fn wall_line(x0: f64, y0: f64, x1: f64, y1: f64) -> Entity {
        Entity::new(
            "WALL",
            Shape::Line {
                start: Point::new(x0, y0),
                end: Point::new(x1, y1),
            },
        )
    }

    fn axis_line(x0: f64, y0: f64, x1: f64, y1: f64) -> Entity {
        Entity::new(
            "AXIS",
            Shape::Line {
                start: Point::new(x0, y0),
                end: Point::new(x1, y1),
            },
        )
    }

    fn column_rect(cx: f64, cy: f64, size: f64) -> Entity {
        let h = size / 2.0;
        Entity::new(
            "COLU",
            Shape::Polyline {
                vertices: vec![
                    Point::new(cx - h, cy - h),
                    Point::new(cx + h, cy - h),
                    Point::new(cx + h, cy + h),
                    Point::new(cx - h, cy + h),
                ],
                closed: true,
                bulges: None,
            },
        )
    }

    fn layer_map() -> SemanticLayerMap {
        SemanticLayerMap {
            axis: vec!["AXIS".to_string()],
            column: vec!["COLU".to_string()],
            wall: vec!["WALL".to_string()],
            ..SemanticLayerMap::default()
        }
    }

    #[test]
    fn closed_shapes_become_columns() {
        let entities = vec![
            column_rect(2500.0, 100.0, 500.0),
            Entity::new(
                "COLU",
                Shape::Circle {
                    center: Point::new(0.0, 0.0),
                    radius: 300.0,
                },
            ),
            // Open polyline on the column layer is not a column.
            Entity::new(
                "COLU",
                Shape::Polyline {
                    vertices: vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)],
                    closed: false,
                    bulges: None,
                },
            ),
        ];
        let columns = detect_columns(&entities, &layer_map());
        assert_eq!(columns.len(), 2);
        let square = &columns[1];
        assert_eq!(square.center, Point::new(2500.0, 100.0));
        assert_eq!(square.width, 500.0);
        assert_eq!(square.height, 500.0);
    }

    #[test]
    fn wall_with_column_cut_splits_in_two() {
        let entities = vec![
            wall_line(0.0, 0.0, 5000.0, 0.0),
            wall_line(0.0, 200.0, 5000.0, 200.0),
            axis_line(0.0, 100.0, 5000.0, 100.0),
            column_rect(2500.0, 100.0, 500.0),
        ];
        let layers = layer_map();
        let columns = detect_columns(&entities, &layers);
        let walls = detect_walls(&entities, &columns, &layers, &Tolerances::default());
        assert_eq!(walls.len(), 2);
        for wall in &walls {
            assert!((wall.thickness - 200.0).abs() < 1e-9);
        }
        let mut bounds: Vec<Bounds> = walls.iter().map(|w| w.obb.bounds()).collect();
        bounds.sort_by(|a, b| a.min_x.total_cmp(&b.min_x));
        assert!((bounds[0].min_x - 0.0).abs() < 1e-6);
        assert!((bounds[0].max_x - 2250.0).abs() < 1e-6);
        assert!((bounds[1].min_x - 2750.0).abs() < 1e-6);
        assert!((bounds[1].max_x - 5000.0).abs() < 1e-6);
    }

    #[test]
    fn wall_without_axis_support_is_rejected() {
        let entities = vec![
            wall_line(0.0, 0.0, 5000.0, 0.0),
            wall_line(0.0, 200.0, 5000.0, 200.0),
        ];
        let layers = layer_map();
        let walls = detect_walls(&entities, &[], &layers, &Tolerances::default());
        assert!(walls.is_empty());
    }

    #[test]
    fn gap_outside_vocabulary_is_rejected() {
        let entities = vec![
            // 470 mm apart: not in the fallback vocabulary.
            wall_line(0.0, 0.0, 5000.0, 0.0),
            wall_line(0.0, 470.0, 5000.0, 470.0),
            axis_line(0.0, 235.0, 5000.0, 235.0),
        ];
        let layers = layer_map();
        let walls = detect_walls(&entities, &[], &layers, &Tolerances::default());
        assert!(walls.is_empty());
    }

    #[test]
    fn vocabulary_detects_repeated_standard_thickness() {
        // Six parallel pairs at 240 mm: count > 2 and standard.
        let mut segments = Vec::new();
        for k in 0..4 {
            let y = f64::from(k) * 5000.0;
            segments.push(Segment::new(Point::new(0.0, y), Point::new(3000.0, y)));
            segments.push(Segment::new(
                Point::new(0.0, y + 240.0),
                Point::new(3000.0, y + 240.0),
            ));
        }
        let vocab = thickness_vocabulary(&segments, &Tolerances::default());
        assert!(vocab.contains(&240.0));
        // Sparse pairing alone (count <= 2) does not create entries.
        assert!(!vocab.contains(&5000.0));
    }

    #[test]
    fn empty_sampling_falls_back_to_common_set() {
        let vocab = thickness_vocabulary(&[], &Tolerances::default());
        assert_eq!(vocab, vec![100.0, 200.0, 240.0]);
    }
}
