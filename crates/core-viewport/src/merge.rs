//! Duplicate-view merging (pipeline stage "Merge Views").
//!
//! Sheets frequently repeat the same plan as `PLAN(1)`, `PLAN(2)` with
//! complementary annotation sets. Merging translates every duplicate onto the
//! first copy (the base) by aligning axis-grid intersections, then collapses
//! the annotation texts into one label model per base, split into horizontal
//! and vertical channels so beam-label parsing can treat each axis
//! independently.
//!
//! The translation vector is voted: every (target point, base point) pairing
//! contributes its difference quantised to a coarse grid, the fullest bucket
//! wins, and the exact vector is the first difference that landed in that
//! bucket. A single supporting pair is enough; a duplicate with no support at
//! all stays standalone.

use core_annot::{BeamLabel, LabelText, attach_leaders, parse_labels};
use core_config::{LayerRole, SemanticLayerMap, Tolerances};
use core_entities::{Entity, Shape};
use core_geom::{Bounds, Point, Segment, Vec2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::ViewportRegion;

/// How one source region maps onto its merge base. Mappings with the same
/// `base_index` form an equivalence class keyed by the title prefix; the base
/// itself carries the zero vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeMapping {
    pub source_index: usize,
    pub base_index: usize,
    pub vector: Vec2,
    pub source_bounds: Bounds,
    pub normalized_title: String,
}

/// The collapsed label model of one base viewport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedView {
    pub base_index: usize,
    pub title: String,
    pub bounds: Bounds,
    /// Annotation texts reading along x, translated into the base frame.
    pub labels_h: Vec<LabelText>,
    /// Annotation texts reading along y.
    pub labels_v: Vec<LabelText>,
    /// Leader segments found on the label layers, in the base frame.
    pub leaders: Vec<Segment>,
    /// Parsed beam labels over both channels, donor-filled, with leaders
    /// bound where one was close enough.
    pub labels: Vec<BeamLabel>,
}

impl MergedView {
    /// Both channels in one stream, horizontal first.
    pub fn all_label_texts(&self) -> Vec<LabelText> {
        let mut all = self.labels_h.clone();
        all.extend(self.labels_v.iter().cloned());
        all
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MergeOutput {
    pub mappings: Vec<MergeMapping>,
    pub views: Vec<MergedView>,
}

impl MergeOutput {
    /// Bounds of every merged base, the scope later stages work in.
    pub fn base_bounds(&self) -> Vec<Bounds> {
        self.views.iter().map(|v| v.bounds).collect()
    }
}

/// Merge duplicate viewports onto their bases and build the label model.
pub fn merge_views(
    entities: &[Entity],
    regions: &[ViewportRegion],
    layers: &SemanticLayerMap,
    tol: &Tolerances,
) -> MergeOutput {
    let axis_segments: Vec<Segment> = entities
        .iter()
        .filter(|e| layers.has_role(&e.layer, LayerRole::Axis))
        .flat_map(|e| e.shape.line_segments())
        .collect();

    // Group by title prefix (raw title when no index was parsed), ascending
    // copy index inside each group. BTreeMap keeps group order deterministic.
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, region) in regions.iter().enumerate() {
        let key = match &region.info {
            Some(info) => info.prefix.clone(),
            None => region.title.clone(),
        };
        groups.entry(key).or_default().push(idx);
    }
    for members in groups.values_mut() {
        members.sort_by_key(|&idx| {
            (
                regions[idx].info.as_ref().map_or(1, |i| i.index),
                idx,
            )
        });
    }

    let mut output = MergeOutput::default();
    for (prefix, members) in &groups {
        let base_idx = members[0];
        let base_region = &regions[base_idx];
        let base_points = grid_intersections(&axis_segments, &base_region.bounds, tol);

        let mut view_bounds = base_region.bounds;
        let mut texts = collect_labels(entities, &base_region.bounds, layers, Vec2::ZERO);
        let mut leaders = collect_leaders(entities, &base_region.bounds, layers, Vec2::ZERO);
        output.mappings.push(MergeMapping {
            source_index: base_idx,
            base_index: base_idx,
            vector: Vec2::ZERO,
            source_bounds: base_region.bounds,
            normalized_title: prefix.clone(),
        });

        for &source_idx in &members[1..] {
            let source_region = &regions[source_idx];
            let target_points = grid_intersections(&axis_segments, &source_region.bounds, tol);
            match vote_translation(&target_points, &base_points, tol.merge_quantum) {
                Some(vector) => {
                    debug!(
                        target: "stage.merge",
                        source = source_idx,
                        base = base_idx,
                        dx = vector.x,
                        dy = vector.y,
                        "duplicate_aligned"
                    );
                    view_bounds = view_bounds.union(&source_region.bounds.translated(vector));
                    texts.extend(collect_labels(
                        entities,
                        &source_region.bounds,
                        layers,
                        vector,
                    ));
                    leaders.extend(collect_leaders(
                        entities,
                        &source_region.bounds,
                        layers,
                        vector,
                    ));
                    output.mappings.push(MergeMapping {
                        source_index: source_idx,
                        base_index: base_idx,
                        vector,
                        source_bounds: source_region.bounds,
                        normalized_title: prefix.clone(),
                    });
                }
                None => {
                    // No grid support: the duplicate stays its own view.
                    let standalone =
                        collect_labels(entities, &source_region.bounds, layers, Vec2::ZERO);
                    let standalone_leaders =
                        collect_leaders(entities, &source_region.bounds, layers, Vec2::ZERO);
                    output.views.push(build_view(
                        source_idx,
                        &source_region.title,
                        source_region.bounds,
                        standalone,
                        standalone_leaders,
                    ));
                }
            }
        }
        output
            .views
            .push(build_view(base_idx, &base_region.title, view_bounds, texts, leaders));
    }
    output
        .views
        .sort_by_key(|v| v.base_index);
    info!(
        target: "stage.merge",
        views = output.views.len(),
        mappings = output.mappings.len(),
        "views_merged"
    );
    output
}

fn build_view(
    base_index: usize,
    title: &str,
    bounds: Bounds,
    texts: Vec<LabelText>,
    leaders: Vec<Segment>,
) -> MergedView {
    let (labels_h, labels_v): (Vec<LabelText>, Vec<LabelText>) = texts
        .into_iter()
        .partition(|t| is_horizontal_rotation(t.rotation));
    let mut all = labels_h.clone();
    all.extend(labels_v.iter().cloned());
    let mut labels = parse_labels(&all);
    attach_leaders(&mut labels, &leaders);
    MergedView {
        base_index,
        title: title.to_string(),
        bounds,
        labels_h,
        labels_v,
        leaders,
        labels,
    }
}

/// Rotation folded into `[0, 180)`; readings within 45 degrees of the x axis
/// are the horizontal channel (the 45 degree boundary itself reads as
/// horizontal for a stable split).
fn is_horizontal_rotation(rotation: f64) -> bool {
    let mut r = rotation % 180.0;
    if r < 0.0 {
        r += 180.0;
    }
    r <= 45.0 || r >= 135.0
}

/// Annotation texts inside `bounds`, translated by `vector`. The in-situ
/// label layers are excluded from the merged stream.
fn collect_labels(
    entities: &[Entity],
    bounds: &Bounds,
    layers: &SemanticLayerMap,
    vector: Vec2,
) -> Vec<LabelText> {
    let mut out = Vec::new();
    for entity in entities {
        if !layers.has_role(&entity.layer, LayerRole::BeamLabel)
            || layers.has_role(&entity.layer, LayerRole::BeamInSituLabel)
        {
            continue;
        }
        let (insert, content, rotation, height) = match &entity.shape {
            Shape::Text {
                insert,
                content,
                rotation,
                height,
            }
            | Shape::Attrib {
                insert,
                content,
                rotation,
                height,
            } => (*insert, content, *rotation, *height),
            _ => continue,
        };
        if !bounds.contains(insert) {
            continue;
        }
        out.push(LabelText {
            insert: insert + vector,
            content: content.clone(),
            rotation,
            height,
            layer: entity.layer.clone(),
        });
    }
    out
}

/// Longest leader a label annotation realistically carries.
const LEADER_MAX_LEN: f64 = 2000.0;

/// Leader candidates: open line work on the label layers, short enough to be
/// an annotation leader rather than drawing geometry.
fn collect_leaders(
    entities: &[Entity],
    bounds: &Bounds,
    layers: &SemanticLayerMap,
    vector: Vec2,
) -> Vec<Segment> {
    let mut out = Vec::new();
    for entity in entities {
        if !layers.has_role(&entity.layer, LayerRole::BeamLabel)
            || layers.has_role(&entity.layer, LayerRole::BeamInSituLabel)
        {
            continue;
        }
        if entity.shape.closed_polygon().is_some() {
            continue;
        }
        for seg in entity.shape.line_segments() {
            if seg.length() > LEADER_MAX_LEN || seg.length() < 10.0 {
                continue;
            }
            if !bounds.contains(seg.start) && !bounds.contains(seg.end) {
                continue;
            }
            out.push(seg.translated(vector));
        }
    }
    out
}

/// Crossings of near-horizontal and near-vertical axis segments inside the
/// region, the anchor points of the merge vote.
pub fn grid_intersections(
    axis_segments: &[Segment],
    bounds: &Bounds,
    tol: &Tolerances,
) -> Vec<Point> {
    let in_region = |s: &&Segment| bounds.overlaps(&s.bounds());
    let horizontals: Vec<&Segment> = axis_segments
        .iter()
        .filter(in_region)
        .filter(|s| s.near_horizontal(tol.grid_axis_skew))
        .collect();
    let verticals: Vec<&Segment> = axis_segments
        .iter()
        .filter(in_region)
        .filter(|s| s.near_vertical(tol.grid_axis_skew))
        .collect();
    let mut points = Vec::new();
    for h in &horizontals {
        for v in &verticals {
            if let Some(p) = h.intersect(v, 1.0)
                && bounds.contains(p)
            {
                points.push(p);
            }
        }
    }
    points.sort_by(|a, b| {
        (a.y, a.x)
            .partial_cmp(&(b.y, b.x))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    points
}

/// Mode of the pairwise differences `(base - target)` on a coarse grid. The
/// returned vector is the exact difference of the first pair that landed in
/// the winning bucket. `None` when either side has no anchor points.
fn vote_translation(target: &[Point], base: &[Point], quantum: f64) -> Option<Vec2> {
    if target.is_empty() || base.is_empty() {
        return None;
    }
    let mut buckets: BTreeMap<(i64, i64), (usize, Vec2)> = BTreeMap::new();
    for t in target {
        for b in base {
            let d = *b - *t;
            let key = (
                (d.x / quantum).round() as i64,
                (d.y / quantum).round() as i64,
            );
            let entry = buckets.entry(key).or_insert((0, d));
            entry.0 += 1;
        }
    }
    // Fullest bucket wins; BTreeMap iteration breaks count ties by key.
    buckets
        .into_iter()
        .max_by_key(|(key, (count, _))| (*count, std::cmp::Reverse(*key)))
        .map(|(_, (_, vector))| vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::split_views;

    fn axis_line(x0: f64, y0: f64, x1: f64, y1: f64) -> Entity {
        Entity::new(
            "AXIS",
            Shape::Line {
                start: Point::new(x0, y0),
                end: Point::new(x1, y1),
            },
        )
    }

    fn label(content: &str, x: f64, y: f64, rotation: f64) -> Entity {
        Entity::new(
            "BEAM_TEXT",
            Shape::Text {
                insert: Point::new(x, y),
                content: content.to_string(),
                rotation,
                height: 300.0,
            },
        )
    }

    fn title_text(content: &str, x: f64, y: f64) -> Vec<Entity> {
        vec![
            Entity::new(
                "TITLE",
                Shape::Text {
                    insert: Point::new(x, y),
                    content: content.to_string(),
                    rotation: 0.0,
                    height: 500.0,
                },
            ),
            Entity::new(
                "0",
                Shape::Line {
                    start: Point::new(x - 100.0, y - 150.0),
                    end: Point::new(x + 4000.0, y - 150.0),
                },
            ),
        ]
    }

    fn layer_map() -> SemanticLayerMap {
        SemanticLayerMap {
            axis: vec!["AXIS".to_string()],
            beam_label: vec!["BEAM_TEXT".to_string()],
            ..SemanticLayerMap::default()
        }
    }

    /// Five-axis grid (3 horizontal, 2 vertical) with origin at `(ox, oy)`.
    fn grid(entities: &mut Vec<Entity>, ox: f64, oy: f64) {
        for i in 0..3 {
            entities.push(axis_line(
                ox,
                oy + f64::from(i) * 4000.0,
                ox + 9000.0,
                oy + f64::from(i) * 4000.0,
            ));
        }
        for i in 0..2 {
            entities.push(axis_line(
                ox + f64::from(i) * 9000.0,
                oy,
                ox + f64::from(i) * 9000.0,
                oy + 8000.0,
            ));
        }
    }

    #[test]
    fn twin_viewports_merge_with_expected_vector() {
        let mut entities = Vec::new();
        grid(&mut entities, 0.0, 0.0);
        grid(&mut entities, 20000.0, 0.0);
        entities.extend(title_text("一层梁(1)", 2000.0, -2000.0));
        entities.extend(title_text("一层梁(2)", 22000.0, -2000.0));
        entities.push(label("KL1(2) 300x600", 3000.0, 1000.0, 0.0));
        entities.push(label("KL2(1) 250x500", 23000.0, 5000.0, 90.0));

        let tol = Tolerances::default();
        let layers = layer_map();
        let regions = split_views(&entities, &layers, &tol);
        assert_eq!(regions.len(), 2);
        let output = merge_views(&entities, &regions, &layers, &tol);

        assert_eq!(output.views.len(), 1);
        assert_eq!(output.mappings.len(), 2);
        let duplicate = output
            .mappings
            .iter()
            .find(|m| m.source_index != m.base_index)
            .unwrap();
        assert!((duplicate.vector.x + 20000.0).abs() <= 50.0);
        assert!(duplicate.vector.y.abs() <= 50.0);

        let view = &output.views[0];
        // Union of both regions' label texts, one per channel.
        assert_eq!(view.labels_h.len(), 1);
        assert_eq!(view.labels_v.len(), 1);
        assert_eq!(view.labels.len(), 2);
        // The duplicate's label landed in the base frame.
        let v_label = &view.labels_v[0];
        assert!((v_label.insert.x - 3000.0).abs() <= 50.0);
    }

    #[test]
    fn single_intersection_is_enough_support() {
        let mut entities = vec![
            axis_line(0.0, 0.0, 9000.0, 0.0),
            axis_line(4000.0, -500.0, 4000.0, 500.0),
            axis_line(20000.0, 0.0, 29000.0, 0.0),
            axis_line(24000.0, -500.0, 24000.0, 500.0),
        ];
        entities.extend(title_text("P(1)", 2000.0, -2000.0));
        entities.extend(title_text("P(2)", 22000.0, -2000.0));
        let tol = Tolerances::default();
        let layers = layer_map();
        let regions = split_views(&entities, &layers, &tol);
        assert_eq!(regions.len(), 2);
        let output = merge_views(&entities, &regions, &layers, &tol);
        let duplicate = output
            .mappings
            .iter()
            .find(|m| m.source_index != m.base_index)
            .unwrap();
        assert!((duplicate.vector.x + 20000.0).abs() < 1e-6);
    }

    #[test]
    fn duplicate_without_grid_stays_standalone() {
        let mut entities = vec![
            axis_line(0.0, 0.0, 9000.0, 0.0),
            axis_line(4000.0, -500.0, 4000.0, 500.0),
            // Second region has only a horizontal line: no intersections.
            axis_line(20000.0, 0.0, 29000.0, 0.0),
        ];
        entities.extend(title_text("P(1)", 2000.0, -2000.0));
        entities.extend(title_text("P(2)", 22000.0, -2000.0));
        let tol = Tolerances::default();
        let layers = layer_map();
        let regions = split_views(&entities, &layers, &tol);
        let output = merge_views(&entities, &regions, &layers, &tol);
        // Base mapping only; the unsupported duplicate got its own view.
        assert_eq!(output.mappings.len(), 1);
        assert_eq!(output.views.len(), 2);
    }

    #[test]
    fn short_label_layer_lines_become_leaders() {
        let mut entities = vec![
            axis_line(0.0, 0.0, 9000.0, 0.0),
            axis_line(4000.0, -500.0, 4000.0, 500.0),
        ];
        entities.extend(title_text("P(1)", 2000.0, -2000.0));
        entities.push(label("KL1(2) 300x600", 3000.0, 200.0, 0.0));
        // Leader from just below the text down toward the beam line work.
        entities.push(Entity::new(
            "BEAM_TEXT",
            Shape::Line {
                start: Point::new(3100.0, 150.0),
                end: Point::new(3100.0, -400.0),
            },
        ));
        let tol = Tolerances::default();
        let layers = layer_map();
        let regions = split_views(&entities, &layers, &tol);
        let output = merge_views(&entities, &regions, &layers, &tol);
        let view = &output.views[0];
        assert_eq!(view.leaders.len(), 1);
        let leader = view.labels[0].leader.expect("leader bound to label");
        assert_eq!(leader.0, Point::new(3100.0, 150.0));
        assert_eq!(leader.1, Point::new(3100.0, -400.0));
    }

    #[test]
    fn rotation_splits_channels() {
        assert!(is_horizontal_rotation(0.0));
        assert!(is_horizontal_rotation(180.0));
        assert!(is_horizontal_rotation(45.0));
        assert!(is_horizontal_rotation(-10.0));
        assert!(!is_horizontal_rotation(90.0));
        assert!(!is_horizontal_rotation(60.0));
    }

    #[test]
    fn grid_intersections_are_sorted_and_bounded() {
        let segs = vec![
            Segment::new(Point::new(0.0, 0.0), Point::new(9000.0, 0.0)),
            Segment::new(Point::new(0.0, 4000.0), Point::new(9000.0, 4000.0)),
            Segment::new(Point::new(3000.0, -100.0), Point::new(3000.0, 4100.0)),
        ];
        let bounds = Bounds::new(Point::new(-1.0, -200.0), Point::new(9001.0, 4200.0));
        let pts = grid_intersections(&segs, &bounds, &Tolerances::default());
        assert_eq!(pts.len(), 2);
        assert!(pts[0].y < pts[1].y);
        assert_eq!(pts[0].x, 3000.0);
    }
}
